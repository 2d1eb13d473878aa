//! Sliding-window conversion of chunks into instruction examples.

use crate::config::WindowParams;
use crate::helpers::word_count;
use crate::model::{Chunk, Example, Exchange, Provenance};
use crate::Tokenizer;

/// Examples produced from one chunk, plus counts of discarded windows.
#[derive(Debug, Default)]
pub struct BuildOutcome {
    pub examples: Vec<Example>,
    pub windows: usize,
    pub dropped_empty_input: usize,
    pub dropped_non_therapist: usize,
    pub dropped_length: usize,
    pub dropped_tokens: usize,
}

impl BuildOutcome {
    pub fn dropped(&self) -> usize {
        self.dropped_empty_input + self.dropped_non_therapist + self.dropped_length + self.dropped_tokens
    }

    pub fn merge(&mut self, other: BuildOutcome) {
        self.examples.extend(other.examples);
        self.windows += other.windows;
        self.dropped_empty_input += other.dropped_empty_input;
        self.dropped_non_therapist += other.dropped_non_therapist;
        self.dropped_length += other.dropped_length;
        self.dropped_tokens += other.dropped_tokens;
    }
}

/// Render context exchanges as `Speaker: message` lines.
pub fn format_context(exchanges: &[Exchange]) -> String {
    exchanges
        .iter()
        .map(|e| format!("{}: {}", e.speaker.display_name(), e.message))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Slide a `context + 1` window over the chunk and emit filtered examples.
///
/// Overlapping chunks are not deduplicated: a window that lies in the shared
/// region of two chunks yields an example from each.
pub fn build_examples<T>(
    chunk: &Chunk<'_>,
    collection: &str,
    params: &WindowParams,
    tokenizer: &T,
) -> BuildOutcome
where
    T: Tokenizer + ?Sized,
{
    let mut outcome = BuildOutcome::default();
    let window_len = params.context_exchanges + 1;
    if chunk.exchanges.len() < window_len {
        return outcome;
    }

    for start in (0..=chunk.exchanges.len() - window_len).step_by(params.stride.max(1)) {
        outcome.windows += 1;
        let window = &chunk.exchanges[start..start + window_len];
        let (context, target) = window.split_at(params.context_exchanges);
        let target = &target[0];

        if context.is_empty() {
            outcome.dropped_empty_input += 1;
            continue;
        }
        if params.therapist_targets_only && !target.speaker.is_therapist() {
            outcome.dropped_non_therapist += 1;
            continue;
        }
        let words = word_count(&target.message);
        if words < params.min_exchange_length || words > params.max_exchange_length {
            outcome.dropped_length += 1;
            continue;
        }

        let input = format_context(context);
        let token_count = tokenizer.count_tokens(&input) + tokenizer.count_tokens(&target.message);
        if token_count > params.max_tokens {
            outcome.dropped_tokens += 1;
            continue;
        }

        outcome.examples.push(Example {
            instruction: params.instruction.clone(),
            input,
            output: target.message.clone(),
            provenance: Provenance {
                collection: collection.to_string(),
                session_id: chunk.parent_session_id.to_string(),
                chunk_index: chunk.chunk_index,
                window_start: chunk.start_offset + start,
            },
            token_count,
        });
    }

    outcome
}
