//! Dataset assembly: session-level split assignment and manifests.
//!
//! Splits are assigned per session, never per example, so overlapping windows
//! from one conversation cannot leak across train/validation/test.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Serialize;

use crate::builder::{build_examples, BuildOutcome};
use crate::chunker::chunk_session;
use crate::config::{PipelineConfig, SplitConfig};
use crate::error::ConfigError;
use crate::model::{Collection, Example, Session, Split};
use crate::report::ExampleStats;
use crate::Tokenizer;

/// Assign every key to a split with a seeded shuffle.
///
/// Keys are sorted before shuffling, so the result depends only on the key
/// set and the seed. Validation and test receive `round(n * ratio)` keys each;
/// train receives the rest.
pub fn assign_splits<K>(keys: &[K], config: &SplitConfig) -> BTreeMap<K, Split>
where
    K: Ord + Clone,
{
    let mut ordered: Vec<K> = keys.to_vec();
    ordered.sort();
    ordered.dedup();

    let mut rng = StdRng::seed_from_u64(config.seed);
    ordered.shuffle(&mut rng);

    let n = ordered.len();
    let validation = ((n as f64 * config.validation_ratio).round() as usize).min(n);
    let test = ((n as f64 * config.test_ratio).round() as usize).min(n - validation);
    let train = n - validation - test;

    ordered
        .into_iter()
        .enumerate()
        .map(|(i, key)| {
            let split = if i < train {
                Split::Train
            } else if i < train + validation {
                Split::Validation
            } else {
                Split::Test
            };
            (key, split)
        })
        .collect()
}

/// Key identifying a session across collections.
pub fn session_key(collection: &str, session_id: &str) -> String {
    format!("{}/{}", collection, session_id)
}

/// One row per session in the dataset manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRow {
    pub collection: String,
    pub session_id: String,
    pub title: String,
    pub num_exchanges: usize,
    pub split: Split,
    pub num_chunks: usize,
    pub num_examples: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SplitSummary {
    pub total_sessions: usize,
    pub total_exchanges: usize,
    pub total_examples: usize,
    pub total_tokens: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    pub total_sessions: usize,
    pub total_exchanges: usize,
    pub total_examples: usize,
    pub splits: BTreeMap<Split, SplitSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetManifest {
    pub config: PipelineConfig,
    pub summary: DatasetSummary,
    pub example_stats: ExampleStats,
    pub sessions: Vec<SessionRow>,
}

/// Examples partitioned by split, with the manifest describing them.
#[derive(Debug, Clone)]
pub struct Dataset {
    splits: BTreeMap<Split, Vec<Example>>,
    pub manifest: DatasetManifest,
}

impl Dataset {
    pub fn examples(&self, split: Split) -> &[Example] {
        self.splits.get(&split).map_or(&[], Vec::as_slice)
    }

    pub fn summary(&self) -> &DatasetSummary {
        &self.manifest.summary
    }

    pub fn total_examples(&self) -> usize {
        self.splits.values().map(Vec::len).sum()
    }
}

struct SessionOutput {
    row: SessionRow,
    outcome: BuildOutcome,
}

fn process_session<T>(
    collection: &str,
    session: &Session,
    split: Split,
    config: &PipelineConfig,
    tokenizer: &T,
) -> Result<SessionOutput, ConfigError>
where
    T: Tokenizer + ?Sized,
{
    let chunk_params = config.chunk_params()?;
    let window_params = config.window_params()?;
    let chunks = chunk_session(session, &chunk_params);

    let mut outcome = BuildOutcome::default();
    for chunk in &chunks {
        outcome.merge(build_examples(chunk, collection, &window_params, tokenizer));
    }
    tracing::debug!(
        session = %session_key(collection, session.id()),
        chunks = chunks.len(),
        examples = outcome.examples.len(),
        "built examples"
    );

    Ok(SessionOutput {
        row: SessionRow {
            collection: collection.to_string(),
            session_id: session.id().to_string(),
            title: session.title().to_string(),
            num_exchanges: session.len(),
            split,
            num_chunks: chunks.len(),
            num_examples: outcome.examples.len(),
        },
        outcome,
    })
}

/// Chunk every session, build its examples and partition them by session split.
///
/// Sessions are processed in parallel; output order is by session key, so two
/// runs over the same collections and config produce identical datasets.
pub fn assemble<T>(collections: &[Collection], config: &PipelineConfig, tokenizer: &T) -> Result<Dataset, ConfigError>
where
    T: Tokenizer + Sync + ?Sized,
{
    config.validate()?;

    let mut sessions: Vec<(String, &str, &Session)> = collections
        .iter()
        .flat_map(|c| {
            c.sessions
                .iter()
                .map(move |s| (session_key(&c.name, s.id()), c.name.as_str(), s))
        })
        .collect();
    sessions.sort_by(|a, b| a.0.cmp(&b.0));

    let keys: Vec<String> = sessions.iter().map(|(key, _, _)| key.clone()).collect();
    let assignment = assign_splits(&keys, &config.split);

    let outputs: Vec<SessionOutput> = sessions
        .par_iter()
        .map(|(key, collection, session)| {
            let split = assignment.get(key).copied().unwrap_or(Split::Train);
            process_session(collection, session, split, config, tokenizer)
        })
        .collect::<Result<_, _>>()?;

    let mut splits: BTreeMap<Split, Vec<Example>> = Split::ALL.iter().map(|s| (*s, Vec::new())).collect();
    let mut summary = DatasetSummary {
        splits: Split::ALL.iter().map(|s| (*s, SplitSummary::default())).collect(),
        ..Default::default()
    };
    let mut stats = ExampleStats::default();
    let mut rows = Vec::with_capacity(outputs.len());

    for SessionOutput { row, outcome } in outputs {
        stats.record(&outcome);
        summary.total_sessions += 1;
        summary.total_exchanges += row.num_exchanges;
        summary.total_examples += outcome.examples.len();

        let split_summary = summary.splits.entry(row.split).or_default();
        split_summary.total_sessions += 1;
        split_summary.total_exchanges += row.num_exchanges;
        split_summary.total_examples += outcome.examples.len();
        split_summary.total_tokens += outcome.examples.iter().map(|e| e.token_count).sum::<usize>();

        splits.entry(row.split).or_default().extend(outcome.examples);
        rows.push(row);
    }

    tracing::info!(
        sessions = summary.total_sessions,
        examples = summary.total_examples,
        dropped = stats.dropped(),
        "assembled dataset"
    );

    Ok(Dataset {
        splits,
        manifest: DatasetManifest {
            config: config.clone(),
            summary,
            example_stats: stats,
            sessions: rows,
        },
    })
}
