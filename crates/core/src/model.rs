//! Shared data model: exchanges, sessions, collections, chunks and examples.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::speaker::Role;

/// The source layout a document was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// One session in a markup document.
    MarkupSingle,
    /// A markup archive whose headings split it into volumes/sessions.
    MarkupSeries,
    /// A plain-text document holding a single session.
    PlaintextSingle,
    /// A plain-text document with `Session N` marker lines.
    PlaintextSeries,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::MarkupSingle => "markup_single",
            SourceFormat::MarkupSeries => "markup_series",
            SourceFormat::PlaintextSingle => "plaintext_single",
            SourceFormat::PlaintextSeries => "plaintext_series",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "markup_single" => Ok(SourceFormat::MarkupSingle),
            "markup_series" => Ok(SourceFormat::MarkupSeries),
            "plaintext_single" => Ok(SourceFormat::PlaintextSingle),
            "plaintext_series" => Ok(SourceFormat::PlaintextSeries),
            other => Err(format!("unknown source format '{}'", other)),
        }
    }
}

/// One speaker turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub speaker: Role,
    pub message: String,
    /// 0-based index within the owning session.
    pub position: usize,
}

/// Session metadata as persisted next to the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub title: String,
    pub source_format: SourceFormat,
    pub num_exchanges: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub therapists: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<String>,
}

/// An ordered, non-empty sequence of exchanges.
///
/// Positions are assigned on construction and are always contiguous from 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    metadata: SessionMetadata,
    exchanges: Vec<Exchange>,
}

/// Identity and descriptive fields of a session before its turns are known.
#[derive(Debug, Clone, Default)]
pub struct SessionHeader {
    pub session_id: String,
    pub title: String,
    pub therapists: Vec<String>,
    pub participants: Vec<String>,
}

impl Session {
    /// Build a session from `(speaker, message)` turns.
    ///
    /// Returns `None` when there are no turns; empty sessions are never kept.
    pub fn new(
        header: SessionHeader,
        source_format: SourceFormat,
        turns: Vec<(Role, String)>,
    ) -> Option<Self> {
        if turns.is_empty() {
            return None;
        }
        let exchanges: Vec<Exchange> = turns
            .into_iter()
            .enumerate()
            .map(|(position, (speaker, message))| Exchange {
                speaker,
                message,
                position,
            })
            .collect();
        Some(Self {
            metadata: SessionMetadata {
                session_id: header.session_id,
                title: header.title,
                source_format,
                num_exchanges: exchanges.len(),
                therapists: header.therapists,
                participants: header.participants,
            },
            exchanges,
        })
    }

    pub fn id(&self) -> &str {
        &self.metadata.session_id
    }

    pub fn title(&self) -> &str {
        &self.metadata.title
    }

    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}

/// All sessions that came from one source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub name: String,
    pub source_path: String,
    pub source_format: SourceFormat,
    pub sessions: Vec<Session>,
    /// Blocks that could not be attributed to a speaker and were dropped.
    pub dropped_blocks: usize,
}

impl Collection {
    pub fn total_exchanges(&self) -> usize {
        self.sessions.iter().map(Session::len).sum()
    }
}

/// A contiguous, possibly overlapping view into a session's exchanges.
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    pub parent_session_id: &'a str,
    pub chunk_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub exchanges: &'a [Exchange],
}

impl Chunk<'_> {
    pub fn len(&self) -> usize {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.end_offset == self.start_offset
    }
}

/// Where an example came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub collection: String,
    pub session_id: String,
    pub chunk_index: usize,
    /// Session-level position of the first exchange in the window.
    pub window_start: usize,
}

/// One instruction/input/output training record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    pub instruction: String,
    pub input: String,
    pub output: String,
    pub provenance: Provenance,
    pub token_count: usize,
}

/// The persisted shape of an example.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExampleRecord {
    pub instruction: String,
    pub input: String,
    pub output: String,
}

impl From<&Example> for ExampleRecord {
    fn from(example: &Example) -> Self {
        Self {
            instruction: example.instruction.clone(),
            input: example.input.clone(),
            output: example.output.clone(),
        }
    }
}

/// Dataset partition assigned per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Validation,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Validation, Split::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Validation => "validation",
            Split::Test => "test",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.jsonl", self.as_str())
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(id: &str) -> SessionHeader {
        SessionHeader {
            session_id: id.to_string(),
            title: "Test".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_session_positions_are_contiguous() {
        let session = Session::new(
            header("s1"),
            SourceFormat::PlaintextSingle,
            vec![
                (Role::Therapist, "Hello.".to_string()),
                (Role::Client, "Hi.".to_string()),
                (Role::Therapist, "How are you?".to_string()),
            ],
        )
        .unwrap();

        let positions: Vec<usize> = session.exchanges().iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert_eq!(session.metadata().num_exchanges, 3);
    }

    #[test]
    fn test_empty_session_is_rejected() {
        assert!(Session::new(header("empty"), SourceFormat::MarkupSingle, Vec::new()).is_none());
    }

    #[test]
    fn test_source_format_round_trips_through_str() {
        for format in [
            SourceFormat::MarkupSingle,
            SourceFormat::MarkupSeries,
            SourceFormat::PlaintextSingle,
            SourceFormat::PlaintextSeries,
        ] {
            assert_eq!(format.as_str().parse::<SourceFormat>().unwrap(), format);
        }
    }
}
