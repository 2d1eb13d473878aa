//! Core extraction logic for therapy-session transcripts.
//!
//! This crate turns raw transcript documents (markup pages or plain text, one
//! or many sessions per file) into normalized sessions of speaker-attributed
//! exchanges, and then into a session-level split instruction dataset
//! suitable for fine-tuning language models.

/// Trait for tokenization operations.
///
/// Implementors provide token counting for the example length filter. The
/// default [`WhitespaceTokenizer`] is an approximation; exact counts need the
/// target model's tokenizer.
pub trait Tokenizer {
    /// Count the number of tokens in the given text.
    fn count_tokens(&self, text: &str) -> usize;
}

// Blanket implementation for references to Tokenizers
impl<T: Tokenizer + ?Sized> Tokenizer for &T {
    fn count_tokens(&self, text: &str) -> usize {
        (*self).count_tokens(text)
    }
}

/// Counts whitespace-separated words.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

pub mod assembler;
pub mod builder;
pub mod chunker;
pub mod config;
pub mod error;
mod helpers;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod report;
pub mod speaker;
pub mod storage;

pub use assembler::{assemble, assign_splits, Dataset, DatasetManifest, DatasetSummary, SessionRow, SplitSummary};
pub use builder::{build_examples, BuildOutcome};
pub use chunker::chunk_session;
pub use config::{ChunkParams, PipelineConfig, SplitConfig, WindowParams};
pub use error::{ConfigError, ParseError, PipelineError, StorageError, Warning};
pub use helpers::{normalize_message, safe_file_stem};
pub use model::{Chunk, Collection, Example, ExampleRecord, Exchange, Session, SessionMetadata, SourceFormat, Split};
pub use parser::{detect_format, parse_document, ParseContext, ParsedDocument};
pub use pipeline::{build_dataset, discover_documents, extract_all, persist_collections, Extraction};
pub use report::{DocumentFailure, ExampleStats, RunReport};
pub use speaker::{AliasRole, AliasTable, Role, SpeakerResolver};
