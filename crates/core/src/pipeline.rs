//! Batch orchestration: discover source documents, extract collections in
//! parallel, and build the split dataset.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use walkdir::WalkDir;

use crate::assembler::{assemble, Dataset};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::helpers::safe_file_stem;
use crate::model::Collection;
use crate::parser::{parse_document, ParseContext, ParsedDocument};
use crate::report::{DocumentFailure, RunReport};
use crate::storage;
use crate::Tokenizer;

/// Subdirectory of `output_dir` holding per-collection session files.
pub const COLLECTIONS_DIR: &str = "collections";
/// Subdirectory of `output_dir` holding split files and the manifest.
pub const DATASET_DIR: &str = "dataset";
pub const RUN_REPORT_FILE: &str = "run_report.json";

const SOURCE_EXTENSIONS: &[&str] = &["html", "htm", "txt"];
const MAX_COLLECTION_NAME: usize = 100;

/// Collections extracted from a batch of documents.
#[derive(Debug)]
pub struct Extraction {
    pub collections: Vec<Collection>,
    pub report: RunReport,
}

/// Discover all transcript documents under a directory, sorted by path.
pub fn discover_documents(root: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();
    paths
}

enum DocumentOutcome {
    Parsed(PathBuf, ParsedDocument),
    Failed(DocumentFailure),
}

fn extract_document(path: &Path, ctx: &ParseContext) -> DocumentOutcome {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            return DocumentOutcome::Failed(DocumentFailure {
                path: path.display().to_string(),
                offset: None,
                reason: e.to_string(),
            })
        }
    };
    let text = String::from_utf8_lossy(&bytes);
    match parse_document(path, &text, None, ctx) {
        Ok(doc) => DocumentOutcome::Parsed(path.to_path_buf(), doc),
        Err(e) => DocumentOutcome::Failed(e.into()),
    }
}

/// Unique, filesystem-safe collection name derived from the document's stem.
fn collection_name(path: &Path, taken: &mut HashSet<String>) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut base = safe_file_stem(&stem, MAX_COLLECTION_NAME);
    if base.is_empty() {
        base = "collection".to_string();
    }
    let mut name = base.clone();
    let mut suffix = 2;
    while !taken.insert(name.clone()) {
        name = format!("{}_{}", base, suffix);
        suffix += 1;
    }
    name
}

/// Parse every document under `config.input_data_dir`.
///
/// Documents are parsed in parallel. A document that fails to read or parse
/// is recorded in the report and never aborts its siblings.
pub fn extract_all(config: &PipelineConfig) -> Result<Extraction> {
    config.validate()?;
    let root = &config.input_data_dir;
    let documents = discover_documents(root);
    if documents.is_empty() {
        return Err(PipelineError::NoDocuments(root.clone()));
    }

    let ctx = ParseContext::new(config.speakers.aliases.clone(), &config.plaintext_delimiter);
    let total = documents.len();
    let processed = AtomicUsize::new(0);
    tracing::info!(documents = total, root = %root.display(), "extracting transcripts");

    let outcomes: Vec<DocumentOutcome> = documents
        .par_iter()
        .map(|path| {
            let outcome = extract_document(path, &ctx);
            let count = processed.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 0 || count == total {
                tracing::info!("processed {}/{} documents", count, total);
            }
            outcome
        })
        .collect();

    let mut report = RunReport::default();
    let mut collections = Vec::new();
    let mut taken = HashSet::new();
    for outcome in outcomes {
        match outcome {
            DocumentOutcome::Parsed(path, doc) => {
                report.record_document(&doc);
                if doc.sessions.is_empty() {
                    continue;
                }
                collections.push(Collection {
                    name: collection_name(&path, &mut taken),
                    source_path: path.display().to_string(),
                    source_format: doc.source_format,
                    sessions: doc.sessions,
                    dropped_blocks: doc.dropped_blocks,
                });
            }
            DocumentOutcome::Failed(failure) => {
                tracing::warn!(
                    path = %failure.path,
                    offset = ?failure.offset,
                    "document failed: {}",
                    failure.reason
                );
                report.record_failure(failure);
            }
        }
    }

    tracing::info!(
        collections = collections.len(),
        sessions = report.sessions_extracted,
        failed = report.documents_failed,
        "extraction finished"
    );
    Ok(Extraction { collections, report })
}

/// Write each collection and the master catalog under `dir`.
pub fn persist_collections(dir: &Path, collections: &[Collection]) -> Result<PathBuf> {
    for collection in collections {
        storage::write_collection(dir, collection)?;
    }
    Ok(storage::write_master_catalog(dir, collections)?)
}

/// Assemble the dataset from extracted collections and write it to `dir`.
pub fn build_dataset<T>(
    collections: &[Collection],
    config: &PipelineConfig,
    tokenizer: &T,
    dir: &Path,
) -> Result<Dataset>
where
    T: Tokenizer + Sync + ?Sized,
{
    let dataset = assemble(collections, config, tokenizer)?;
    storage::write_dataset(dir, &dataset)?;
    tracing::info!(dir = %dir.display(), examples = dataset.total_examples(), "wrote dataset");
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Split;
    use crate::WhitespaceTokenizer;
    use tempfile::TempDir;

    const SINGLE: &str = "Coping With Loss After Divorce\n\n\
THERAPIST: What brings you in today?\n\
CLIENT: My divorce was finalised last month.\n\
THERAPIST: How have you been sleeping?\n\
CLIENT: Badly, most nights.\n";

    const SERIES_HTML: &str = r#"<html><body>
<h2>Volume 1</h2>
<p>DR. FELDER: Hello again.</p>
<p>LORETTA: Hi.</p>
<p>DR. FELDER: Where shall we start?</p>
<h2>Volume 2</h2>
<p>DR. FELDER: Last time you mentioned work.</p>
<p>LORETTA: It got worse.</p>
<p>DR. FELDER: Say more.</p>
</body></html>"#;

    fn write_inputs(dir: &Path) {
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("loss.txt"), SINGLE).unwrap();
        std::fs::write(dir.join("nested/felder.html"), SERIES_HTML).unwrap();
        std::fs::write(dir.join("broken.html"), "<body><p>THERAPIST: unclosed</body>").unwrap();
        std::fs::write(dir.join("notes.md"), "ignored").unwrap();
    }

    fn config_for(input: &Path) -> PipelineConfig {
        PipelineConfig {
            input_data_dir: input.to_path_buf(),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_discover_documents() {
        let temp = TempDir::new().unwrap();
        write_inputs(temp.path());
        let found = discover_documents(temp.path());
        assert_eq!(found.len(), 3);
        assert!(found.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_extract_all_isolates_failures() {
        let temp = TempDir::new().unwrap();
        write_inputs(temp.path());
        let extraction = extract_all(&config_for(temp.path())).unwrap();

        let report = &extraction.report;
        assert_eq!(report.documents_processed, 2);
        assert_eq!(report.documents_failed, 1);
        assert!(report.failures[0].path.ends_with("broken.html"));
        assert!(report.failures[0].offset.is_some());
        assert_eq!(report.sessions_extracted, 3);

        let names: Vec<&str> = extraction.collections.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["loss", "felder"]);
        assert_eq!(extraction.collections[1].sessions[1].id(), "session_02");
    }

    #[test]
    fn test_empty_input_dir() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            extract_all(&config_for(temp.path())),
            Err(PipelineError::NoDocuments(_))
        ));
    }

    #[test]
    fn test_invalid_config_fails_before_reading() {
        let config = PipelineConfig {
            max_session_exchanges: 0,
            input_data_dir: PathBuf::from("/does/not/exist"),
            ..PipelineConfig::default()
        };
        assert!(matches!(extract_all(&config), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_collection_names_are_unique() {
        let mut taken = HashSet::new();
        assert_eq!(collection_name(Path::new("a/session.txt"), &mut taken), "session");
        assert_eq!(collection_name(Path::new("b/session.html"), &mut taken), "session_2");
    }

    #[test]
    fn test_end_to_end() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("raw");
        write_inputs(&input);
        let config = config_for(&input);

        let extraction = extract_all(&config).unwrap();
        let collections_dir = temp.path().join(COLLECTIONS_DIR);
        persist_collections(&collections_dir, &extraction.collections).unwrap();

        let reloaded = storage::load_collections(&collections_dir).unwrap();
        assert_eq!(reloaded.len(), 2);

        let dataset_dir = temp.path().join(DATASET_DIR);
        let dataset = build_dataset(&reloaded, &config, &WhitespaceTokenizer, &dataset_dir).unwrap();
        assert_eq!(dataset.summary().total_sessions, 3);

        let lines: usize = Split::ALL
            .iter()
            .map(|s| {
                std::fs::read_to_string(dataset_dir.join(s.file_name()))
                    .unwrap()
                    .lines()
                    .count()
            })
            .sum();
        assert_eq!(lines, dataset.total_examples());
        assert!(dataset_dir.join(storage::DATASET_MANIFEST_FILE).exists());
    }
}
