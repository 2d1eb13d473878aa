//! On-disk layout for extracted collections and assembled datasets.
//!
//! ```text
//! <collections>/MASTER_CATALOG.json
//! <collections>/<collection>/_sessions_summary.json
//! <collections>/<collection>/<session_id>.json
//! <collections>/<collection>/<session_id>.jsonl
//! <dataset>/{train,validation,test}.jsonl
//! <dataset>/dataset_manifest.json
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::assembler::Dataset;
use crate::error::StorageError;
use crate::model::{Collection, ExampleRecord, Session, SessionHeader, SessionMetadata, Split};
use crate::speaker::Role;

pub const SESSIONS_SUMMARY_FILE: &str = "_sessions_summary.json";
pub const MASTER_CATALOG_FILE: &str = "MASTER_CATALOG.json";
pub const DATASET_MANIFEST_FILE: &str = "dataset_manifest.json";

#[derive(Serialize)]
struct TurnRef<'a> {
    speaker: &'a Role,
    message: &'a str,
}

#[derive(Serialize)]
struct SessionFileRef<'a> {
    metadata: &'a SessionMetadata,
    conversations: Vec<TurnRef<'a>>,
}

#[derive(Deserialize)]
struct Turn {
    speaker: Role,
    message: String,
}

#[derive(Deserialize)]
struct SessionFile {
    metadata: SessionMetadata,
    conversations: Vec<Turn>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    pub title: String,
    pub exchanges: usize,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub source_path: String,
    pub source_format: String,
    pub sessions: usize,
    pub exchanges: usize,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MasterCatalog {
    pub total_collections: usize,
    pub total_sessions: usize,
    pub total_exchanges: usize,
    pub collections: Vec<CatalogEntry>,
}

fn create_dir(dir: &Path) -> Result<(), StorageError> {
    std::fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))
}

fn write_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| StorageError::json(path, e))?;
    std::fs::write(path, json).map_err(|e| StorageError::io(path, e))
}

fn write_lines<T, I>(path: &Path, records: I) -> Result<(), StorageError>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let file = File::create(path).map_err(|e| StorageError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        let line = serde_json::to_string(&record).map_err(|e| StorageError::json(path, e))?;
        writeln!(writer, "{}", line).map_err(|e| StorageError::io(path, e))?;
    }
    writer.flush().map_err(|e| StorageError::io(path, e))
}

fn turns(session: &Session) -> Vec<TurnRef<'_>> {
    session
        .exchanges()
        .iter()
        .map(|e| TurnRef {
            speaker: &e.speaker,
            message: &e.message,
        })
        .collect()
}

/// Persist every session of a collection plus its summary.
///
/// Returns the collection directory.
pub fn write_collection(root: &Path, collection: &Collection) -> Result<PathBuf, StorageError> {
    let dir = root.join(&collection.name);
    create_dir(&dir)?;

    for session in &collection.sessions {
        let json_path = dir.join(format!("{}.json", session.id()));
        write_pretty(
            &json_path,
            &SessionFileRef {
                metadata: session.metadata(),
                conversations: turns(session),
            },
        )?;
        write_lines(&dir.join(format!("{}.jsonl", session.id())), turns(session))?;
    }

    let summary: Vec<SessionSummary> = collection
        .sessions
        .iter()
        .map(|s| SessionSummary {
            session_id: s.id().to_string(),
            title: s.title().to_string(),
            exchanges: s.len(),
        })
        .collect();
    write_pretty(&dir.join(SESSIONS_SUMMARY_FILE), &summary)?;

    tracing::debug!(
        collection = %collection.name,
        sessions = collection.sessions.len(),
        "wrote collection"
    );
    Ok(dir)
}

/// Read one `<session_id>.json` file back into a [`Session`].
///
/// Positions are recomputed from the order of `conversations`.
pub fn read_session(path: &Path) -> Result<Session, StorageError> {
    let contents = std::fs::read_to_string(path).map_err(|e| StorageError::io(path, e))?;
    let file: SessionFile = serde_json::from_str(&contents).map_err(|e| StorageError::json(path, e))?;

    if file.metadata.num_exchanges != file.conversations.len() {
        return Err(StorageError::Malformed {
            path: path.to_path_buf(),
            reason: format!(
                "metadata lists {} exchanges but {} are present",
                file.metadata.num_exchanges,
                file.conversations.len()
            ),
        });
    }

    let SessionMetadata {
        session_id,
        title,
        source_format,
        therapists,
        participants,
        ..
    } = file.metadata;
    let turns = file
        .conversations
        .into_iter()
        .map(|t| (t.speaker, t.message))
        .collect();
    Session::new(
        SessionHeader {
            session_id,
            title,
            therapists,
            participants,
        },
        source_format,
        turns,
    )
    .ok_or_else(|| StorageError::Malformed {
        path: path.to_path_buf(),
        reason: "session has no exchanges".to_string(),
    })
}

fn is_session_file(path: &Path) -> bool {
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    is_json && !name.starts_with('_') && name != MASTER_CATALOG_FILE
}

/// Load every collection directory under `root`, sorted by name.
pub fn load_collections(root: &Path) -> Result<Vec<Collection>, StorageError> {
    let mut by_name: BTreeMap<String, (PathBuf, Vec<Session>)> = BTreeMap::new();

    for entry in WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            StorageError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() || !is_session_file(entry.path()) {
            continue;
        }
        let Some(dir) = entry.path().parent() else { continue };
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let session = read_session(entry.path())?;
        by_name
            .entry(name)
            .or_insert_with(|| (dir.to_path_buf(), Vec::new()))
            .1
            .push(session);
    }

    let collections: Vec<Collection> = by_name
        .into_iter()
        .filter_map(|(name, (dir, sessions))| {
            let source_format = sessions.first()?.metadata().source_format;
            Some(Collection {
                name,
                source_path: dir.display().to_string(),
                source_format,
                sessions,
                dropped_blocks: 0,
            })
        })
        .collect();

    tracing::info!(
        collections = collections.len(),
        root = %root.display(),
        "loaded persisted collections"
    );
    Ok(collections)
}

/// Write `MASTER_CATALOG.json` aggregating every collection.
pub fn write_master_catalog(root: &Path, collections: &[Collection]) -> Result<PathBuf, StorageError> {
    create_dir(root)?;
    let entries: Vec<CatalogEntry> = collections
        .iter()
        .map(|c| CatalogEntry {
            name: c.name.clone(),
            source_path: c.source_path.clone(),
            source_format: c.source_format.to_string(),
            sessions: c.sessions.len(),
            exchanges: c.total_exchanges(),
        })
        .collect();
    let catalog = MasterCatalog {
        total_collections: entries.len(),
        total_sessions: entries.iter().map(|e| e.sessions).sum(),
        total_exchanges: entries.iter().map(|e| e.exchanges).sum(),
        collections: entries,
    };
    let path = root.join(MASTER_CATALOG_FILE);
    write_pretty(&path, &catalog)?;
    Ok(path)
}

/// Write one JSONL file per split and the dataset manifest.
pub fn write_dataset(dir: &Path, dataset: &Dataset) -> Result<(), StorageError> {
    create_dir(dir)?;
    for split in Split::ALL {
        let path = dir.join(split.file_name());
        write_lines(&path, dataset.examples(split).iter().map(ExampleRecord::from))?;
    }
    write_pretty(&dir.join(DATASET_MANIFEST_FILE), &dataset.manifest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceFormat;
    use tempfile::TempDir;

    fn session(id: &str, turns: &[(Role, &str)]) -> Session {
        Session::new(
            SessionHeader {
                session_id: id.to_string(),
                title: format!("Title {}", id),
                therapists: vec!["DR. FELDER".to_string()],
                participants: vec!["DR. FELDER".to_string(), "LORETTA".to_string()],
            },
            SourceFormat::MarkupSeries,
            turns.iter().map(|(r, m)| (r.clone(), m.to_string())).collect(),
        )
        .unwrap()
    }

    fn collection() -> Collection {
        Collection {
            name: "Feldman_Series".to_string(),
            source_path: "raw/feldman.html".to_string(),
            source_format: SourceFormat::MarkupSeries,
            sessions: vec![
                session(
                    "session_01",
                    &[
                        (Role::Therapist, "How are you?"),
                        (Role::Unresolved("LORETTA".to_string()), "Tired."),
                    ],
                ),
                session("session_03", &[(Role::Client, "Better today.")]),
            ],
            dropped_blocks: 2,
        }
    }

    #[test]
    fn test_write_collection_layout() {
        let temp = TempDir::new().unwrap();
        let dir = write_collection(temp.path(), &collection()).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("session_01.json")).unwrap()).unwrap();
        assert_eq!(json["metadata"]["session_id"], "session_01");
        assert_eq!(json["metadata"]["source_format"], "markup_series");
        assert_eq!(json["metadata"]["num_exchanges"], 2);
        assert_eq!(json["conversations"][0]["speaker"], "therapist");
        assert_eq!(json["conversations"][1]["speaker"], "LORETTA");

        let jsonl = std::fs::read_to_string(dir.join("session_01.jsonl")).unwrap();
        let lines: Vec<&str> = jsonl.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"speaker":"therapist","message":"How are you?"}"#);

        let summary: Vec<SessionSummary> =
            serde_json::from_str(&std::fs::read_to_string(dir.join(SESSIONS_SUMMARY_FILE)).unwrap()).unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[1].session_id, "session_03");
        assert_eq!(summary[1].exchanges, 1);
    }

    #[test]
    fn test_collection_round_trip() {
        let temp = TempDir::new().unwrap();
        let original = collection();
        write_collection(temp.path(), &original).unwrap();
        write_master_catalog(temp.path(), std::slice::from_ref(&original)).unwrap();

        let loaded = load_collections(temp.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, original.name);
        assert_eq!(loaded[0].sessions, original.sessions);
    }

    #[test]
    fn test_read_session_rejects_count_mismatch() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.json");
        std::fs::write(
            &path,
            r#"{"metadata":{"session_id":"x","title":"t","source_format":"plaintext_single","num_exchanges":3},
               "conversations":[{"speaker":"client","message":"hi"}]}"#,
        )
        .unwrap();
        assert!(matches!(read_session(&path), Err(StorageError::Malformed { .. })));
    }

    #[test]
    fn test_master_catalog_totals() {
        let temp = TempDir::new().unwrap();
        let path = write_master_catalog(temp.path(), &[collection()]).unwrap();
        let catalog: MasterCatalog = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(catalog.total_collections, 1);
        assert_eq!(catalog.total_sessions, 2);
        assert_eq!(catalog.total_exchanges, 3);
        assert_eq!(catalog.collections[0].source_format, "markup_series");
    }
}
