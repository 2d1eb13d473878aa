//! Format detection and per-format transcript parsers.
//!
//! Every parser produces the same [`ParsedDocument`]: sessions of resolved
//! exchanges plus the warnings raised on the way. Speaker resolution happens
//! inline while each exchange is built.

mod markup;
mod plaintext;

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ParseError, Warning};
use crate::helpers::preview;
use crate::model::{Session, SessionHeader, SourceFormat};
use crate::speaker::{AliasTable, Role, SpeakerResolver};

pub use markup::MarkupParser;
pub use plaintext::PlaintextParser;

static MARKUP_SIGNATURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<(html|body|p|div|span|h[1-6])\b[^>]*>").unwrap());

/// Text fragments that mark transcript chrome rather than dialogue.
const MARKUP_CHROME: &[&str] = &[
    "TRANSCRIPT OF AUDIO",
    "BEGIN TRANSCRIPT",
    "END TRANSCRIPT",
    "INTRODUCTION:",
    "Print page",
    "---",
    "Volume no.",
];
const PLAINTEXT_CHROME: &[&str] = &[
    "transcript of",
    "begin transcript",
    "end transcript",
    "skip to main",
    "you are here",
    "presented by",
];
const BEGIN_MARKER: &str = "BEGIN TRANSCRIPT";
const END_MARKER: &str = "END TRANSCRIPT";
const PREVIEW_BYTES: usize = 60;

/// Shared, read-only parsing inputs for one batch run.
#[derive(Debug, Clone)]
pub struct ParseContext {
    aliases: AliasTable,
    label_re: Regex,
}

impl ParseContext {
    /// `delimiter` separates a speaker label from its message, e.g. `:` in
    /// `CLIENT: I feel stuck.`
    pub fn new(aliases: AliasTable, delimiter: &str) -> Self {
        let pattern = format!(
            r"^(?P<label>[A-Z][A-Z0-9\s.\-']*?)\s*{}\s*(?P<message>.*)$",
            regex::escape(delimiter)
        );
        Self {
            aliases,
            // The pattern is built from a fixed template around an escaped literal.
            label_re: Regex::new(&pattern).unwrap(),
        }
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Split `line` into `(label, message)` if it opens a speaker turn.
    pub(crate) fn split_label<'t>(&self, line: &'t str, max_label_len: usize) -> Option<(&'t str, &'t str)> {
        let caps = self.label_re.captures(line)?;
        let label = caps.name("label")?.as_str().trim();
        if label.is_empty() || label.len() >= max_label_len {
            return None;
        }
        Some((label, caps.name("message").map_or("", |m| m.as_str().trim())))
    }
}

impl Default for ParseContext {
    fn default() -> Self {
        Self::new(AliasTable::new(), ":")
    }
}

/// Everything extracted from one source document.
#[derive(Debug)]
pub struct ParsedDocument {
    pub source_format: SourceFormat,
    pub sessions: Vec<Session>,
    /// Session boundaries found, including ones that turned out empty.
    pub detected_boundaries: usize,
    pub dropped_blocks: usize,
    pub warnings: Vec<Warning>,
}

impl ParsedDocument {
    pub fn empty_sessions(&self) -> usize {
        self.detected_boundaries.saturating_sub(self.sessions.len())
    }
}

/// One parser variant per source layout.
pub trait DocumentParser {
    fn parse(&self, path: &Path, text: &str, ctx: &ParseContext) -> Result<ParsedDocument, ParseError>;
}

/// Pick a format from content signatures.
///
/// Markup tags win over everything; otherwise two or more `Session N` marker
/// lines mean a multi-session plain-text file.
pub fn detect_format(text: &str) -> SourceFormat {
    if MARKUP_SIGNATURE_RE.is_match(text) {
        if markup::count_boundaries(text) >= 2 {
            SourceFormat::MarkupSeries
        } else {
            SourceFormat::MarkupSingle
        }
    } else if plaintext::count_markers(text) >= 2 {
        SourceFormat::PlaintextSeries
    } else {
        SourceFormat::PlaintextSingle
    }
}

pub fn parser_for(format: SourceFormat) -> Box<dyn DocumentParser + Send + Sync> {
    match format {
        SourceFormat::MarkupSingle => Box::new(MarkupParser::single()),
        SourceFormat::MarkupSeries => Box::new(MarkupParser::series()),
        SourceFormat::PlaintextSingle => Box::new(PlaintextParser::single()),
        SourceFormat::PlaintextSeries => Box::new(PlaintextParser::series()),
    }
}

/// Parse a document with an explicit format, or a detected one when `hint` is `None`.
pub fn parse_document(
    path: &Path,
    text: &str,
    hint: Option<SourceFormat>,
    ctx: &ParseContext,
) -> Result<ParsedDocument, ParseError> {
    let format = hint.unwrap_or_else(|| detect_format(text));
    tracing::debug!(path = %path.display(), %format, "parsing document");
    parser_for(format).parse(path, text, ctx)
}

pub(crate) fn is_markup_chrome(text: &str) -> bool {
    MARKUP_CHROME.iter().any(|marker| text.contains(marker))
}

pub(crate) fn is_plaintext_chrome(text: &str) -> bool {
    let lower = text.to_lowercase();
    PLAINTEXT_CHROME.iter().any(|marker| lower.contains(marker))
}

pub(crate) fn is_end_marker(text: &str) -> bool {
    text.contains(END_MARKER)
}

/// Upper-case `BEGIN TRANSCRIPT` / `END TRANSCRIPT` lines, which close any open turn.
pub(crate) fn is_transcript_delimiter(text: &str) -> bool {
    text.contains(BEGIN_MARKER) || is_end_marker(text)
}

/// Stem of the source path, used as the id of single-session documents.
pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".to_string())
}

pub(crate) fn series_session_id(boundary: usize) -> String {
    format!("session_{:02}", boundary)
}

/// Accumulates resolved turns for one session.
pub(crate) struct TurnCollector {
    turns: Vec<(Role, String)>,
    therapists: Vec<String>,
    participants: Vec<String>,
}

impl TurnCollector {
    pub(crate) fn new() -> Self {
        Self {
            turns: Vec::new(),
            therapists: Vec::new(),
            participants: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, resolver: &mut SpeakerResolver<'_>, label: &str, message: String) {
        let role = resolver.resolve(label);
        let label = crate::helpers::collapse_whitespace(label);
        if role.is_therapist() && !self.therapists.contains(&label) {
            self.therapists.push(label.clone());
        }
        if !self.participants.contains(&label) {
            self.participants.push(label);
        }
        self.turns.push((role, message));
    }

    pub(crate) fn len(&self) -> usize {
        self.turns.len()
    }

    pub(crate) fn finish(self, session_id: String, title: String, format: SourceFormat) -> Option<Session> {
        Session::new(
            SessionHeader {
                session_id,
                title,
                therapists: self.therapists,
                participants: self.participants,
            },
            format,
            self.turns,
        )
    }
}

/// Collects dropped-content warnings for one document.
#[derive(Default)]
pub(crate) struct WarningSink {
    pub(crate) warnings: Vec<Warning>,
    pub(crate) dropped_blocks: usize,
}

impl WarningSink {
    pub(crate) fn unattributed(&mut self, path: &Path, offset: usize, text: &str) {
        let warning = Warning::UnattributedBlock {
            offset,
            preview: preview(text, PREVIEW_BYTES),
        };
        tracing::warn!(path = %path.display(), "{}", warning);
        self.dropped_blocks += 1;
        self.warnings.push(warning);
    }

    /// Turns found before the first boundary belong to no session.
    pub(crate) fn orphaned_turns(&mut self, path: &Path, offset: usize, count: usize) {
        if count == 0 {
            return;
        }
        self.unattributed(
            path,
            offset,
            &format!("{} exchange(s) before the first session boundary", count),
        );
        self.dropped_blocks += count - 1;
    }

    pub(crate) fn empty_session(&mut self, path: &Path, boundary: usize, title: &str) {
        let warning = Warning::EmptySession {
            boundary,
            title: title.to_string(),
        };
        tracing::warn!(path = %path.display(), "{}", warning);
        self.warnings.push(warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(
            detect_format("<html><body><p>THERAPIST: Hi.</p></body></html>"),
            SourceFormat::MarkupSingle
        );
        assert_eq!(
            detect_format("<h2>Volume 1</h2><p>A: x</p><h2>Volume 2</h2><p>B: y</p>"),
            SourceFormat::MarkupSeries
        );
        assert_eq!(
            detect_format("THERAPIST: Hello.\nCLIENT: Hi."),
            SourceFormat::PlaintextSingle
        );
        assert_eq!(
            detect_format("Session 1: Intake\nT: a\nSession 2: Follow-up\nT: b\n"),
            SourceFormat::PlaintextSeries
        );
    }

    #[test]
    fn test_split_label() {
        let ctx = ParseContext::default();
        assert_eq!(ctx.split_label("CLIENT: I feel stuck.", 30), Some(("CLIENT", "I feel stuck.")));
        assert_eq!(ctx.split_label("DR. FELDER:Go on", 30), Some(("DR. FELDER", "Go on")));
        assert_eq!(ctx.split_label("T: yes", 30), Some(("T", "yes")));
        assert_eq!(ctx.split_label("Note: lowercase labels are prose", 30), None);
        assert_eq!(ctx.split_label("AN EXTREMELY LONG HEADER THAT IS NOT A NAME: x", 30), None);
    }

    #[test]
    fn test_custom_delimiter() {
        let ctx = ParseContext::new(AliasTable::new(), " -");
        assert_eq!(ctx.split_label("CLIENT - hello", 30), Some(("CLIENT", "hello")));
        assert_eq!(ctx.split_label("CLIENT: hello", 30), None);
    }
}
