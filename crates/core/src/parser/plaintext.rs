//! Plain-text transcripts: `LABEL: message` lines, optionally split into
//! sessions by `Session N` marker lines.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::{
    file_stem, is_plaintext_chrome, is_transcript_delimiter, series_session_id, DocumentParser, ParseContext, ParsedDocument,
    TurnCollector, WarningSink,
};
use crate::error::ParseError;
use crate::helpers::{collapse_whitespace, decode_entities};
use crate::model::{Session, SourceFormat};
use crate::speaker::SpeakerResolver;

static SESSION_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*session\s+\d+\s*(?:[:.\-–—]\s*.*)?$").unwrap());

const MAX_LABEL_LEN: usize = 30;
const TITLE_SCAN_LINES: usize = 20;
const TITLE_SKIP: &[&str] = &["search", "menu", "skip to"];
const UNKNOWN_TITLE: &str = "Unknown Session";

pub(crate) fn count_markers(text: &str) -> usize {
    text.lines().filter(|line| SESSION_MARKER_RE.is_match(line)).count()
}

#[derive(Debug, Clone, Copy)]
struct Line<'t> {
    offset: usize,
    text: &'t str,
}

fn split_lines(text: &str) -> Vec<Line<'_>> {
    let mut offset = 0;
    text.split_inclusive('\n')
        .map(|raw| {
            let line = Line {
                offset,
                text: raw.trim(),
            };
            offset += raw.len();
            line
        })
        .collect()
}

fn normalize_plain(text: &str) -> String {
    collapse_whitespace(&decode_entities(text))
}

/// Plain-text parser; `series` selects `Session N` boundary detection.
#[derive(Debug, Clone, Copy)]
pub struct PlaintextParser {
    series: bool,
}

impl PlaintextParser {
    pub fn single() -> Self {
        Self { series: false }
    }

    pub fn series() -> Self {
        Self { series: true }
    }

    fn parse_single(&self, path: &Path, text: &str, ctx: &ParseContext) -> ParsedDocument {
        let lines = split_lines(text);
        let mut resolver = SpeakerResolver::new(ctx.aliases());
        let mut sink = WarningSink::default();
        let mut collector = TurnCollector::new();

        let title_line = find_title(&lines, ctx);
        let title = title_line.map_or_else(|| UNKNOWN_TITLE.to_string(), |l| l.text.to_string());
        collect_turns(
            path,
            &lines,
            ctx,
            &mut resolver,
            &mut collector,
            &mut sink,
            title_line.map(|l| l.offset),
        );

        let mut sessions = Vec::new();
        match collector.finish(file_stem(path), title.clone(), SourceFormat::PlaintextSingle) {
            Some(session) => sessions.push(session),
            None => sink.empty_session(path, 1, &title),
        }

        ParsedDocument {
            source_format: SourceFormat::PlaintextSingle,
            sessions,
            detected_boundaries: 1,
            dropped_blocks: sink.dropped_blocks,
            warnings: sink.warnings,
        }
    }

    fn parse_series(&self, path: &Path, text: &str, ctx: &ParseContext) -> Result<ParsedDocument, ParseError> {
        let lines = split_lines(text);
        let markers: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| SESSION_MARKER_RE.is_match(line.text))
            .map(|(idx, _)| idx)
            .collect();

        let Some(&first_marker) = markers.first() else {
            return Err(ParseError::new(path, 0, "no session markers found in a multi-session document"));
        };

        let mut resolver = SpeakerResolver::new(ctx.aliases());
        let mut sink = WarningSink::default();

        // Navigation and headers before the first marker are not content; only
        // real turns found there are reported as dropped.
        let mut preamble = TurnCollector::new();
        let mut preamble_sink = WarningSink::default();
        collect_turns(
            path,
            &lines[..first_marker],
            ctx,
            &mut resolver,
            &mut preamble,
            &mut preamble_sink,
            None,
        );
        sink.orphaned_turns(path, 0, preamble.len());

        let mut sessions: Vec<Session> = Vec::new();
        for (i, &marker) in markers.iter().enumerate() {
            let boundary = i + 1;
            let end = markers.get(i + 1).copied().unwrap_or(lines.len());
            let title = lines[marker].text.to_string();

            let mut collector = TurnCollector::new();
            collect_turns(
                path,
                &lines[marker + 1..end],
                ctx,
                &mut resolver,
                &mut collector,
                &mut sink,
                None,
            );
            match collector.finish(series_session_id(boundary), title.clone(), SourceFormat::PlaintextSeries) {
                Some(session) => {
                    tracing::debug!(session_id = session.id(), exchanges = session.len(), "extracted session");
                    sessions.push(session);
                }
                None => sink.empty_session(path, boundary, &title),
            }
        }

        if sessions.is_empty() {
            return Err(ParseError::new(
                path,
                lines[first_marker].offset,
                format!("none of the {} detected sessions contained exchanges", markers.len()),
            ));
        }

        Ok(ParsedDocument {
            source_format: SourceFormat::PlaintextSeries,
            sessions,
            detected_boundaries: markers.len(),
            dropped_blocks: sink.dropped_blocks,
            warnings: sink.warnings,
        })
    }
}

impl DocumentParser for PlaintextParser {
    fn parse(&self, path: &Path, text: &str, ctx: &ParseContext) -> Result<ParsedDocument, ParseError> {
        if self.series {
            self.parse_series(path, text, ctx)
        } else {
            Ok(self.parse_single(path, text, ctx))
        }
    }
}

/// A labelled line that opens a turn; chrome such as `BEGIN TRANSCRIPT:` does not.
fn opens_turn<'t>(ctx: &ParseContext, text: &'t str) -> Option<(&'t str, &'t str)> {
    ctx.split_label(text, MAX_LABEL_LEN)
        .filter(|(label, _)| !is_plaintext_chrome(label))
}

/// First plausible title line above the first speaker turn.
fn find_title<'t>(lines: &[Line<'t>], ctx: &ParseContext) -> Option<Line<'t>> {
    let mut candidates = lines
        .iter()
        .take(TITLE_SCAN_LINES)
        .copied()
        .take_while(|line| opens_turn(ctx, line.text).is_none());
    candidates.find(|line| {
        let len = line.text.chars().count();
        if !(11..150).contains(&len) || line.text.starts_with("Page") {
            return false;
        }
        let lower = line.text.to_lowercase();
        !is_plaintext_chrome(line.text) && !TITLE_SKIP.iter().any(|skip| lower.contains(skip))
    })
}

/// Turn lines into exchanges.
///
/// A labelled line opens a turn; unlabelled lines directly below it continue
/// that turn, even when they happen to contain a chrome phrase. A blank line
/// or a transcript delimiter closes the paragraph, so an unlabelled paragraph
/// after it is reported as unattributed rather than glued onto a speaker.
fn collect_turns<'t>(
    path: &Path,
    lines: &[Line<'t>],
    ctx: &ParseContext,
    resolver: &mut SpeakerResolver<'_>,
    collector: &mut TurnCollector,
    sink: &mut WarningSink,
    skip_offset: Option<usize>,
) {
    let mut pending: Option<PendingTurn<'t>> = None;
    let mut in_unattributed = false;

    for line in lines {
        if line.text.is_empty() {
            flush(path, &mut pending, resolver, collector, sink);
            in_unattributed = false;
            continue;
        }
        if let Some((label, message)) = opens_turn(ctx, line.text) {
            flush(path, &mut pending, resolver, collector, sink);
            pending = Some(PendingTurn {
                offset: line.offset,
                line: line.text,
                label,
                message: normalize_plain(message),
            });
            in_unattributed = false;
            continue;
        }
        let chrome = if pending.is_some() {
            is_transcript_delimiter(line.text)
        } else {
            is_plaintext_chrome(line.text)
        };
        if chrome || skip_offset == Some(line.offset) {
            flush(path, &mut pending, resolver, collector, sink);
            in_unattributed = false;
            continue;
        }
        if let Some(PendingTurn { message, .. }) = pending.as_mut() {
            if !message.is_empty() {
                message.push(' ');
            }
            message.push_str(&normalize_plain(line.text));
            continue;
        }
        if !in_unattributed {
            sink.unattributed(path, line.offset, line.text);
            in_unattributed = true;
        }
    }
    flush(path, &mut pending, resolver, collector, sink);
}

struct PendingTurn<'t> {
    offset: usize,
    line: &'t str,
    label: &'t str,
    message: String,
}

fn flush(
    path: &Path,
    pending: &mut Option<PendingTurn<'_>>,
    resolver: &mut SpeakerResolver<'_>,
    collector: &mut TurnCollector,
    sink: &mut WarningSink,
) {
    let Some(turn) = pending.take() else {
        return;
    };
    if turn.message.is_empty() {
        sink.unattributed(path, turn.offset, turn.line);
    } else {
        collector.push(resolver, turn.label, turn.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Warning;
    use crate::speaker::{AliasRole, AliasTable, Role};

    fn parse(format: SourceFormat, text: &str) -> Result<ParsedDocument, ParseError> {
        let ctx = ParseContext::default();
        super::super::parser_for(format).parse(Path::new("data/4.txt"), text, &ctx)
    }

    #[test]
    fn test_single_session() {
        let text = "Anger Management Demonstration\n\
                    \n\
                    THERAPIST: What brings you in today?\n\
                    CLIENT: I keep losing my temper\n\
                    at work and at home.\n\
                    THERAPIST: Tell me about the last time.\n";
        let doc = parse(SourceFormat::PlaintextSingle, text).unwrap();

        assert_eq!(doc.sessions.len(), 1);
        assert_eq!(doc.dropped_blocks, 0);
        let session = &doc.sessions[0];
        assert_eq!(session.id(), "4");
        assert_eq!(session.title(), "Anger Management Demonstration");
        assert_eq!(session.len(), 3);
        assert_eq!(session.exchanges()[1].speaker, Role::Client);
        assert_eq!(
            session.exchanges()[1].message,
            "I keep losing my temper at work and at home."
        );
        assert_eq!(session.metadata().therapists, vec!["THERAPIST"]);
        assert_eq!(session.metadata().participants, vec!["THERAPIST", "CLIENT"]);
    }

    #[test]
    fn test_unattributed_paragraph_is_dropped_and_counted() {
        let text = "THERAPIST: Hello there.\n\
                    \n\
                    [inaudible crosstalk for several seconds]\n\
                    more of the same block\n\
                    \n\
                    CLIENT: Sorry, go on.\n";
        let doc = parse(SourceFormat::PlaintextSingle, text).unwrap();

        assert_eq!(doc.sessions[0].len(), 2);
        assert_eq!(doc.dropped_blocks, 1);
        assert!(matches!(
            &doc.warnings[0],
            Warning::UnattributedBlock { offset: 25, .. }
        ));
        assert!(doc.sessions[0]
            .exchanges()
            .iter()
            .all(|e| !e.message.contains("inaudible")));
    }

    #[test]
    fn test_chrome_lines_are_skipped() {
        let text = "BEGIN TRANSCRIPT:\nCOUNSELOR: Hi.\nPATIENT: Hello.\nEND TRANSCRIPT\n";
        let doc = parse(SourceFormat::PlaintextSingle, text).unwrap();
        assert_eq!(doc.sessions[0].len(), 2);
        assert_eq!(doc.dropped_blocks, 0);
        assert_eq!(doc.sessions[0].exchanges()[0].speaker, Role::Therapist);
    }

    #[test]
    fn test_continuation_with_chrome_phrase_is_kept() {
        let text = "CLIENT: My mother took me to the award\n\
                    that was presented by the mayor, and I cried.\n\
                    THERAPIST: Go on.\n";
        let doc = parse(SourceFormat::PlaintextSingle, text).unwrap();

        assert_eq!(doc.dropped_blocks, 0);
        assert_eq!(doc.sessions[0].len(), 2);
        assert_eq!(
            doc.sessions[0].exchanges()[0].message,
            "My mother took me to the award that was presented by the mayor, and I cried."
        );
    }

    #[test]
    fn test_label_without_message_is_counted() {
        let text = "THERAPIST: How was the week?\nCLIENT:\n\nTHERAPIST: Take your time.\n";
        let doc = parse(SourceFormat::PlaintextSingle, text).unwrap();

        assert_eq!(doc.sessions[0].len(), 2);
        assert_eq!(doc.dropped_blocks, 1);
        assert!(matches!(
            &doc.warnings[0],
            Warning::UnattributedBlock { offset: 29, .. }
        ));
    }

    #[test]
    fn test_single_without_dialogue_yields_no_session() {
        let doc = parse(SourceFormat::PlaintextSingle, "just some prose with no speakers").unwrap();
        assert!(doc.sessions.is_empty());
        assert_eq!(doc.empty_sessions(), 1);
    }

    fn series_text(sessions: usize, empty: &[usize]) -> String {
        let mut text = String::from("Skip to main content\nA Collection of Sessions\n\n");
        for n in 1..=sessions {
            text.push_str(&format!("Session {}: Topic {}\n", n, n));
            if !empty.contains(&n) {
                text.push_str(&format!("THERAPIST: Opening line {}.\n", n));
                text.push_str(&format!("CLIENT: Reply {}.\n", n));
            }
            text.push('\n');
        }
        text
    }

    #[test]
    fn test_thirteen_detected_one_empty_yields_twelve() {
        let doc = parse(SourceFormat::PlaintextSeries, &series_text(13, &[7])).unwrap();

        assert_eq!(doc.detected_boundaries, 13);
        assert_eq!(doc.sessions.len(), 12);
        assert_eq!(doc.empty_sessions(), 1);
        assert!(doc
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::EmptySession { boundary: 7, .. })));
        // Ids follow the detected boundary, so session_07 is missing.
        let ids: Vec<&str> = doc.sessions.iter().map(Session::id).collect();
        assert_eq!(ids[5], "session_06");
        assert_eq!(ids[6], "session_08");
        assert_eq!(doc.sessions[0].title(), "Session 1: Topic 1");
    }

    #[test]
    fn test_positions_reset_per_session() {
        let doc = parse(SourceFormat::PlaintextSeries, &series_text(2, &[])).unwrap();
        for session in &doc.sessions {
            assert_eq!(session.exchanges()[0].position, 0);
            assert_eq!(session.exchanges()[1].position, 1);
        }
    }

    #[test]
    fn test_series_without_markers_is_parse_error() {
        let err = parse(SourceFormat::PlaintextSeries, "THERAPIST: hi\nCLIENT: hello\n").unwrap_err();
        assert_eq!(err.offset, 0);
        assert_eq!(err.path, Path::new("data/4.txt"));
    }

    #[test]
    fn test_series_with_only_empty_sessions_is_parse_error() {
        let err = parse(SourceFormat::PlaintextSeries, &series_text(2, &[1, 2])).unwrap_err();
        assert!(err.reason.contains("2 detected sessions"));
    }

    #[test]
    fn test_turns_before_first_marker_are_counted() {
        let text = "CLIENT: stray line\nSession 1\nTHERAPIST: a\nSession 2\nTHERAPIST: b\n";
        let doc = parse(SourceFormat::PlaintextSeries, text).unwrap();
        assert_eq!(doc.sessions.len(), 2);
        assert_eq!(doc.dropped_blocks, 1);
    }

    #[test]
    fn test_aliases_apply_in_plaintext() {
        let ctx = ParseContext::new(AliasTable::from([("LORETTA", AliasRole::Client)]), ":");
        let doc = PlaintextParser::single()
            .parse(Path::new("x.txt"), "DR. FELDER: Hello.\nLORETTA: Hi.\n", &ctx)
            .unwrap();
        let roles: Vec<&Role> = doc.sessions[0].exchanges().iter().map(|e| &e.speaker).collect();
        assert_eq!(roles, vec![&Role::Therapist, &Role::Client]);
    }
}
