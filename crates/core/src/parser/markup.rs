//! Markup transcripts: one exchange per paragraph, with volume/session
//! headings splitting multi-volume archives into sessions.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::{
    file_stem, is_end_marker, is_markup_chrome, series_session_id, DocumentParser, ParseContext,
    ParsedDocument, TurnCollector, WarningSink,
};
use crate::error::ParseError;
use crate::helpers::normalize_message;
use crate::model::{Session, SourceFormat};
use crate::speaker::SpeakerResolver;

static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?is)<h[1-6]\b[^>]*>(?P<heading>.*?)</h[1-6]\s*>",
        r#"|<(?:div|span|p|section|header)\b[^>]*\bclass\s*=\s*"[^"]*section-title[^"]*"[^>]*>(?P<section>.*?)</(?:div|span|p|section|header)\s*>"#,
        r"|<p\b[^>]*>(?P<para>.*?)</p\s*>",
    ))
    .unwrap()
});
static P_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<(/?)p\b[^>]*>").unwrap());
static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title\s*>").unwrap());
static BOUNDARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(volume|vol\.|session|part|series)\s*(?:no\.?\s*)?(\d+|[ivxlc]+)\b").unwrap()
});

const MAX_LABEL_LEN: usize = 50;
const UNKNOWN_TITLE: &str = "Unknown Session";

/// A structural element of the document, in source order.
enum Block {
    Heading { text: String },
    Paragraph { offset: usize, text: String },
}

fn blocks(text: &str) -> impl Iterator<Item = Block> + '_ {
    BLOCK_RE.captures_iter(text).filter_map(|caps| {
        if let Some(heading) = caps.name("heading").or_else(|| caps.name("section")) {
            return Some(Block::Heading {
                text: normalize_message(heading.as_str()),
            });
        }
        let para = caps.name("para")?;
        let text = normalize_message(para.as_str());
        if text.is_empty() {
            return None;
        }
        Some(Block::Paragraph {
            offset: caps.get(0).map_or(0, |m| m.start()),
            text,
        })
    })
}

fn is_boundary(heading: &str) -> bool {
    BOUNDARY_RE.is_match(heading)
}

pub(crate) fn count_boundaries(text: &str) -> usize {
    blocks(text)
        .filter(|block| matches!(block, Block::Heading { text } if is_boundary(text)))
        .count()
}

/// Reject documents whose paragraph tags do not pair up.
fn check_paragraph_balance(path: &Path, text: &str) -> Result<(), ParseError> {
    let mut open_at: Option<usize> = None;
    for caps in P_TAG_RE.captures_iter(text) {
        let Some(tag) = caps.get(0) else { continue };
        if tag.as_str().ends_with("/>") {
            continue;
        }
        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
        match (closing, open_at) {
            (false, None) => open_at = Some(tag.start()),
            (false, Some(previous)) => {
                return Err(ParseError::new(path, previous, "paragraph opened here is never closed"));
            }
            (true, Some(_)) => open_at = None,
            (true, None) => {
                return Err(ParseError::new(path, tag.start(), "closing paragraph tag without an opening tag"));
            }
        }
    }
    match open_at {
        Some(offset) => Err(ParseError::new(path, offset, "paragraph opened here is never closed")),
        None => Ok(()),
    }
}

/// Markup parser; `series` splits the document at volume/session headings.
#[derive(Debug, Clone, Copy)]
pub struct MarkupParser {
    series: bool,
}

struct OpenSession {
    boundary: usize,
    title: String,
    collector: TurnCollector,
}

impl MarkupParser {
    pub fn single() -> Self {
        Self { series: false }
    }

    pub fn series() -> Self {
        Self { series: true }
    }

    fn parse_single(&self, path: &Path, text: &str, ctx: &ParseContext) -> ParsedDocument {
        let mut resolver = SpeakerResolver::new(ctx.aliases());
        let mut sink = WarningSink::default();
        let mut collector = TurnCollector::new();
        let mut boundary_title: Option<String> = None;
        let mut first_heading: Option<String> = None;
        let mut closed = false;

        for block in blocks(text) {
            match block {
                Block::Heading { text } => {
                    if boundary_title.is_none() && is_boundary(&text) {
                        boundary_title = Some(text.clone());
                    }
                    if first_heading.is_none() && !text.is_empty() {
                        first_heading = Some(text);
                    }
                }
                Block::Paragraph { offset, text } => {
                    if is_end_marker(&text) {
                        closed = true;
                    } else if !closed {
                        take_paragraph(path, offset, &text, ctx, &mut resolver, &mut collector, &mut sink);
                    }
                }
            }
        }

        let title = boundary_title
            .or_else(|| {
                TITLE_RE
                    .captures(text)
                    .and_then(|caps| caps.get(1))
                    .map(|m| normalize_message(m.as_str()))
                    .filter(|t| !t.is_empty())
            })
            .or(first_heading)
            .unwrap_or_else(|| UNKNOWN_TITLE.to_string());

        let mut sessions = Vec::new();
        match collector.finish(file_stem(path), title.clone(), SourceFormat::MarkupSingle) {
            Some(session) => sessions.push(session),
            None => sink.empty_session(path, 1, &title),
        }

        ParsedDocument {
            source_format: SourceFormat::MarkupSingle,
            sessions,
            detected_boundaries: 1,
            dropped_blocks: sink.dropped_blocks,
            warnings: sink.warnings,
        }
    }

    fn parse_series(&self, path: &Path, text: &str, ctx: &ParseContext) -> Result<ParsedDocument, ParseError> {
        let mut resolver = SpeakerResolver::new(ctx.aliases());
        let mut sink = WarningSink::default();
        let mut sessions: Vec<Session> = Vec::new();
        let mut current: Option<OpenSession> = None;
        let mut detected = 0;
        let mut closed = false;

        // Introductory matter before the first heading: only real turns count as lost.
        let mut preamble = TurnCollector::new();
        let mut preamble_sink = WarningSink::default();

        for block in blocks(text) {
            match block {
                Block::Heading { text } => {
                    if !is_boundary(&text) {
                        continue;
                    }
                    if let Some(open) = current.take() {
                        close_session(path, open, &mut sessions, &mut sink);
                    }
                    detected += 1;
                    current = Some(OpenSession {
                        boundary: detected,
                        title: text,
                        collector: TurnCollector::new(),
                    });
                    closed = false;
                }
                Block::Paragraph { offset, text } => {
                    if is_end_marker(&text) {
                        closed = true;
                        continue;
                    }
                    if closed {
                        continue;
                    }
                    match current.as_mut() {
                        Some(open) => take_paragraph(
                            path,
                            offset,
                            &text,
                            ctx,
                            &mut resolver,
                            &mut open.collector,
                            &mut sink,
                        ),
                        None => take_paragraph(
                            path,
                            offset,
                            &text,
                            ctx,
                            &mut resolver,
                            &mut preamble,
                            &mut preamble_sink,
                        ),
                    }
                }
            }
        }
        if let Some(open) = current.take() {
            close_session(path, open, &mut sessions, &mut sink);
        }

        if detected == 0 {
            return Err(ParseError::new(
                path,
                0,
                "no volume or session headings found in a multi-volume document",
            ));
        }
        sink.orphaned_turns(path, 0, preamble.len());
        if sessions.is_empty() {
            return Err(ParseError::new(
                path,
                0,
                format!("none of the {} detected sessions contained exchanges", detected),
            ));
        }

        Ok(ParsedDocument {
            source_format: SourceFormat::MarkupSeries,
            sessions,
            detected_boundaries: detected,
            dropped_blocks: sink.dropped_blocks,
            warnings: sink.warnings,
        })
    }
}

impl DocumentParser for MarkupParser {
    fn parse(&self, path: &Path, text: &str, ctx: &ParseContext) -> Result<ParsedDocument, ParseError> {
        check_paragraph_balance(path, text)?;
        if self.series {
            self.parse_series(path, text, ctx)
        } else {
            Ok(self.parse_single(path, text, ctx))
        }
    }
}

fn close_session(path: &Path, open: OpenSession, sessions: &mut Vec<Session>, sink: &mut WarningSink) {
    let OpenSession {
        boundary,
        title,
        collector,
    } = open;
    match collector.finish(series_session_id(boundary), title.clone(), SourceFormat::MarkupSeries) {
        Some(session) => {
            tracing::debug!(session_id = session.id(), exchanges = session.len(), "extracted session");
            sessions.push(session);
        }
        None => sink.empty_session(path, boundary, &title),
    }
}

fn take_paragraph(
    path: &Path,
    offset: usize,
    text: &str,
    ctx: &ParseContext,
    resolver: &mut SpeakerResolver<'_>,
    collector: &mut TurnCollector,
    sink: &mut WarningSink,
) {
    if is_markup_chrome(text) {
        return;
    }
    match ctx.split_label(text, MAX_LABEL_LEN) {
        Some((label, message)) if !message.is_empty() => {
            collector.push(resolver, label, message.to_string());
        }
        // A label with nothing after it is as lost as a block with no label.
        _ => sink.unattributed(path, offset, text),
    }
}
