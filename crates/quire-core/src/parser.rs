//! Parser module - turns markdown text into a document schema.
//!
//! Only the block and inline structure the engine cares about is
//! recognised: headings, paragraphs, quotes, list items, fenced code,
//! links and images. Anything else stays literal text inside its
//! paragraph, so the schema never loses content.

use crate::error::{ParseError, Result};
use crate::paths;
use crate::schema::{Element, ElementKind, Link, Schema};
use std::fs;
use std::ops::Range;
use std::path::Path;

/// Extensions the parse pipeline treats as documents.
const DOCUMENT_EXTENSIONS: &[&str] = &["md", "markdown"];

/// A parsed document plus the local links found in it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    pub schema: Schema,
    pub links: Vec<Link>,
}

impl ParsedDocument {
    /// The empty document substituted for unreadable files.
    pub fn fallback() -> Self {
        Self::default()
    }
}

/// Checks if a path has a document extension we parse.
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            DOCUMENT_EXTENSIONS
                .iter()
                .any(|d| d.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Reads and parses a document from disk.
///
/// # Example
///
/// ```no_run
/// use quire_core::parse_file;
/// use std::path::Path;
///
/// let doc = parse_file(Path::new("/notes/a.md")).unwrap();
/// println!("{} links", doc.links.len());
/// ```
pub fn parse_file(path: &Path) -> Result<ParsedDocument> {
    if !is_supported(path) {
        return Err(ParseError::Unsupported(path.to_path_buf()));
    }
    let source = fs::read_to_string(path).map_err(|e| ParseError::io(path, e))?;
    Ok(parse_source(&source, path))
}

/// Parses in-memory content as the document living at `path`.
///
/// `path` is only used to resolve relative links.
pub fn parse_source(source: &str, path: &Path) -> ParsedDocument {
    let schema = Schema::from_blocks(parse_blocks(source));
    let links = extract_links(&schema, path);
    ParsedDocument { schema, links }
}

/// Resolves every local link and image in `schema` against `doc_path`.
pub fn extract_links(schema: &Schema, doc_path: &Path) -> Vec<Link> {
    let base = doc_path.parent().unwrap_or(Path::new(""));
    schema
        .references()
        .into_iter()
        .filter_map(|(address, element)| {
            let url = element.url.as_deref()?;
            let target_path = paths::resolve(base, url)?;
            Some(Link {
                address,
                target_path,
            })
        })
        .collect()
}

/// Byte ranges in `source` of the url of every link and image, in
/// document order. Code spans and fenced blocks contribute nothing.
pub fn reference_spans(source: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    for block in split_blocks(source) {
        let Block::Inline { raw, .. } = block else {
            continue;
        };
        // Block prefixes (`#`, `>`, list markers) never start a reference,
        // so scanning the raw lines finds the same urls as the stripped text.
        for piece in scan_inline(&source[raw.clone()]) {
            if let Inline::Reference { url, .. } = piece {
                spans.push(raw.start + url.start..raw.start + url.end);
            }
        }
    }
    spans
}

fn parse_blocks(source: &str) -> Vec<Element> {
    split_blocks(source)
        .into_iter()
        .map(|block| match block {
            Block::Code { lang, text } => {
                Element::new(ElementKind::CodeBlock { lang }).with_text(text)
            }
            Block::Inline { kind, text, .. } => {
                Element::new(kind).with_children(parse_inline(&text))
            }
        })
        .collect()
}

enum Block {
    Code {
        lang: String,
        text: String,
    },
    Inline {
        kind: ElementKind,
        /// Content with block markup stripped.
        text: String,
        /// The lines of `source` the block was read from.
        raw: Range<usize>,
    },
}

struct Line<'a> {
    text: &'a str,
    start: usize,
}

impl Line<'_> {
    fn end(&self) -> usize {
        self.start + self.text.len()
    }
}

/// Same split as `str::lines`, keeping each line's offset.
fn split_lines(source: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut start = 0;
    for chunk in source.split_inclusive('\n') {
        let text = match chunk.strip_suffix('\n') {
            Some(line) => line.strip_suffix('\r').unwrap_or(line),
            None => chunk,
        };
        lines.push(Line { text, start });
        start += chunk.len();
    }
    lines
}

fn split_blocks(source: &str) -> Vec<Block> {
    let lines = split_lines(source);
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&Line> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = &lines[i];
        let trimmed = line.text.trim_start();

        if let Some(fence) = fence_of(trimmed) {
            flush_paragraph(&mut paragraph, &mut blocks);
            let lang = trimmed.trim_start_matches(fence.0).trim().to_string();
            let mut code = Vec::new();
            i += 1;
            while i < lines.len() && !lines[i].text.trim_start().starts_with(fence.1) {
                code.push(lines[i].text);
                i += 1;
            }
            blocks.push(Block::Code {
                lang,
                text: code.join("\n"),
            });
            i += 1;
            continue;
        }

        if trimmed.is_empty() {
            flush_paragraph(&mut paragraph, &mut blocks);
            i += 1;
            continue;
        }

        if let Some((level, rest)) = heading_of(trimmed) {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(Block::Inline {
                kind: ElementKind::Heading { level },
                text: rest.to_string(),
                raw: line.start..line.end(),
            });
            i += 1;
            continue;
        }

        if trimmed.starts_with('>') {
            flush_paragraph(&mut paragraph, &mut blocks);
            let first = line.start;
            let mut quoted = Vec::new();
            while i < lines.len() && lines[i].text.trim_start().starts_with('>') {
                let inner = lines[i].text.trim_start().trim_start_matches('>');
                quoted.push(inner.strip_prefix(' ').unwrap_or(inner));
                i += 1;
            }
            blocks.push(Block::Inline {
                kind: ElementKind::Quote,
                text: quoted.join("\n"),
                raw: first..lines[i - 1].end(),
            });
            continue;
        }

        if let Some(split) = list_marker_len(line.text) {
            flush_paragraph(&mut paragraph, &mut blocks);
            let (marker, rest) = line.text.split_at(split);
            blocks.push(Block::Inline {
                kind: ElementKind::ListItem {
                    marker: marker.to_string(),
                },
                text: rest.to_string(),
                raw: line.start..line.end(),
            });
            i += 1;
            continue;
        }

        paragraph.push(line);
        i += 1;
    }

    flush_paragraph(&mut paragraph, &mut blocks);
    blocks
}

fn flush_paragraph(paragraph: &mut Vec<&Line>, blocks: &mut Vec<Block>) {
    let (Some(first), Some(last)) = (paragraph.first(), paragraph.last()) else {
        return;
    };
    let raw = first.start..last.end();
    let text = paragraph
        .iter()
        .map(|l| l.text)
        .collect::<Vec<_>>()
        .join("\n");
    paragraph.clear();
    blocks.push(Block::Inline {
        kind: ElementKind::Paragraph,
        text,
        raw,
    });
}

fn fence_of(line: &str) -> Option<(&'static str, &'static str)> {
    if line.starts_with("```") {
        Some(("`", "```"))
    } else if line.starts_with("~~~") {
        Some(("~", "~~~"))
    } else {
        None
    }
}

fn heading_of(line: &str) -> Option<(u8, &str)> {
    let level = line.bytes().take_while(|b| *b == b'#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if rest.is_empty() {
        return Some((level as u8, ""));
    }
    rest.strip_prefix(' ').map(|r| (level as u8, r.trim_end()))
}

/// Byte length of a list marker (`- `, `* `, `+ `, `1. `, `2) `) with its indentation.
fn list_marker_len(line: &str) -> Option<usize> {
    let indent = line.len() - line.trim_start().len();
    let rest = &line[indent..];
    let bytes = rest.as_bytes();

    let marker = match bytes.first()? {
        b'-' | b'*' | b'+' => 1,
        b'0'..=b'9' => {
            let digits = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
            match bytes.get(digits) {
                Some(b'.') | Some(b')') => digits + 1,
                _ => return None,
            }
        }
        _ => return None,
    };

    match bytes.get(marker) {
        Some(b' ') => Some(indent + marker + 1),
        None => Some(indent + marker),
        _ => None,
    }
}

enum Inline {
    Text(String),
    Reference {
        kind: ElementKind,
        label: String,
        /// Byte range of the bare url within the scanned text.
        url: Range<usize>,
    },
}

/// Splits inline text into text, link and image elements.
fn parse_inline(text: &str) -> Vec<Element> {
    scan_inline(text)
        .into_iter()
        .map(|piece| match piece {
            Inline::Text(plain) => Element::text(plain),
            Inline::Reference { kind, label, url } => {
                Element::new(kind).with_text(label).with_url(&text[url])
            }
        })
        .collect()
}

fn scan_inline(text: &str) -> Vec<Inline> {
    let mut out = Vec::new();
    let mut plain = String::new();
    let mut i = 0;

    while i < text.len() {
        let rest = &text[i..];

        if rest.starts_with('`') {
            let ticks = rest.bytes().take_while(|b| *b == b'`').count();
            let closing = "`".repeat(ticks);
            if let Some(end) = rest[ticks..].find(&closing) {
                let span = ticks + end + ticks;
                plain.push_str(&rest[..span]);
                i += span;
                continue;
            }
        }

        let (kind, start) = if rest.starts_with("![") {
            (ElementKind::Image, 2)
        } else if rest.starts_with('[') {
            (ElementKind::Link, 1)
        } else {
            let ch = rest.chars().next().unwrap_or_default();
            plain.push(ch);
            i += ch.len_utf8().max(1);
            continue;
        };

        match reference_at(rest, start) {
            Some((label, url, consumed)) => {
                if !plain.is_empty() {
                    out.push(Inline::Text(std::mem::take(&mut plain)));
                }
                out.push(Inline::Reference {
                    kind,
                    label,
                    url: i + url.start..i + url.end,
                });
                i += consumed;
            }
            None => {
                plain.push_str(&rest[..start]);
                i += start;
            }
        }
    }

    if !plain.is_empty() {
        out.push(Inline::Text(plain));
    }
    out
}

/// Parses `[label](url "title")` starting after the opening bracket.
///
/// Returns the label, the byte range of the bare url and the number of
/// bytes consumed.
fn reference_at(text: &str, label_start: usize) -> Option<(String, Range<usize>, usize)> {
    let mut depth = 1;
    let mut label_end = None;
    for (offset, ch) in text[label_start..].char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    label_end = Some(label_start + offset);
                    break;
                }
            }
            _ => {}
        }
    }
    let label_end = label_end?;
    let after = &text[label_end + 1..];
    if !after.starts_with('(') {
        return None;
    }

    let mut depth = 0;
    let mut close = None;
    for (offset, ch) in after.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(offset);
                    break;
                }
            }
            '\n' => return None,
            _ => {}
        }
    }
    let close = close?;
    let body = &after[1..close];
    let inner = body.trim();
    let mut url_start = label_end + 2 + (body.len() - body.trim_start().len());

    let url = if let Some(stripped) = inner.strip_prefix('<') {
        url_start += 1;
        stripped.split('>').next().unwrap_or_default()
    } else {
        inner.split_whitespace().next().unwrap_or_default()
    };
    if url.is_empty() {
        return None;
    }

    let label = text[label_start..label_end].to_string();
    Some((label, url_start..url_start + url.len(), label_end + 1 + close + 1))
}
