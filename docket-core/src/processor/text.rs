use std::borrow::Cow;

use async_trait::async_trait;

use crate::{
    entities::{DocumentType, ExtractionMode, ExtractionResult, ResultMetadata},
    error::ProcessorError,
};

use super::{DocumentProcessor, ProcessRequest};

/// Lines shorter than this, without closing punctuation, are read as headings.
const HEADING_MAX_CHARS: usize = 50;

/// Native backend for plain text and XML documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextProcessor;

#[async_trait]
impl DocumentProcessor for TextProcessor {
    fn name(&self) -> &str {
        "text"
    }

    fn supports(&self, document_type: DocumentType) -> bool {
        matches!(document_type, DocumentType::Text | DocumentType::Xml)
    }

    #[tracing::instrument(skip_all, fields(filename = %req.filename))]
    async fn process(&self, req: ProcessRequest) -> Result<ExtractionResult, ProcessorError> {
        if !self.supports(req.document_type) {
            return Err(ProcessorError::Unsupported(req.document_type));
        }

        let (decoded, encoding) = match String::from_utf8_lossy(&req.payload) {
            Cow::Borrowed(text) => (text.to_owned(), "utf-8"),
            Cow::Owned(text) => {
                tracing::warn!("payload is not valid utf-8, decoded lossily");
                (text, "utf-8-lossy")
            }
        };

        let text_content = match req.document_type {
            DocumentType::Xml => xml_to_text(&decoded).unwrap_or_else(|e| {
                tracing::warn!("xml parsing failed, keeping raw text: {e}");
                decoded
            }),
            _ => decoded,
        };
        let markdown_content = to_markdown(&text_content, req.options.extraction_mode);

        let mut metadata = ResultMetadata {
            pages: Some(1),
            original_format: req.document_type.to_string(),
            processor: self.name().to_owned(),
            ..Default::default()
        };
        metadata.extra.insert("encoding".into(), encoding.into());
        metadata
            .extra
            .insert("lines".into(), text_content.split('\n').count().into());

        Ok(ExtractionResult {
            text_content,
            markdown_content: Some(markdown_content),
            metadata,
            ..Default::default()
        })
    }
}

/// Heading heuristic applied in `Markdown` mode; other modes return the text as is.
pub fn to_markdown(text: &str, mode: ExtractionMode) -> String {
    if mode != ExtractionMode::Markdown {
        return text.to_owned();
    }
    text.split('\n')
        .map(|line| {
            let line = line.trim();
            if line.is_empty() {
                String::new()
            } else if line.chars().count() < HEADING_MAX_CHARS
                && !line.ends_with('.')
                && !line.ends_with('。')
            {
                format!("## {line}")
            } else {
                line.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Flattens an XML document into an indented outline: one `<tag>` line per
/// element and its trimmed text nested two spaces below it.
pub fn xml_to_text(xml: &str) -> anyhow::Result<String> {
    let mut out = String::new();
    let mut open: Vec<&str> = Vec::new();
    let mut rest = xml;

    while !rest.is_empty() {
        let Some(lt) = rest.find('<') else {
            push_text(&mut out, rest, open.len());
            break;
        };
        push_text(&mut out, &rest[..lt], open.len());
        rest = &rest[lt..];

        if let Some(body) = rest.strip_prefix("<![CDATA[") {
            let end = body
                .find("]]>")
                .ok_or_else(|| anyhow::anyhow!("unterminated CDATA section"))?;
            push_raw(&mut out, &body[..end], open.len());
            rest = &body[end + 3..];
            continue;
        }
        if let Some(body) = rest.strip_prefix("<!--") {
            let end = body
                .find("-->")
                .ok_or_else(|| anyhow::anyhow!("unterminated comment"))?;
            rest = &body[end + 3..];
            continue;
        }

        let gt = tag_end(rest).ok_or_else(|| anyhow::anyhow!("unterminated tag"))?;
        let tag = &rest[1..gt];
        rest = &rest[gt + 1..];

        if tag.starts_with('?') || tag.starts_with('!') {
            continue;
        }
        if let Some(name) = tag.strip_prefix('/') {
            let name = name.trim();
            match open.pop() {
                Some(expected) if expected == name => {}
                Some(expected) => {
                    anyhow::bail!("mismatched tag: expected </{expected}>, found </{name}>")
                }
                None => anyhow::bail!("unexpected closing tag </{name}>"),
            }
            continue;
        }

        let self_closing = tag.ends_with('/');
        let name = tag
            .trim_end_matches('/')
            .split_whitespace()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty tag"))?;
        out.push_str(&"  ".repeat(open.len()));
        out.push('<');
        out.push_str(name);
        out.push_str(">\n");
        if !self_closing {
            open.push(name);
        }
    }

    if let Some(unclosed) = open.last() {
        anyhow::bail!("unclosed element <{unclosed}>");
    }
    Ok(out)
}

fn push_text(out: &mut String, text: &str, depth: usize) {
    // Text outside the root element carries no content.
    if depth == 0 {
        return;
    }
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    push_raw(out, &unescape(text), depth);
}

fn push_raw(out: &mut String, text: &str, depth: usize) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    out.push_str(&"  ".repeat(depth));
    out.push_str(text);
    out.push('\n');
}

/// Index of the `>` closing the markup at the start of `rest`. Quoted
/// attribute values and a DOCTYPE internal subset may contain `>`.
fn tag_end(rest: &str) -> Option<usize> {
    let mut quote = None;
    let mut depth = 0usize;
    for (i, c) in rest.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[') if rest.starts_with("<!") => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, '>') if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

fn unescape(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest
            .find(';')
            .and_then(|semi| Some((decode_entity(&rest[1..semi])?, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            // Unknown entities are kept as written.
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let reference = entity.strip_prefix('#')?;
            let code = match reference.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None if reference.bytes().all(|b| b.is_ascii_digit()) => reference.parse().ok()?,
                None => return None,
            };
            char::from_u32(code)
        }
    }
}
