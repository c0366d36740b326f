//! Source document loading.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use anyhow::{bail, Context, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

const DOCX_BODY: &str = "word/document.xml";

/// Text of the document at `path`. `.docx` files yield their non-empty
/// paragraphs joined by newlines; anything else is read as UTF-8.
pub fn load_document(path: &Path) -> Result<String> {
    let is_docx = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("docx"))
        .unwrap_or(false);
    if is_docx {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let paragraphs = docx_paragraphs(file)
            .with_context(|| format!("failed to read docx {}", path.display()))?;
        return Ok(paragraphs.join("\n"));
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Non-empty `w:p` paragraphs of a docx package, in document order.
pub fn docx_paragraphs<R: Read + Seek>(reader: R) -> Result<Vec<String>> {
    let mut archive = ZipArchive::new(reader).context("not a zip package")?;
    let mut xml = String::new();
    archive
        .by_name(DOCX_BODY)
        .with_context(|| format!("package has no {DOCX_BODY}"))?
        .read_to_string(&mut xml)
        .with_context(|| format!("failed to read {DOCX_BODY}"))?;
    paragraphs_from_xml(&xml)
}

fn paragraphs_from_xml(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_paragraph = false;
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match local_name(e.name().as_ref()) {
                b"p" => {
                    in_paragraph = true;
                    current.clear();
                }
                b"t" => in_text = in_paragraph,
                _ => {}
            },
            Ok(Event::Empty(ref e)) if in_paragraph => match local_name(e.name().as_ref()) {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(ref e)) if in_text => {
                current.push_str(&e.unescape().context("bad text escape in document body")?);
            }
            Ok(Event::End(ref e)) => match local_name(e.name().as_ref()) {
                b"t" => in_text = false,
                b"p" => {
                    in_paragraph = false;
                    let text = current.trim();
                    if !text.is_empty() {
                        paragraphs.push(text.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => bail!(
                "malformed document XML at byte {}: {err}",
                reader.buffer_position()
            ),
            _ => {}
        }
    }
    Ok(paragraphs)
}

fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().position(|&b| b == b':') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}
