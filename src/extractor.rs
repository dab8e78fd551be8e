use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TEXT: &str = "text/plain";

pub fn is_supported(content_type: &str) -> bool {
    matches!(content_type, MIME_PDF | MIME_DOCX | MIME_TEXT)
}

/// Extract plain text from a stored upload according to its declared
/// content type.
pub fn extract_text(path: &Path, content_type: &str) -> Result<String> {
    match content_type {
        MIME_TEXT => extract_plain_text(path),
        MIME_PDF => extract_pdf(path),
        MIME_DOCX => extract_docx(path),
        other => Err(Error::Validation(format!(
            "unsupported content type: {}",
            other
        ))),
    }
}

fn extract_plain_text(path: &Path) -> Result<String> {
    Ok(std::fs::read_to_string(path)?)
}

fn extract_pdf(path: &Path) -> Result<String> {
    pdf_extract::extract_text(path)
        .map_err(|e| Error::Validation(format!("failed to extract PDF text: {}", e)))
}

fn extract_docx(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| Error::Validation(format!("failed to read DOCX as ZIP: {}", e)))?;

    let mut xml_content = String::new();
    match archive.by_name("word/document.xml") {
        Ok(mut entry) => {
            entry.read_to_string(&mut xml_content)?;
        }
        Err(_) => {
            return Err(Error::Validation(
                "no word/document.xml found in DOCX".to_string(),
            ));
        }
    }

    Ok(extract_text_from_xml(&xml_content, "w:t"))
}

/// Pull the text content of every `<tag>` element. The DOCX body keeps its
/// visible text inside `w:t` runs; attribute forms like `<w:t xml:space=...>`
/// must be handled.
fn extract_text_from_xml(xml: &str, tag: &str) -> String {
    let open_tag = format!("<{}", tag);
    let close_tag = format!("</{}>", tag);
    let mut texts = Vec::new();
    let mut search_from = 0;

    while let Some(open_pos) = xml[search_from..].find(&open_tag) {
        let abs_open = search_from + open_pos;
        if let Some(tag_end) = xml[abs_open..].find('>') {
            let content_start = abs_open + tag_end + 1;
            if let Some(close_pos) = xml[content_start..].find(&close_tag) {
                let content = &xml[content_start..content_start + close_pos];
                if !content.is_empty() {
                    texts.push(content.to_string());
                }
                search_from = content_start + close_pos + close_tag.len();
            } else {
                break;
            }
        } else {
            break;
        }
    }

    texts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn plain_text_reads_file_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "hello world, this is a test document").unwrap();
        let text = extract_text(file.path(), MIME_TEXT).unwrap();
        assert_eq!(text, "hello world, this is a test document");
    }

    #[test]
    fn unsupported_type_is_a_validation_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = extract_text(file.path(), "image/png").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn xml_text_nodes_are_joined() {
        let xml = r#"<w:body><w:t>First</w:t><w:p/><w:t xml:space="preserve">second part</w:t></w:body>"#;
        assert_eq!(extract_text_from_xml(xml, "w:t"), "First second part");
    }

    #[test]
    fn supported_type_whitelist() {
        assert!(is_supported(MIME_PDF));
        assert!(is_supported(MIME_DOCX));
        assert!(is_supported(MIME_TEXT));
        assert!(!is_supported("text/html"));
    }
}
