//! Resume text extraction. PDFs go through pdf-extract; anything else is
//! treated as UTF-8 text.

use anyhow::{Context, Result};

/// Extracts plain text from a stored document.
pub fn extract_text(data: &[u8], mime_type: &str) -> Result<String> {
    let text = if mime_type.eq_ignore_ascii_case("application/pdf") {
        pdf_extract::extract_text_from_mem(data).context("document extraction failed")?
    } else {
        String::from_utf8_lossy(data).into_owned()
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        anyhow::bail!("document extraction produced no text");
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passthrough() {
        let text = extract_text(b"  Senior Rust Engineer\nBuilt things.  ", "text/plain").unwrap();
        assert_eq!(text, "Senior Rust Engineer\nBuilt things.");
    }

    #[test]
    fn test_empty_document_rejected() {
        let err = extract_text(b"   \n  ", "text/plain").unwrap_err();
        assert!(err.to_string().contains("document extraction"));
    }

    #[test]
    fn test_invalid_utf8_is_replaced_not_fatal() {
        let data = [0x52, 0x75, 0x73, 0x74, 0xFF, 0x21];
        let text = extract_text(&data, "text/plain").unwrap();
        assert!(text.starts_with("Rust"));
    }
}
