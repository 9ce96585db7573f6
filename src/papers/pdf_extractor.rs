//! PDF text extraction wrapper
//!
//! Wraps pdf-extract with page-level handling:
//! - Pages without a text layer (scanned figures, image-only pages) are skipped
//! - Remaining pages are joined with a single line break
//! - Encrypted or corrupted documents return an error

/// Extract full text from PDF bytes
pub fn extract_text_from_pdf(pdf_bytes: &[u8]) -> Result<String, String> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(pdf_bytes)
        .map_err(|e| e.to_string())?;
    Ok(join_pages(pages))
}

/// Join per-page text, dropping pages that carry no extractable text
pub fn join_pages<I>(pages: I) -> String
where
    I: IntoIterator<Item = String>,
{
    pages
        .into_iter()
        .filter(|page| !page.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_pages_skips_blank_pages() {
        let pages = vec![
            "Page one.".to_string(),
            String::new(),
            "  \n\t".to_string(),
            "Page four.".to_string(),
        ];
        assert_eq!(join_pages(pages), "Page one.\nPage four.");
    }

    #[test]
    fn test_join_pages_all_blank() {
        assert_eq!(join_pages(vec![String::new(), " ".to_string()]), "");
    }
}
