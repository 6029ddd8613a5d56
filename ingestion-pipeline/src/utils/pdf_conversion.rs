use std::path::{Path, PathBuf};

use tracing::{debug, info};

use common::error::AppError;

/// Location of the Markdown rendition cached next to a PDF.
pub fn markdown_path(pdf: &Path) -> PathBuf {
    pdf.with_extension("md")
}

/// Converts `pdf` to Markdown once and returns the path of the cached rendition.
///
/// An existing rendition is reused as-is, so deleting it forces a reconversion.
pub async fn ensure_markdown(pdf: &Path) -> Result<PathBuf, AppError> {
    let target = markdown_path(pdf);
    if tokio::fs::try_exists(&target).await? {
        debug!(markdown = %target.display(), "Reusing cached PDF conversion");
        return Ok(target);
    }

    let pdf_bytes = tokio::fs::read(pdf).await?;
    let text = extract_text(pdf_bytes).await?;
    let markdown = reflow_markdown(&text.replace('\r', ""));

    tokio::fs::write(&target, &markdown).await?;
    info!(
        pdf = %pdf.display(),
        markdown = %target.display(),
        chars = markdown.len(),
        "Converted PDF to Markdown"
    );
    Ok(target)
}

/// Runs `pdf-extract` on the PDF bytes off the async executor.
async fn extract_text(pdf_bytes: Vec<u8>) -> Result<String, AppError> {
    let extraction = tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem(&pdf_bytes).map(|s| s.trim().to_string())
    })
    .await?
    .map_err(|err| AppError::Processing(format!("Failed to extract text from PDF: {err}")))?;

    Ok(extraction)
}

/// Joins hard-wrapped paragraph text while preserving structural Markdown lines.
fn reflow_markdown(input: &str) -> String {
    let mut paragraphs = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();

    for line in input.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || is_structural_line(trimmed) {
            if !buffer.is_empty() {
                paragraphs.push(buffer.join(" "));
                buffer.clear();
            }
            if !trimmed.is_empty() {
                paragraphs.push(trimmed.to_string());
            }
            continue;
        }

        buffer.push(trimmed);
    }

    if !buffer.is_empty() {
        paragraphs.push(buffer.join(" "));
    }

    paragraphs.join("\n\n")
}

fn is_structural_line(line: &str) -> bool {
    line.starts_with('#')
        || line.starts_with("- ")
        || line.starts_with("* ")
        || line.starts_with('>')
        || line.starts_with("```")
        || line.starts_with('|')
        || line.chars().next().is_some_and(|c| c.is_ascii_digit()) && line.contains(". ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflow_joins_wrapped_lines_but_keeps_structure() {
        let input = "# Annual report\nRevenue grew\nstrongly this year.\n\n- first item\n- second item\n1. numbered entry";
        let output = reflow_markdown(input);

        assert_eq!(
            output,
            "# Annual report\n\nRevenue grew strongly this year.\n\n- first item\n\n- second item\n\n1. numbered entry"
        );
    }

    #[test]
    fn markdown_sits_next_to_the_pdf() {
        assert_eq!(
            markdown_path(Path::new("/data/reports/q1.pdf")),
            PathBuf::from("/data/reports/q1.md")
        );
    }

    #[tokio::test]
    async fn cached_markdown_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("scan.pdf");
        // Not a real PDF: conversion would fail if it were attempted.
        std::fs::write(&pdf, b"not a pdf").unwrap();
        std::fs::write(markdown_path(&pdf), "# cached").unwrap();

        let path = ensure_markdown(&pdf).await.unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# cached");
    }

    #[tokio::test]
    async fn unreadable_pdf_fails_without_caching() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("broken.pdf");
        std::fs::write(&pdf, b"not a pdf").unwrap();

        let result = ensure_markdown(&pdf).await;
        assert!(result.is_err());
        assert!(!markdown_path(&pdf).exists());
    }
}
