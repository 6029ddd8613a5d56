use std::path::{Path, PathBuf};

use text_splitter::{ChunkConfig, TextSplitter};
use tracing::{debug, warn};

use common::error::AppError;

use crate::utils::{pdf_conversion, tabular};

/// Chunks produced from one file variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkList {
    /// File the ledger entry is keyed by.
    pub source: PathBuf,
    /// True for generated variants such as the transposed copy of a table.
    pub derived: bool,
    /// Files removed from disk when this list turns out empty.
    pub cleanup: Vec<PathBuf>,
    pub chunks: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl DocumentSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, AppError> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(AppError::Validation(format!(
                "chunk overlap ({chunk_overlap}) must be smaller than a non-zero chunk size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Splits `path` into one chunk list per variant, original first.
    #[tracing::instrument(skip_all, fields(component = "splitter", path = %path.display()))]
    pub async fn split(&self, path: &Path) -> Result<Vec<ChunkList>, AppError> {
        let lists = if is_pdf(path) {
            let markdown = pdf_conversion::ensure_markdown(path).await?;
            let chunks = self.split_text_file(&markdown).await?;
            vec![ChunkList {
                source: path.to_path_buf(),
                derived: false,
                cleanup: vec![path.to_path_buf(), markdown],
                chunks,
            }]
        } else if tabular::is_tabular(path) {
            let table = tabular::read_table(path).await?;
            let transposed_path = tabular::write_transposed(path, &table).await?;
            let transposed = tabular::transpose(&table);

            vec![
                ChunkList {
                    source: path.to_path_buf(),
                    derived: false,
                    cleanup: vec![path.to_path_buf(), transposed_path.clone()],
                    chunks: self.split_text(&tabular::render_rows(&table))?,
                },
                ChunkList {
                    source: transposed_path.clone(),
                    derived: true,
                    cleanup: vec![transposed_path],
                    chunks: tabular::render_cell_tuples(&transposed, self.chunk_size),
                },
            ]
        } else {
            vec![ChunkList {
                source: path.to_path_buf(),
                derived: false,
                cleanup: vec![path.to_path_buf()],
                chunks: self.split_text_file(path).await?,
            }]
        };

        for list in &lists {
            debug!(
                source = %list.source.display(),
                derived = list.derived,
                chunks = list.chunks.len(),
                "Split file variant"
            );
        }
        Ok(lists)
    }

    async fn split_text_file(&self, path: &Path) -> Result<Vec<String>, AppError> {
        let bytes = tokio::fs::read(path).await?;
        match String::from_utf8(bytes) {
            Ok(text) => self.split_text(&text),
            Err(_) => {
                warn!(path = %path.display(), "File is not valid UTF-8 text, nothing to split");
                Ok(Vec::new())
            }
        }
    }

    /// Heading-aware pass followed by an overlapping character split.
    pub fn split_text(&self, text: &str) -> Result<Vec<String>, AppError> {
        let config = ChunkConfig::new(self.chunk_size)
            .with_overlap(self.chunk_overlap)
            .map_err(|e| AppError::Validation(format!("invalid chunk overlap: {e}")))?;
        let splitter = TextSplitter::new(config);

        Ok(heading_sections(text)
            .iter()
            .flat_map(|section| splitter.chunks(section))
            .filter(|chunk| !chunk.trim().is_empty())
            .map(str::to_owned)
            .collect())
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

/// Splits Markdown before every `#`, `##` or `###` heading, keeping the
/// heading with its section. Fenced code blocks are never split.
fn heading_sections(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }

        if !in_fence && is_split_heading(trimmed) && !current.trim().is_empty() {
            sections.push(std::mem::take(&mut current));
        }

        current.push_str(line);
        current.push('\n');
    }

    if !current.trim().is_empty() {
        sections.push(current);
    }
    sections
}

fn is_split_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=3).contains(&hashes)
        && line[hashes..]
            .chars()
            .next()
            .is_none_or(char::is_whitespace)
}
