use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, DataType, Reader};
use tracing::{debug, warn};

use common::error::AppError;

/// Placeholder written for empty cells.
pub const EMPTY_CELL: &str = "nan";

const TRANSPOSED_SUFFIX: &str = "_transposed";

/// A sheet as plain strings, first row holding the column headers.
pub type Table = Vec<Vec<String>>;

pub fn is_tabular(path: &Path) -> bool {
    matches!(
        extension(path).as_deref(),
        Some("xlsx" | "xlsm" | "xls" | "ods" | "csv")
    )
}

/// `<stem>_transposed.csv` next to the source table.
pub fn transposed_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}{TRANSPOSED_SUFFIX}.csv"))
}

/// Loads the first non-empty sheet of a spreadsheet, or the whole CSV file.
pub async fn read_table(path: &Path) -> Result<Table, AppError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        if extension(&path).as_deref() == Some("csv") {
            read_csv(&path)
        } else {
            read_workbook(&path)
        }
    })
    .await?
}

/// Writes the transposed copy of `table` next to `source` and returns its path.
pub async fn write_transposed(source: &Path, table: &Table) -> Result<PathBuf, AppError> {
    let target = transposed_path(source);
    let transposed = transpose(table);
    let destination = target.clone();

    tokio::task::spawn_blocking(move || write_csv(&destination, &transposed)).await??;
    debug!(transposed = %target.display(), "Wrote transposed table");
    Ok(target)
}

/// One line per data row, rendered as `header: value` pairs.
pub fn render_rows(table: &Table) -> String {
    let Some((headers, rows)) = table.split_first() else {
        return String::new();
    };

    rows.iter()
        .map(|row| {
            headers
                .iter()
                .enumerate()
                .map(|(index, header)| {
                    let value = row.get(index).map_or("", String::as_str);
                    format!("{header}: {}", cell_or_nan(value))
                })
                .collect::<Vec<_>>()
                .join(", ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders `(row,col):value,` tuples using the first column as row labels and
/// the first row as column labels.
///
/// A chunk is flushed once it grows past `chunk_size` characters and at the
/// end of every row.
pub fn render_cell_tuples(table: &Table, chunk_size: usize) -> Vec<String> {
    let Some((header, rows)) = table.split_first() else {
        return Vec::new();
    };

    let mut chunks = Vec::new();
    for row in rows {
        let label = row.first().map_or("", String::as_str);
        let mut buffer = String::new();
        let mut buffer_chars = 0;

        for (index, column) in header.iter().enumerate().skip(1) {
            let value = row.get(index).map_or("", String::as_str);
            let tuple = format!("({label},{column}):{},", cell_or_nan(value));
            buffer_chars += tuple.chars().count();
            buffer.push_str(&tuple);

            if buffer_chars > chunk_size {
                chunks.push(std::mem::take(&mut buffer));
                buffer_chars = 0;
            }
        }

        if !buffer.is_empty() {
            chunks.push(buffer);
        }
    }
    chunks
}

pub fn transpose(table: &Table) -> Table {
    let width = table.iter().map(Vec::len).max().unwrap_or(0);
    (0..width)
        .map(|column| {
            table
                .iter()
                .map(|row| row.get(column).cloned().unwrap_or_default())
                .collect()
        })
        .collect()
}

fn cell_or_nan(value: &str) -> &str {
    if value.trim().is_empty() {
        EMPTY_CELL
    } else {
        value
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

fn read_csv(path: &Path) -> Result<Table, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|err| AppError::Processing(format!("failed to open csv: {err}")))?;

    let mut table = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|err| AppError::Processing(format!("failed to read csv row: {err}")))?;
        table.push(record.iter().map(str::to_string).collect());
    }
    Ok(table)
}

fn read_workbook(path: &Path) -> Result<Table, AppError> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|err| AppError::Processing(format!("failed to read workbook: {err}")))?;

    let sheet_names = workbook.sheet_names().to_owned();
    for sheet_name in &sheet_names {
        let range = match workbook.worksheet_range(sheet_name) {
            Some(Ok(range)) => range,
            Some(Err(err)) => {
                warn!(sheet = %sheet_name, error = %err, "Skipping unreadable sheet");
                continue;
            }
            None => continue,
        };
        if range.is_empty() {
            continue;
        }

        return Ok(range
            .rows()
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect());
    }

    Ok(Vec::new())
}

fn cell_to_string(cell: &DataType) -> String {
    match cell {
        DataType::Empty => String::new(),
        DataType::String(s) | DataType::DateTimeIso(s) | DataType::DurationIso(s) => s.clone(),
        DataType::Float(v) | DataType::DateTime(v) | DataType::Duration(v) => v.to_string(),
        DataType::Int(v) => v.to_string(),
        DataType::Bool(b) => b.to_string(),
        DataType::Error(e) => format!("#{e:?}"),
    }
}

fn write_csv(path: &Path, table: &Table) -> Result<(), AppError> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|err| AppError::Processing(format!("failed to create csv: {err}")))?;
    for row in table {
        writer
            .write_record(row)
            .map_err(|err| AppError::Processing(format!("failed to write csv row: {err}")))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[&[&str]]) -> Table {
        rows.iter()
            .map(|row| row.iter().map(ToString::to_string).collect())
            .collect()
    }

    #[test]
    fn rows_render_as_header_value_pairs() {
        let sales = table(&[&["year", "revenue"], &["2023", "10"], &["2024", ""]]);

        assert_eq!(
            render_rows(&sales),
            "year: 2023, revenue: 10\nyear: 2024, revenue: nan"
        );
    }

    #[test]
    fn tuples_use_labels_and_nan_for_empty_cells() {
        let sales = table(&[&["metric", "2023", "2024"], &["revenue", "10", ""]]);

        assert_eq!(
            render_cell_tuples(&sales, 1000),
            vec!["(revenue,2023):10,(revenue,2024):nan,".to_string()]
        );
    }

    #[test]
    fn tuples_flush_when_buffer_exceeds_chunk_size_and_per_row() {
        let wide = table(&[
            &["k", "a", "b", "c"],
            &["r1", "1", "2", "3"],
            &["r2", "4", "5", "6"],
        ]);

        // Every tuple is 9 characters long, so a limit of 10 flushes after two.
        let chunks = render_cell_tuples(&wide, 10);
        assert_eq!(
            chunks,
            vec![
                "(r1,a):1,(r1,b):2,".to_string(),
                "(r1,c):3,".to_string(),
                "(r2,a):4,(r2,b):5,".to_string(),
                "(r2,c):6,".to_string(),
            ]
        );
    }

    #[test]
    fn transpose_pads_ragged_rows() {
        let ragged = table(&[&["a", "b", "c"], &["1"]]);
        assert_eq!(
            transpose(&ragged),
            table(&[&["a", "1"], &["b", ""], &["c", ""]])
        );
    }

    #[test]
    fn transposed_path_adds_suffix_and_csv_extension() {
        assert_eq!(
            transposed_path(Path::new("/data/sales.xlsx")),
            PathBuf::from("/data/sales_transposed.csv")
        );
        assert!(is_tabular(Path::new("report.XLSX")));
        assert!(!is_tabular(Path::new("report.pdf")));
    }

    #[tokio::test]
    async fn csv_round_trips_through_transposed_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("sales.csv");
        std::fs::write(&source, "year,revenue\n2023,10\n2024,12\n").unwrap();

        let loaded = read_table(&source).await.unwrap();
        assert_eq!(loaded.len(), 3);

        let transposed = write_transposed(&source, &loaded).await.unwrap();
        let reloaded = read_table(&transposed).await.unwrap();
        assert_eq!(
            reloaded,
            table(&[&["year", "2023", "2024"], &["revenue", "10", "12"]])
        );
    }
}
