pub mod sheet;
pub mod table;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::campaign::TestMatrix;
use crate::error::{Error, Result};

pub use table::{ColumnType, Table};

/// Identifier columns kept from send lists, in preference order.
pub const IDENTIFIER_COLUMNS: [&str; 5] = [
    "user_id",
    "internal_user_id",
    "prospect_id",
    "external_id",
    "email",
];

/// File names the pipeline writes into campaign directories; never send lists.
fn is_generated_or_template(name: &str) -> bool {
    let lower = name.to_lowercase();
    let stem = lower.rsplit_once('.').map(|(s, _)| s).unwrap_or(&lower);
    stem.ends_with("_template") || stem.ends_with("_report_metrics") || stem == "generated_query"
}

/// All spreadsheet files under `dir`, recursively, sorted by path.
pub fn discover_files(dir: &Path) -> Result<Vec<PathBuf>> {
    sheet::glob_files(dir, &sheet::SHEET_SUFFIXES)
}

/// The target a send-list file belongs to: the longest `target_name` that
/// prefixes the file name, compared case-insensitively.
pub fn target_for_file<'a>(path: &Path, targets: &[&'a str]) -> Option<&'a str> {
    let name = path.file_name()?.to_str()?.to_lowercase();
    targets
        .iter()
        .filter(|t| name.starts_with(&t.to_lowercase()))
        .max_by_key(|t| t.len())
        .copied()
}

/// Result of combining a campaign's send lists.
#[derive(Debug, Clone, Serialize)]
pub struct SendLists {
    pub table: Table,
    pub files: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Read one send list, keeping only identifier columns.
fn process_single_file(path: &Path) -> Result<Table> {
    let sheet = sheet::read_sheet(path)?;
    let keep: Vec<(usize, &str)> = IDENTIFIER_COLUMNS
        .iter()
        .filter_map(|id| sheet.headers.iter().position(|h| h == id).map(|i| (i, *id)))
        .collect();
    let mut table = Table::new(keep.iter().map(|(_, c)| c.to_string()).collect());
    for row in sheet.rows {
        let values: Vec<Option<String>> = keep.iter().map(|(i, _)| row[*i].clone()).collect();
        if values.iter().any(|v| v.is_some()) {
            table.push_row(values)?;
        }
    }
    log::info!("{} processed ({} rows)", path.display(), table.len());
    Ok(table)
}

/// Find every send list in a campaign directory, tag rows with their target
/// and merge the test-matrix columns on by `target_name`.
pub fn process_send_lists(dir: &Path, matrix: &TestMatrix) -> Result<SendLists> {
    let all_files: Vec<PathBuf> = discover_files(dir)?
        .into_iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| !is_generated_or_template(n))
                .unwrap_or(false)
        })
        .collect();
    log::info!("{} files found in {}", all_files.len(), dir.display());

    let targets = matrix.target_names();
    let mut per_file: Vec<(PathBuf, &str, Table)> = Vec::new();
    let mut skipped = Vec::new();
    for path in all_files {
        let Some(target) = target_for_file(&path, &targets) else {
            log::warn!("{} matches no target_name, skipping", path.display());
            skipped.push(path);
            continue;
        };
        let table = process_single_file(&path)?;
        if table.columns.is_empty() {
            log::warn!("{} has no identifier columns, skipping", path.display());
            skipped.push(path);
            continue;
        }
        per_file.push((path, target, table));
    }
    if per_file.is_empty() {
        return Err(Error::Config(format!(
            "no send lists in {} match a target_name",
            dir.display()
        )));
    }

    let id_columns: Vec<&str> = IDENTIFIER_COLUMNS
        .iter()
        .copied()
        .filter(|id| per_file.iter().any(|(_, _, t)| t.column_index(id).is_some()))
        .collect();
    let mut columns: Vec<String> = id_columns.iter().map(|c| c.to_string()).collect();
    columns.extend(matrix.columns().iter().cloned());

    let mut combined = Table::new(columns);
    let mut files = Vec::with_capacity(per_file.len());
    for (path, target, table) in per_file {
        let matrix_row = matrix
            .row_for_target(target)
            .and_then(|i| matrix.row(i))
            .ok_or_else(|| Error::Config(format!("target {target} vanished from matrix")))?;
        let positions: Vec<Option<usize>> =
            id_columns.iter().map(|c| table.column_index(c)).collect();
        for row in &table.rows {
            let mut values: Vec<Option<String>> = positions
                .iter()
                .map(|p| p.and_then(|i| row[i].clone()))
                .collect();
            values.extend(matrix_row.iter().cloned());
            combined.push_row(values)?;
        }
        files.push(path);
    }

    log::info!(
        "Send lists combined from {} files with {} records in {} columns",
        files.len(),
        combined.len(),
        combined.columns.len()
    );
    Ok(SendLists {
        table: combined,
        files,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> TestMatrix {
        TestMatrix::new(
            vec!["target_name".into(), "segment_group".into()],
            vec![
                vec![Some("A".into()), Some("lapsed".into())],
                vec![Some("AB".into()), Some("active".into())],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_target_for_file_prefers_longest_prefix() {
        let targets = vec!["A", "AB"];
        assert_eq!(target_for_file(Path::new("x/ab_list.csv"), &targets), Some("AB"));
        assert_eq!(target_for_file(Path::new("x/A_list.csv"), &targets), Some("A"));
        assert_eq!(target_for_file(Path::new("x/other.csv"), &targets), None);
    }

    #[test]
    fn test_generated_files_excluded() {
        assert!(is_generated_or_template("spring_template.xlsx"));
        assert!(is_generated_or_template("Spring_report_metrics.csv"));
        assert!(!is_generated_or_template("A_list.csv"));
    }

    #[test]
    fn test_process_send_lists_merges_matrix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("A_sends.csv"),
            "Email,User ID,First Name\na@x.com,1,Ann\nb@x.com,,Bo\n",
        )
        .unwrap();
        let nested = dir.path().join("batch2");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("AB_sends.csv"), "email\nc@x.com\n").unwrap();
        std::fs::write(dir.path().join("notes.csv"), "email\nz@x.com\n").unwrap();
        std::fs::write(dir.path().join("promo_template.csv"), "target_name\nA\n").unwrap();

        let lists = process_send_lists(dir.path(), &matrix()).unwrap();
        assert_eq!(
            lists.table.columns,
            vec!["user_id", "email", "segment_group", "target_name"]
        );
        assert_eq!(lists.table.len(), 3);
        assert_eq!(lists.files.len(), 2);
        assert_eq!(lists.skipped.len(), 1);

        let ab = lists
            .table
            .rows
            .iter()
            .find(|r| r[3].as_deref() == Some("AB"))
            .unwrap();
        assert_eq!(ab[0], None);
        assert_eq!(ab[1].as_deref(), Some("c@x.com"));
        assert_eq!(ab[2].as_deref(), Some("active"));
    }

    #[test]
    fn test_no_matching_files_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("other.csv"), "email\nz@x.com\n").unwrap();
        assert!(process_send_lists(dir.path(), &matrix()).is_err());
    }
}
