use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::ingest::sheet::{self, Sheet};

use super::{Campaign, CampaignInfo, TestMatrix, TEST_MATRIX_COLUMNS};

const TEMPLATE_SUFFIXES: [&str; 2] = ["_template.xlsx", "_template.csv"];

/// Find the campaign template under `dir`, searching subdirectories too.
///
/// More than one template is ambiguous and rejected.
pub fn find_template(dir: &Path) -> Result<PathBuf> {
    if !dir.is_dir() {
        return Err(Error::Config(format!(
            "campaign directory {} does not exist",
            dir.display()
        )));
    }
    let mut found = sheet::glob_files(dir, &TEMPLATE_SUFFIXES)?;
    match found.len() {
        0 => Err(Error::Config(format!(
            "no *_template.xlsx or *_template.csv in {}",
            dir.display()
        ))),
        1 => Ok(found.remove(0)),
        _ => Err(Error::Config(format!(
            "more than one template in {}: {}",
            dir.display(),
            found
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// Split a template sheet into scalar metadata (first row) and the test matrix.
pub fn parse_template(sheet: &Sheet) -> Result<(CampaignInfo, TestMatrix)> {
    let matrix_idx: Vec<usize> = (0..sheet.headers.len())
        .filter(|&i| TEST_MATRIX_COLUMNS.contains(&sheet.headers[i].as_str()))
        .collect();

    let first = sheet
        .rows
        .first()
        .ok_or_else(|| Error::Config("template has no data rows".into()))?;
    let fields = sheet
        .headers
        .iter()
        .enumerate()
        .filter(|(i, h)| !matrix_idx.contains(i) && !h.is_empty())
        .map(|(i, h)| (h.as_str(), first[i].as_deref().unwrap_or("")));
    let info = CampaignInfo::from_fields(fields)?;

    let columns: Vec<String> = matrix_idx.iter().map(|&i| sheet.headers[i].clone()).collect();
    let rows: Vec<Vec<Option<String>>> = sheet
        .rows
        .iter()
        .map(|row| matrix_idx.iter().map(|&i| row[i].clone()).collect::<Vec<_>>())
        .filter(|row: &Vec<Option<String>>| row.iter().any(|v| v.is_some()))
        .collect();
    let matrix = TestMatrix::new(columns, rows)?;
    Ok((info, matrix))
}

/// Locate and parse the template of the campaign in `dir`.
pub fn load_campaign(dir: &Path) -> Result<Campaign> {
    let template_path = find_template(dir)?;
    log::info!("Reading template {}", template_path.display());
    let sheet = sheet::read_sheet(&template_path)?;
    let (info, matrix) = parse_template(&sheet).map_err(|e| match e {
        Error::Config(message) => Error::Template {
            path: template_path.display().to_string(),
            message,
        },
        other => other,
    })?;
    log::info!(
        "Campaign {} with {} test cells and {} promo periods",
        info.campaign_name,
        matrix.len(),
        info.period_ends.len()
    );
    Ok(Campaign {
        dir: dir.to_path_buf(),
        template_path,
        info,
        matrix,
    })
}
