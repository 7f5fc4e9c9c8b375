use std::collections::HashSet;

use serde::Serialize;

use crate::error::{Error, Result};

/// Test-matrix columns a template may carry, in report order.
pub const TEST_MATRIX_COLUMNS: [&str; 9] = [
    "test_group",
    "segment_group",
    "offer_group",
    "target_name",
    "creative_template_name",
    "population_name",
    "offer_campaign_name",
    "discount_name",
    "message_offer",
];

/// Which redemption table the campaign lists join against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiscountShape {
    /// `marketing_offers`, matched on offer campaign (and discount, when given).
    OfferCampaign,
    /// `marketing_discounts`, matched on discount name.
    DiscountName,
}

/// The experiment design: one row per target cell.
///
/// Columns are the subset of [`TEST_MATRIX_COLUMNS`] present in the template,
/// always in that order. `target_name` is mandatory and unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestMatrix {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl TestMatrix {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Result<Self> {
        for col in &columns {
            if !TEST_MATRIX_COLUMNS.contains(&col.as_str()) {
                return Err(Error::Config(format!("{col} is not a test matrix column")));
            }
        }
        let target_idx = columns
            .iter()
            .position(|c| c == "target_name")
            .ok_or_else(|| Error::Config("test matrix has no target_name column".into()))?;

        let ordered: Vec<String> = TEST_MATRIX_COLUMNS
            .iter()
            .filter(|c| columns.iter().any(|have| have == *c))
            .map(|c| c.to_string())
            .collect();
        let mapping: Vec<usize> = ordered
            .iter()
            .map(|c| columns.iter().position(|have| have == c).unwrap_or_default())
            .collect();

        let mut seen = HashSet::new();
        let mut out_rows = Vec::with_capacity(rows.len());
        for row in rows {
            let target = row
                .get(target_idx)
                .cloned()
                .flatten()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .ok_or_else(|| Error::Config("test matrix row has no target_name".into()))?;
            if !seen.insert(target.clone()) {
                return Err(Error::Config(format!(
                    "duplicate target_name in test matrix: {target}"
                )));
            }
            let reordered: Vec<Option<String>> = mapping
                .iter()
                .zip(&ordered)
                .map(|(&i, col)| {
                    if col == "target_name" {
                        Some(target.clone())
                    } else {
                        row.get(i)
                            .cloned()
                            .flatten()
                            .map(|v| v.trim().to_string())
                            .filter(|v| !v.is_empty())
                    }
                })
                .collect();
            out_rows.push(reordered);
        }
        if out_rows.is_empty() {
            return Err(Error::Config("test matrix has no rows".into()));
        }

        Ok(Self {
            columns: ordered,
            rows: out_rows,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in row `row`, `None` when blank or absent.
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(idx)?.as_deref()
    }

    pub fn target_names(&self) -> Vec<&str> {
        (0..self.rows.len())
            .filter_map(|i| self.get(i, "target_name"))
            .collect()
    }

    pub fn row_for_target(&self, target: &str) -> Option<usize> {
        (0..self.rows.len()).find(|&i| self.get(i, "target_name") == Some(target))
    }

    /// Row values keyed by column, for merging onto send-list rows.
    pub fn row(&self, row: usize) -> Option<&[Option<String>]> {
        self.rows.get(row).map(|r| r.as_slice())
    }

    /// The redemption join the matrix calls for, if any.
    ///
    /// Any populated `offer_campaign_name` selects the offer-campaign shape;
    /// otherwise any populated `discount_name` selects the discount shape.
    pub fn discount_shape(&self) -> Option<DiscountShape> {
        let any = |col: &str| (0..self.rows.len()).any(|i| self.get(i, col).is_some());
        if any("offer_campaign_name") {
            Some(DiscountShape::OfferCampaign)
        } else if any("discount_name") {
            Some(DiscountShape::DiscountName)
        } else {
            None
        }
    }
}
