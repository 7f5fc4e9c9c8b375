//! Turn the aggregated query result into the wide campaign report.

pub mod format;
pub mod rows;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Serialize;

use crate::campaign::CampaignInfo;
use crate::error::{Error, Result};
use crate::metrics::{self, naming, Denominator, Expansion, Format, MetricRequest};

pub use format::{format_value, ratio};
pub use rows::{Cell, ResultSet};

/// The rendered report: one row per (target, responder), one column per
/// metric and promo period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ReportTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx).map(|s| s.as_str())
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.into_inner()
            .map_err(|e| Error::Other(format!("flushing CSV buffer: {e}")))
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_csv_bytes()?)?;
        log::info!("Report written to {}", path.display());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Source {
    Column(String),
    Ratio {
        numerator: String,
        denominator: Denominator,
    },
}

/// A report metric before pivoting.
#[derive(Debug, Clone, PartialEq)]
struct ReportMetric {
    name: String,
    source: Source,
    format: Format,
}

fn push_unique(out: &mut Vec<ReportMetric>, metric: ReportMetric) {
    if !out.iter().any(|m| m.name == metric.name) {
        out.push(metric);
    }
}

/// Report metrics for a request, checked against the result columns.
///
/// Generated nth-box and delivery-schedule columns are discovered from the
/// result by name, through the same naming functions the assembler uses.
fn report_metrics(
    columns: &[String],
    request: &MetricRequest,
    redemptions: bool,
) -> Result<Vec<ReportMetric>> {
    let has = |name: &str| columns.iter().any(|c| c == name);
    let require = |name: &str| {
        if has(name) {
            Ok(())
        } else {
            Err(Error::MissingColumn(name.to_string()))
        }
    };

    let mut out = vec![ReportMetric {
        name: "segment_size".into(),
        source: Source::Column("segment_size".into()),
        format: Format::Count,
    }];
    for spec in request.specs(redemptions) {
        for col in &spec.columns {
            require(&col.name)?;
        }
        let raw_columns: Vec<String> = match spec.expands {
            None => spec.columns.iter().map(|c| c.name.clone()).collect(),
            Some(Expansion::NthBox) => columns
                .iter()
                .filter(|c| naming::nth_from_column(c).is_some())
                .cloned()
                .collect(),
            Some(Expansion::DeliverySchedule) => columns
                .iter()
                .filter(|c| naming::delivery_schedule_from_column(c).is_some())
                .cloned()
                .collect(),
        };
        for raw in &raw_columns {
            push_unique(
                &mut out,
                ReportMetric {
                    name: metrics::report_name(raw).to_string(),
                    source: Source::Column(raw.clone()),
                    format: metrics::raw_format(raw),
                },
            );
        }
        for derived in &spec.derived {
            require(&derived.numerator)?;
            if let Denominator::Column(col) = &derived.denominator {
                require(col)?;
            }
            push_unique(
                &mut out,
                ReportMetric {
                    name: derived.name.clone(),
                    source: Source::Ratio {
                        numerator: derived.numerator.clone(),
                        denominator: derived.denominator.clone(),
                    },
                    format: derived.format,
                },
            );
        }
        if spec.expands.is_some() {
            for raw in raw_columns {
                push_unique(
                    &mut out,
                    ReportMetric {
                        name: format!("{raw}_rate"),
                        source: Source::Ratio {
                            numerator: raw,
                            denominator: Denominator::SegmentSize,
                        },
                        format: Format::Percent,
                    },
                );
            }
        }
    }
    Ok(out)
}

/// Aggregated values of one (target, responder) row, per promo period.
#[derive(Debug, Default)]
struct Group {
    descriptive: Vec<String>,
    periods: HashMap<String, HashMap<String, f64>>,
}

impl Group {
    fn value(&self, period: &str, column: &str) -> Option<f64> {
        self.periods.get(period)?.get(column).copied()
    }

    fn size(&self, period: &str) -> f64 {
        self.value(period, "segment_size").unwrap_or(0.0)
    }
}

/// Pivot the aggregated result into the report table.
///
/// `matrix_columns` are the test-matrix columns the query grouped by.
pub fn render_report(
    result: &ResultSet,
    info: &CampaignInfo,
    matrix_columns: &[String],
) -> Result<ReportTable> {
    let require = |name: &str| {
        result
            .column_index(name)
            .ok_or_else(|| Error::MissingColumn(name.to_string()))
    };
    let target_idx = require("target_name")?;
    let period_idx = require("promo_period")?;
    let responder_idx = require("responder")?;
    let descriptive: Vec<(&str, usize)> = matrix_columns
        .iter()
        .filter(|c| c.as_str() != "target_name")
        .map(|c| require(c).map(|i| (c.as_str(), i)))
        .collect::<Result<_>>()?;

    let redemptions = result.column_index("redeemed").is_some();
    let report = report_metrics(&result.columns, &info.metrics, redemptions)?;

    let mut needed: Vec<&str> = Vec::new();
    for m in &report {
        let cols: Vec<&str> = match &m.source {
            Source::Column(c) => vec![c.as_str()],
            Source::Ratio {
                numerator,
                denominator,
            } => match denominator {
                Denominator::Column(d) => vec![numerator.as_str(), d.as_str()],
                _ => vec![numerator.as_str()],
            },
        };
        for c in cols {
            if !needed.contains(&c) {
                needed.push(c);
            }
        }
    }
    let needed: Vec<(&str, usize)> = needed
        .into_iter()
        .map(|c| require(c).map(|i| (c, i)))
        .collect::<Result<_>>()?;

    let mut periods: Vec<String> = info.period_ends.iter().map(|p| p.name.clone()).collect();
    // Keyed by (target, not responder) so responders sort first.
    let mut groups: BTreeMap<(String, bool), Group> = BTreeMap::new();
    for row in &result.rows {
        let target = row[target_idx].as_text();
        let responder = row[responder_idx].as_bool();
        let period = row[period_idx].as_text();
        if !periods.contains(&period) {
            periods.push(period.clone());
        }
        let group = groups.entry((target, !responder)).or_insert_with(|| Group {
            descriptive: descriptive.iter().map(|(_, i)| row[*i].as_text()).collect(),
            periods: HashMap::new(),
        });
        let values = group.periods.entry(period).or_default();
        for (col, i) in &needed {
            if let Some(v) = row[*i].as_f64() {
                *values.entry(col.to_string()).or_insert(0.0) += v;
            }
        }
    }

    let mut columns = vec!["target_name".to_string(), "responder".to_string()];
    columns.extend(descriptive.iter().map(|(c, _)| c.to_string()));
    columns.push("response_rate".to_string());
    for m in &report {
        for p in &periods {
            columns.push(format!("{}_{p}", m.name));
        }
    }

    let mut sizes: HashMap<&str, (f64, f64)> = HashMap::new();
    for ((target, not_responder), group) in &groups {
        let total: f64 = periods.iter().map(|p| group.size(p)).sum();
        let entry = sizes.entry(target.as_str()).or_insert((0.0, 0.0));
        if !not_responder {
            entry.0 += total;
        }
        entry.1 += total;
    }

    let mut rows = Vec::with_capacity(groups.len());
    for ((target, not_responder), group) in &groups {
        let mut row = vec![
            target.clone(),
            if *not_responder { "non-responder" } else { "responder" }.to_string(),
        ];
        row.extend(group.descriptive.iter().cloned());
        let (responders, total) = sizes.get(target.as_str()).copied().unwrap_or_default();
        let response_rate = ratio(Some(responders), Some(total)).unwrap_or(0.0);
        row.push(format_value(Some(response_rate), Format::Percent));

        for m in &report {
            for p in &periods {
                let value = match &m.source {
                    Source::Column(c) => group.value(p, c),
                    Source::Ratio {
                        numerator,
                        denominator,
                    } => {
                        let den = match denominator {
                            Denominator::SegmentSize => group.value(p, "segment_size"),
                            Denominator::Column(c) => group.value(p, c),
                            Denominator::CohortWeeks => {
                                group.value(p, "segment_size").map(|s| 4.0 * s)
                            }
                        };
                        ratio(group.value(p, numerator), den)
                    }
                };
                row.push(format_value(value, m.format));
            }
        }
        rows.push(row);
    }

    log::info!(
        "Report has {} rows and {} columns over {} promo periods",
        rows.len(),
        columns.len(),
        periods.len()
    );
    Ok(ReportTable { columns, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::tests::sample_fields;

    fn info_with(extra: &[(&'static str, &'static str)]) -> CampaignInfo {
        let mut fields = sample_fields();
        fields.extend_from_slice(extra);
        CampaignInfo::from_fields(fields).unwrap()
    }

    fn matrix_columns() -> Vec<String> {
        vec!["segment_group".into(), "target_name".into()]
    }

    fn text(s: &str) -> Cell {
        Cell::Text(s.into())
    }

    /// Rows shaped like the local warehouse returns them: booleans as 0/1.
    fn result(extra_columns: &[&str], rows: Vec<Vec<Cell>>) -> ResultSet {
        let mut columns: Vec<String> = [
            "segment_group",
            "target_name",
            "promo_period",
            "start_date",
            "end_date",
            "responder",
            "segment_size",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect();
        columns.extend(extra_columns.iter().map(|c| c.to_string()));
        ResultSet { columns, rows }
    }

    fn row(target: &str, period: &str, responder: i64, size: i64, extra: &[Cell]) -> Vec<Cell> {
        let end = if period == "week1" { "2024-01-07" } else { "2024-01-14" };
        let mut r = vec![
            text("lapsed"),
            text(target),
            text(period),
            text("2024-01-01"),
            text(end),
            Cell::Int(responder),
            Cell::Int(size),
        ];
        r.extend_from_slice(extra);
        r
    }

    fn cancel_result() -> ResultSet {
        result(
            &["canceled"],
            vec![
                row("A", "week1", 0, 8, &[Cell::Int(0)]),
                row("A", "week1", 1, 2, &[Cell::Int(1)]),
                row("A", "week2", 0, 8, &[Cell::Int(0)]),
                row("A", "week2", 1, 2, &[Cell::Int(2)]),
                row("B", "week1", 0, 5, &[Cell::Int(0)]),
                row("B", "week2", 0, 5, &[Cell::Int(0)]),
            ],
        )
    }

    #[test]
    fn test_render_pivots_by_period() {
        let report = render_report(&cancel_result(), &info_with(&[]), &matrix_columns()).unwrap();
        assert_eq!(
            &report.columns[..8],
            &[
                "target_name",
                "responder",
                "segment_group",
                "response_rate",
                "segment_size_week1",
                "segment_size_week2",
                "cancelations_week1",
                "cancelations_week2",
            ]
        );
        assert!(report.column_index("cancelation_rate_week2").is_some());
        assert!(report.column_index("canceled_week1").is_none());

        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.cell(0, "target_name"), Some("A"));
        assert_eq!(report.cell(0, "responder"), Some("responder"));
        assert_eq!(report.cell(1, "responder"), Some("non-responder"));
        assert_eq!(report.cell(0, "response_rate"), Some("20.00%"));
        assert_eq!(report.cell(1, "response_rate"), Some("20.00%"));
        assert_eq!(report.cell(0, "cancelation_rate_week2"), Some("100.00%"));
        assert_eq!(report.cell(0, "segment_group"), Some("lapsed"));
    }

    #[test]
    fn test_zero_responders_rate_is_zero() {
        let report = render_report(&cancel_result(), &info_with(&[]), &matrix_columns()).unwrap();
        assert_eq!(report.cell(2, "target_name"), Some("B"));
        assert_eq!(report.cell(2, "responder"), Some("non-responder"));
        assert_eq!(report.cell(2, "response_rate"), Some("0.00%"));
    }

    #[test]
    fn test_pivot_preserves_period_totals() {
        let result = cancel_result();
        let report = render_report(&result, &info_with(&[]), &matrix_columns()).unwrap();
        for period in ["week1", "week2"] {
            let expected: i64 = result
                .rows
                .iter()
                .filter(|r| r[2] == text(period))
                .filter_map(|r| match r[6] {
                    Cell::Int(n) => Some(n),
                    _ => None,
                })
                .sum();
            let column = format!("segment_size_{period}");
            let pivoted: i64 = (0..report.rows.len())
                .map(|i| report.cell(i, &column).unwrap().parse::<i64>().unwrap())
                .sum();
            assert_eq!(pivoted, expected);
        }
    }

    #[test]
    fn test_division_by_zero_renders_empty() {
        let info = info_with(&[("aov", "yes"), ("dessert_take_rate", "yes")]);
        let rs = result(
            &["canceled", "total_boxes_ordered", "gov", "desserts_ordered"],
            vec![
                row(
                    "A",
                    "week1",
                    0,
                    3,
                    &[Cell::Int(0), Cell::Int(0), Cell::Float(0.0), Cell::Int(0)],
                ),
                row(
                    "A",
                    "week2",
                    0,
                    3,
                    &[Cell::Int(0), Cell::Int(2), Cell::Float(2469.0), Cell::Int(1)],
                ),
            ],
        );
        let report = render_report(&rs, &info, &matrix_columns()).unwrap();
        assert_eq!(report.cell(0, "aov_week1"), Some(""));
        assert_eq!(report.cell(0, "dessert_take_rate_week1"), Some(""));
        assert_eq!(report.cell(0, "aov_week2"), Some("$1,234.50"));
        assert_eq!(report.cell(0, "gov_week2"), Some("$2,469.00"));
        assert_eq!(report.cell(0, "dessert_take_rate_week2"), Some("50.00%"));
        assert_eq!(report.cell(0, "response_rate"), Some("0.00%"));
        for cell in &report.rows[0] {
            assert!(!cell.contains("NaN") && !cell.contains("inf"));
        }
    }

    #[test]
    fn test_nth_box_columns_discovered() {
        let info = info_with(&[("ordered_nth_box", "1, 4")]);
        let rs = result(
            &["canceled", "ordered_1st_box", "ordered_4th_box"],
            vec![row("A", "week1", 0, 4, &[Cell::Int(0), Cell::Int(1), Cell::Int(2)])],
        );
        let report = render_report(&rs, &info, &matrix_columns()).unwrap();
        let generated: Vec<&String> = report
            .columns
            .iter()
            .filter(|c| c.starts_with("ordered_"))
            .collect();
        assert_eq!(
            generated,
            vec![
                "ordered_1st_box_week1",
                "ordered_1st_box_week2",
                "ordered_4th_box_week1",
                "ordered_4th_box_week2",
                "ordered_1st_box_rate_week1",
                "ordered_1st_box_rate_week2",
                "ordered_4th_box_rate_week1",
                "ordered_4th_box_rate_week2",
            ]
        );
        assert_eq!(report.cell(0, "ordered_4th_box_rate_week1"), Some("50.00%"));
        assert_eq!(report.cell(0, "ordered_4th_box_week2"), Some(""));
    }

    #[test]
    fn test_drift_is_reported() {
        let info = info_with(&[("ordered_nth_box", "1, 4")]);
        let rs = result(
            &["canceled", "ordered_1st_box"],
            vec![row("A", "week1", 0, 4, &[Cell::Int(0), Cell::Int(1)])],
        );
        let err = render_report(&rs, &info, &matrix_columns()).unwrap_err();
        assert!(matches!(err, Error::MissingColumn(ref c) if c == "ordered_4th_box"));

        let info = info_with(&[("aov", "yes")]);
        let rs = result(
            &["canceled", "total_boxes_ordered"],
            vec![row("A", "week1", 0, 4, &[Cell::Int(0), Cell::Int(1)])],
        );
        assert!(matches!(
            render_report(&rs, &info, &matrix_columns()),
            Err(Error::MissingColumn(_))
        ));
    }

    #[test]
    fn test_exported_results_render() {
        let csv = "segment_group,target_name,promo_period,start_date,end_date,responder,segment_size,canceled
lapsed,A,week1,2024-01-01,2024-01-07,t,2,1
lapsed,A,week1,2024-01-01,2024-01-07,f,8,0
";
        let rs = ResultSet::from_csv_bytes(csv.as_bytes()).unwrap();
        let report = render_report(&rs, &info_with(&[]), &matrix_columns()).unwrap();
        assert_eq!(report.cell(0, "responder"), Some("responder"));
        assert_eq!(report.cell(0, "cancelation_rate_week1"), Some("50.00%"));
        assert_eq!(report.cell(1, "segment_size_week1"), Some("8"));

        let bytes = report.to_csv_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("target_name,responder,segment_group,response_rate,"));
    }
}
