use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use crate::date_util::format_date;
use crate::error::{Error, Result};

static RE_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").unwrap());

/// Check that `value` is safe to splice into SQL as a bare identifier.
/// `what` names the value in the error message.
pub fn validate_identifier<'a>(what: &str, value: &'a str) -> Result<&'a str> {
    if value.len() <= 127 && RE_IDENTIFIER.is_match(value) {
        Ok(value)
    } else {
        Err(Error::Config(format!(
            "{what} `{value}` must be lower-case letters, digits and underscores, starting with a letter"
        )))
    }
}

/// SQL flavor a generated query is rendered for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// The local warehouse; queries are executed.
    #[default]
    Sqlite,
    /// Columnar cloud warehouse; queries are written out for external execution.
    Redshift,
}

impl Dialect {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "redshift" => Ok(Dialect::Redshift),
            other => Err(Error::Config(format!(
                "unknown dialect `{other}` (expected sqlite or redshift)"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Redshift => "redshift",
        }
    }

    /// The uploaded send-list table.
    pub fn upload_table(&self, name: &str) -> String {
        match self {
            Dialect::Sqlite => name.to_string(),
            Dialect::Redshift => format!("analytics.{name}"),
        }
    }

    /// A warehouse fact or dimension table.
    pub fn fact_table(&self, name: &str) -> String {
        match self {
            Dialect::Sqlite => name.to_string(),
            Dialect::Redshift => format!("dw.{name}"),
        }
    }

    /// Placeholder for the `n`th bound parameter (1-based).
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{n}"),
            Dialect::Redshift => format!("${n}"),
        }
    }

    pub fn date_literal(&self, d: NaiveDate) -> String {
        match self {
            Dialect::Sqlite => format!("'{}'", format_date(d)),
            Dialect::Redshift => format!("CAST('{}' AS DATE)", format_date(d)),
        }
    }

    /// Calendar date of an event timestamp, in the business's local time.
    pub fn event_date(&self, expr: &str) -> String {
        match self {
            Dialect::Sqlite => format!("DATE({expr})"),
            Dialect::Redshift => {
                format!("DATE(convert_timezone('America/New_York', {expr}))")
            }
        }
    }

    /// Whole calendar weeks (Monday-aligned) from `from` to `to`.
    pub fn week_diff(&self, from: &str, to: &str) -> String {
        match self {
            Dialect::Sqlite => format!(
                "CAST((julianday(date({to}, 'weekday 0', '-6 days')) - julianday(date({from}, 'weekday 0', '-6 days'))) / 7 AS INTEGER)"
            ),
            Dialect::Redshift => format!("DATEDIFF(week, {from}, {to})"),
        }
    }

    /// Text value at `path` inside a JSON payload column.
    pub fn json_path(&self, expr: &str, path: &[&str]) -> String {
        match self {
            Dialect::Sqlite => format!("json_extract({expr}, '$.{}')", path.join(".")),
            Dialect::Redshift => {
                let keys: Vec<String> = path.iter().map(|k| format!("'{k}'")).collect();
                format!("json_extract_path_text({expr}, {})", keys.join(", "))
            }
        }
    }

    /// Numeric value at `path` inside a JSON payload column.
    pub fn json_number(&self, expr: &str, path: &[&str]) -> String {
        match self {
            Dialect::Sqlite => format!("CAST({} AS REAL)", self.json_path(expr, path)),
            Dialect::Redshift => {
                format!("CAST(NULLIF({}, '') AS FLOAT)", self.json_path(expr, path))
            }
        }
    }
}
