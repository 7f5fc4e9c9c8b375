use serde::Serialize;

use crate::error::{Error, Result};

/// Column type inferred from the values of an in-memory table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnType {
    Boolean,
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Integer => "BIGINT",
            ColumnType::Real => "DOUBLE PRECISION",
            ColumnType::Text => "VARCHAR(256)",
        }
    }

    fn of_value(v: &str) -> ColumnType {
        if v.parse::<i64>().is_ok() {
            ColumnType::Integer
        } else if v.parse::<f64>().is_ok_and(f64::is_finite) {
            ColumnType::Real
        } else if matches!(v.to_lowercase().as_str(), "true" | "false") {
            ColumnType::Boolean
        } else {
            ColumnType::Text
        }
    }

    /// Widen `self` so it can also hold a value of type `other`.
    fn merge(self, other: ColumnType) -> ColumnType {
        use ColumnType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Integer, Real) | (Real, Integer) => Real,
            _ => Text,
        }
    }
}

/// Rows of optional strings under named columns; the shape send lists take
/// between ingestion and the warehouse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn push_row(&mut self, row: Vec<Option<String>>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::Other(format!(
                "row has {} values for {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Column types inferred from non-null values. All-null columns are text.
    pub fn infer_types(&self) -> Vec<ColumnType> {
        (0..self.columns.len())
            .map(|i| {
                self.rows
                    .iter()
                    .filter_map(|r| r[i].as_deref())
                    .map(ColumnType::of_value)
                    .reduce(ColumnType::merge)
                    .unwrap_or(ColumnType::Text)
            })
            .collect()
    }

    /// Serialize with a header row; nulls become empty fields.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))?;
        }
        wtr.into_inner()
            .map_err(|e| Error::Other(format!("flushing CSV buffer: {e}")))
    }

    /// Inverse of [`Table::to_csv_bytes`]; empty fields read back as null.
    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().from_reader(bytes);
        let columns: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        let mut table = Table::new(columns);
        for record in rdr.records() {
            let record = record?;
            let row = record
                .iter()
                .map(|v| (!v.is_empty()).then(|| v.to_string()))
                .collect();
            table.push_row(row)?;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut t = Table::new(vec!["user_id".into(), "email".into(), "score".into()]);
        t.push_row(vec![Some("1".into()), Some("a@x.com".into()), Some("2".into())])
            .unwrap();
        t.push_row(vec![None, Some("b@x.com".into()), Some("2.5".into())])
            .unwrap();
        t
    }

    #[test]
    fn test_infer_types() {
        let t = sample();
        assert_eq!(
            t.infer_types(),
            vec![ColumnType::Integer, ColumnType::Text, ColumnType::Real]
        );
        let empty = Table::new(vec!["x".into()]);
        assert_eq!(empty.infer_types(), vec![ColumnType::Text]);
    }

    #[test]
    fn test_csv_bytes_keep_nulls() {
        let t = sample();
        let back = Table::from_csv_bytes(&t.to_csv_bytes().unwrap()).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_push_row_checks_width() {
        let mut t = Table::new(vec!["a".into()]);
        assert!(t.push_row(vec![None, None]).is_err());
    }

    #[test]
    fn test_merge_widens() {
        assert_eq!(ColumnType::Integer.merge(ColumnType::Real), ColumnType::Real);
        assert_eq!(ColumnType::Boolean.merge(ColumnType::Integer), ColumnType::Text);
    }
}
