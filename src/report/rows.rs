use serde::Serialize;

use crate::error::Result;

/// One value of a query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// Parse a field from an exported result file. Empty fields are null.
    pub fn parse(field: &str) -> Cell {
        let field = field.trim();
        if field.is_empty() {
            return Cell::Null;
        }
        match field.to_lowercase().as_str() {
            "true" | "t" => return Cell::Bool(true),
            "false" | "f" => return Cell::Bool(false),
            _ => {}
        }
        if let Ok(i) = field.parse::<i64>() {
            Cell::Int(i)
        } else if let Some(f) = field.parse::<f64>().ok().filter(|f| f.is_finite()) {
            Cell::Float(f)
        } else {
            Cell::Text(field.to_string())
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Null => None,
            Cell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            Cell::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Truthiness; the local warehouse returns booleans as 0/1.
    pub fn as_bool(&self) -> bool {
        match self {
            Cell::Null => false,
            Cell::Bool(b) => *b,
            Cell::Int(i) => *i != 0,
            Cell::Float(f) => *f != 0.0,
            Cell::Text(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "t" | "1"),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Bool(b) => b.to_string(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) => f.to_string(),
            Cell::Text(s) => s.clone(),
        }
    }
}

/// Column names plus rows of a query result, in warehouse order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl ResultSet {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Read a result set exported as CSV with a header row.
    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().from_reader(bytes);
        let columns: Vec<String> = rdr
            .headers()?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();
        let mut rows = Vec::new();
        for record in rdr.records() {
            rows.push(record?.iter().map(Cell::parse).collect());
        }
        Ok(Self { columns, rows })
    }
}
