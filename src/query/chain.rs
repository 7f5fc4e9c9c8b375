use std::fmt;
use std::path::{Path, PathBuf};

use rusqlite::types::{ToSql, ToSqlOutput};
use serde::Serialize;

use super::dialect::{validate_identifier, Dialect};
use crate::error::{Error, Result};

/// File name the assembled query is persisted under, in the campaign directory.
pub const QUERY_ARTIFACT: &str = "generated_query.sql";

/// A value bound to a query placeholder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqlValue::Text(s) => s.to_sql(),
            SqlValue::Integer(i) => i.to_sql(),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            SqlValue::Integer(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Integer(i)
    }
}

/// One named sub-query of a [`GeneratedQuery`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cte {
    pub name: String,
    pub sql: String,
    /// Earlier sub-queries this one reads from.
    pub depends_on: Vec<String>,
}

/// Ordered chain of named sub-queries plus the parameters they bind.
///
/// A sub-query can only be pushed once everything it depends on is in the
/// chain, so the rendered `WITH` clause never references a name before
/// defining it.
#[derive(Debug, Clone)]
pub struct QueryChain {
    dialect: Dialect,
    ctes: Vec<Cte>,
    params: Vec<SqlValue>,
}

impl QueryChain {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ctes: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Bind a value and return its placeholder. Equal values share one placeholder.
    pub fn bind(&mut self, value: impl Into<SqlValue>) -> String {
        let value = value.into();
        let idx = match self.params.iter().position(|p| *p == value) {
            Some(i) => i,
            None => {
                self.params.push(value);
                self.params.len() - 1
            }
        };
        self.dialect.placeholder(idx + 1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ctes.iter().any(|c| c.name == name)
    }

    fn check_dependencies(&self, what: &str, depends_on: &[&str]) -> Result<()> {
        for dep in depends_on {
            if !self.contains(dep) {
                return Err(Error::Config(format!(
                    "{what} depends on {dep}, which is not defined before it"
                )));
            }
        }
        Ok(())
    }

    pub fn push(&mut self, name: &str, sql: String, depends_on: &[&str]) -> Result<()> {
        validate_identifier("sub-query name", name)?;
        if self.contains(name) {
            return Err(Error::Config(format!("sub-query {name} is defined twice")));
        }
        self.check_dependencies(name, depends_on)?;
        self.ctes.push(Cte {
            name: name.to_string(),
            sql,
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        });
        Ok(())
    }

    /// Close the chain with the terminal statement.
    pub fn finish(self, body: String, depends_on: &[&str]) -> Result<GeneratedQuery> {
        self.check_dependencies("final statement", depends_on)?;
        Ok(GeneratedQuery {
            dialect: self.dialect,
            ctes: self.ctes,
            body,
            params: self.params,
        })
    }
}

/// An assembled query: named sub-queries in definition order, the terminal
/// aggregate, and the values bound to its placeholders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedQuery {
    pub dialect: Dialect,
    pub ctes: Vec<Cte>,
    pub body: String,
    pub params: Vec<SqlValue>,
}

impl GeneratedQuery {
    pub fn cte(&self, name: &str) -> Option<&Cte> {
        self.ctes.iter().find(|c| c.name == name)
    }

    pub fn cte_names(&self) -> Vec<&str> {
        self.ctes.iter().map(|c| c.name.as_str()).collect()
    }

    /// The executable query text.
    pub fn sql(&self) -> String {
        let mut sql = String::new();
        for (i, cte) in self.ctes.iter().enumerate() {
            sql.push_str(if i == 0 { "WITH " } else { ",\n" });
            sql.push_str(&cte.name);
            sql.push_str(" AS (\n");
            sql.push_str(cte.sql.trim_end());
            sql.push_str("\n)");
        }
        if !self.ctes.is_empty() {
            sql.push('\n');
        }
        sql.push_str(self.body.trim_end());
        sql
    }

    /// Query text preceded by a comment block listing the bound parameters.
    pub fn artifact(&self, campaign_name: &str) -> String {
        let mut out = format!(
            "-- campaign: {}\n-- dialect: {}\n",
            campaign_name.replace('\n', " "),
            self.dialect.as_str()
        );
        if !self.params.is_empty() {
            out.push_str("-- parameters:\n");
            for (i, p) in self.params.iter().enumerate() {
                out.push_str(&format!(
                    "--   {} = {}\n",
                    self.dialect.placeholder(i + 1),
                    p.to_string().replace('\n', " ")
                ));
            }
        }
        out.push_str(&self.sql());
        out.push_str(";\n");
        out
    }

    /// Write [`GeneratedQuery::artifact`] to `generated_query.sql` in `dir`.
    pub fn write_artifact(&self, dir: &Path, campaign_name: &str) -> Result<PathBuf> {
        let path = dir.join(QUERY_ARTIFACT);
        std::fs::write(&path, self.artifact(campaign_name))?;
        log::info!("Query written to {}", path.display());
        Ok(path)
    }
}
