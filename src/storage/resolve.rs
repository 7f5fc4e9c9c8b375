//! Normalize an uploaded send-list table to a populated `user_id` column.

use rusqlite::Connection;
use serde::Serialize;

use super::repository;
use super::schema::quote_ident;

/// How a table's `user_id` column was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// `user_id` was already fully populated.
    AlreadyResolved,
    /// `internal_user_id` was renamed to `user_id`.
    Renamed { from: String },
    /// `user_id` was filled by joining `from` against the user directory.
    Enriched {
        from: String,
        matched: i64,
        unmatched: i64,
    },
}

impl Resolution {
    pub fn describe(&self) -> String {
        match self {
            Resolution::AlreadyResolved => "user_id already populated".to_string(),
            Resolution::Renamed { from } => format!("renamed {from} to user_id"),
            Resolution::Enriched {
                from,
                matched,
                unmatched,
            } => format!("enriched from {from} ({matched} matched, {unmatched} unmatched)"),
        }
    }
}

/// Outcome of a resolution attempt; `Unresolvable` carries the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Attempt {
    Resolved(Resolution),
    Unresolvable(String),
}

/// Identifier columns that can be joined to the user directory, with the
/// directory column each one matches.
const ENRICHMENT_KEYS: [(&str, &str); 3] = [
    ("prospect_id", "internal_marketing_prospect_id"),
    ("external_id", "external_id"),
    ("email", "email"),
];

/// Whether `user_id` exists and every row has one.
pub(crate) fn is_resolved(conn: &Connection, table: &str) -> Result<bool, rusqlite::Error> {
    let columns = repository::table_columns(conn, table)?;
    if !columns.iter().any(|c| c == "user_id") {
        return Ok(false);
    }
    let total = repository::count_rows(conn, table)?;
    Ok(total > 0 && repository::count_populated(conn, table, "user_id")? == total)
}

/// Pick the first usable identifier column and rewrite the table so that
/// `user_id` holds internal user ids. Runs in one transaction.
pub(crate) fn resolve(conn: &mut Connection, table: &str) -> Result<Attempt, rusqlite::Error> {
    let tx = conn.transaction()?;
    let mut columns = repository::table_columns(&tx, table)?;
    let total = repository::count_rows(&tx, table)?;
    let populated = |columns: &[String], column: &str| -> Result<i64, rusqlite::Error> {
        if columns.iter().any(|c| c == column) {
            repository::count_populated(&tx, table, column)
        } else {
            Ok(0)
        }
    };

    let mut user_ids = populated(&columns, "user_id")?;
    if total > 0 && user_ids == total {
        return Ok(Attempt::Resolved(Resolution::AlreadyResolved));
    }

    let mut renamed = false;
    if !columns.iter().any(|c| c == "user_id") && populated(&columns, "internal_user_id")? > 0 {
        tx.execute_batch(&format!(
            "ALTER TABLE {} RENAME COLUMN internal_user_id TO user_id",
            quote_ident(table)
        ))?;
        columns = repository::table_columns(&tx, table)?;
        user_ids = populated(&columns, "user_id")?;
        renamed = true;
    }
    let has_user_id = columns.iter().any(|c| c == "user_id");

    let mut key = None;
    if user_ids < total {
        for (column, directory_column) in ENRICHMENT_KEYS {
            if populated(&columns, column)? > 0 {
                key = Some((column, directory_column));
                break;
            }
        }
    }
    let Some((column, directory_column)) = key else {
        if renamed {
            tx.commit()?;
            return Ok(Attempt::Resolved(Resolution::Renamed {
                from: "internal_user_id".into(),
            }));
        }
        if user_ids > 0 {
            // Partially populated with nothing to fill the gaps from
            return Ok(Attempt::Resolved(Resolution::AlreadyResolved));
        }
        return Ok(Attempt::Unresolvable(format!(
            "none of user_id, internal_user_id, prospect_id, external_id, email is populated in {total} rows"
        )));
    };

    let (lhs, rhs) = if column == "email" {
        (
            format!("LOWER(TRIM(a.{}))", quote_ident(column)),
            format!("LOWER(TRIM(u.{directory_column}))"),
        )
    } else {
        (
            format!("CAST(a.{} AS TEXT)", quote_ident(column)),
            format!("CAST(u.{directory_column} AS TEXT)"),
        )
    };
    let existing = if has_user_id {
        "COALESCE(a.user_id, m.internal_user_id)".to_string()
    } else {
        "m.internal_user_id".to_string()
    };
    let rest: Vec<String> = columns
        .iter()
        .filter(|c| c.as_str() != "user_id")
        .map(|c| format!("a.{}", quote_ident(c)))
        .collect();
    let staging = format!("{table}__resolved");
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {staging_q};
         CREATE TABLE {staging_q} AS
         SELECT {existing} AS user_id, {rest}
         FROM {table_q} a
         LEFT JOIN (
           SELECT {rhs} AS match_key, MIN(u.internal_user_id) AS internal_user_id
           FROM users u
           WHERE u.{directory_column} IS NOT NULL
           GROUP BY 1
         ) m ON m.match_key = {lhs};
         DROP TABLE {table_q};
         ALTER TABLE {staging_q} RENAME TO {table_q};",
        staging_q = quote_ident(&staging),
        table_q = quote_ident(table),
        rest = rest.join(", "),
    ))?;
    let matched = repository::count_populated(&tx, table, "user_id")?;
    tx.commit()?;
    Ok(Attempt::Resolved(Resolution::Enriched {
        from: column.to_string(),
        matched,
        unmatched: total - matched,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Table;
    use rusqlite_migration::{Migrations, M};

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        Migrations::new(vec![M::up(include_str!("migrations/001_initial.sql"))])
            .to_latest(&mut conn)
            .unwrap();
        conn.execute_batch(
            "INSERT INTO users VALUES (10, 'p-1', 'x-1', 'Ann@Example.com');
             INSERT INTO users VALUES (11, 'p-2', 'x-2', 'bo@example.com');",
        )
        .unwrap();
        conn
    }

    fn load(conn: &mut Connection, columns: &[&str], rows: &[&[Option<&str>]]) {
        let mut t = Table::new(columns.iter().map(|c| c.to_string()).collect());
        for r in rows {
            t.push_row(r.iter().map(|v| v.map(str::to_string)).collect()).unwrap();
        }
        repository::replace_table(conn, "promo", &t, &[]).unwrap();
    }

    fn user_ids(conn: &Connection) -> Vec<Option<i64>> {
        let mut stmt = conn
            .prepare("SELECT user_id FROM promo ORDER BY rowid")
            .unwrap();
        let rows = stmt.query_map([], |r| r.get(0)).unwrap();
        rows.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_populated_user_id_is_left_alone() {
        let mut conn = conn();
        load(&mut conn, &["user_id", "email"], &[&[Some("5"), None]]);
        assert!(is_resolved(&conn, "promo").unwrap());
        assert_eq!(
            resolve(&mut conn, "promo").unwrap(),
            Attempt::Resolved(Resolution::AlreadyResolved)
        );
    }

    #[test]
    fn test_internal_user_id_is_renamed() {
        let mut conn = conn();
        load(&mut conn, &["internal_user_id", "target_name"], &[&[Some("10"), Some("A")]]);
        assert!(!is_resolved(&conn, "promo").unwrap());
        assert_eq!(
            resolve(&mut conn, "promo").unwrap(),
            Attempt::Resolved(Resolution::Renamed {
                from: "internal_user_id".into()
            })
        );
        assert_eq!(user_ids(&conn), vec![Some(10)]);
        assert!(is_resolved(&conn, "promo").unwrap());
    }

    #[test]
    fn test_email_enrichment_is_case_insensitive() {
        let mut conn = conn();
        load(
            &mut conn,
            &["email", "target_name"],
            &[
                &[Some("ann@example.com"), Some("A")],
                &[Some("nobody@example.com"), Some("A")],
                &[Some("BO@example.com "), Some("B")],
            ],
        );
        let attempt = resolve(&mut conn, "promo").unwrap();
        assert_eq!(
            attempt,
            Attempt::Resolved(Resolution::Enriched {
                from: "email".into(),
                matched: 2,
                unmatched: 1
            })
        );
        assert_eq!(user_ids(&conn), vec![Some(10), None, Some(11)]);
        let columns = repository::table_columns(&conn, "promo").unwrap();
        assert_eq!(columns, vec!["user_id", "email", "target_name"]);
    }

    #[test]
    fn test_prospect_id_preferred_over_email() {
        let mut conn = conn();
        load(
            &mut conn,
            &["prospect_id", "email"],
            &[&[Some("p-2"), Some("ann@example.com")]],
        );
        resolve(&mut conn, "promo").unwrap();
        assert_eq!(user_ids(&conn), vec![Some(11)]);
    }

    #[test]
    fn test_rename_then_fill_gaps_from_email() {
        let mut conn = conn();
        load(
            &mut conn,
            &["internal_user_id", "email"],
            &[&[Some("11"), None], &[None, Some("ann@example.com")]],
        );
        let attempt = resolve(&mut conn, "promo").unwrap();
        assert_eq!(
            attempt,
            Attempt::Resolved(Resolution::Enriched {
                from: "email".into(),
                matched: 2,
                unmatched: 0
            })
        );
        assert_eq!(user_ids(&conn), vec![Some(11), Some(10)]);
    }

    #[test]
    fn test_no_usable_identifier() {
        let mut conn = conn();
        load(&mut conn, &["email", "target_name"], &[&[None, Some("A")]]);
        assert!(matches!(
            resolve(&mut conn, "promo").unwrap(),
            Attempt::Unresolvable(_)
        ));
    }
}
