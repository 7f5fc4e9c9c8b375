use crate::ingest::{ColumnType, Table};

/// Tables the warehouse owns; uploads may never replace them.
pub const RESERVED_TABLES: [&str; 14] = [
    "app_config",
    "campaign_uploads",
    "table_grants",
    "users",
    "user_subscription_events",
    "menu_order_boxes",
    "marketing_offers",
    "marketing_discounts",
    "user_plan_events",
    "gift_card_purchases",
    "ios_app_sessions",
    "android_app_sessions",
    "referrals",
    "sqlite_sequence",
];

/// Bookkeeping tables among [`RESERVED_TABLES`]; the rest hold facts.
const INTERNAL_TABLES: [&str; 4] = ["app_config", "campaign_uploads", "table_grants", "sqlite_sequence"];

pub fn is_reserved(table: &str) -> bool {
    RESERVED_TABLES.contains(&table) || table.starts_with("sqlite_")
}

/// Whether `table` is one of the source tables campaign queries read.
pub fn is_fact_table(table: &str) -> bool {
    RESERVED_TABLES.contains(&table) && !INTERNAL_TABLES.contains(&table)
}

/// Double-quote an identifier for SQLite.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `CREATE TABLE` for an uploaded table, typed from its values.
pub fn create_table_sql(name: &str, table: &Table) -> String {
    let types = table.infer_types();
    let columns: Vec<String> = table
        .columns
        .iter()
        .zip(&types)
        .map(|(c, t)| format!("{} {}", quote_ident(c), t.sql_type()))
        .collect();
    format!("CREATE TABLE {} ({})", quote_ident(name), columns.join(", "))
}

/// Parameter value for a staged field under the column's inferred type.
pub fn typed_value(value: Option<&str>, ty: ColumnType) -> rusqlite::types::Value {
    use rusqlite::types::Value;
    let Some(v) = value else {
        return Value::Null;
    };
    match ty {
        ColumnType::Integer => v.parse().map(Value::Integer).unwrap_or_else(|_| Value::Text(v.into())),
        ColumnType::Real => v.parse().map(Value::Real).unwrap_or_else(|_| Value::Text(v.into())),
        ColumnType::Boolean => Value::Integer(i64::from(v.eq_ignore_ascii_case("true"))),
        ColumnType::Text => Value::Text(v.to_string()),
    }
}
