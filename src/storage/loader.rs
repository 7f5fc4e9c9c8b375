//! Copy a staged send list from object storage into the warehouse.

use serde::Serialize;

use super::{repository, schema, Warehouse};
use crate::error::{Error, Result};
use crate::ingest::Table;
use crate::query::validate_identifier;
use crate::stage::{ObjectLocation, ObjectStore};

/// What a load did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadOutcome {
    pub table_name: String,
    pub object_uri: String,
    pub rows: usize,
    pub columns: Vec<String>,
    pub grantees: Vec<String>,
}

/// Replace `table_name` with the CSV object at `location` and grant read
/// access to `grantees`. Reloading the same object yields the same table.
pub async fn load_from_object(
    warehouse: &Warehouse,
    store: &dyn ObjectStore,
    location: &ObjectLocation,
    table_name: &str,
    grantees: &[String],
    campaign_name: &str,
) -> Result<LoadOutcome> {
    validate_identifier("table name", table_name)?;
    if schema::is_reserved(table_name) {
        return Err(Error::Config(format!(
            "`{table_name}` is a warehouse table and cannot hold a send list"
        )));
    }
    for grantee in grantees {
        validate_identifier("grantee", grantee)?;
    }

    let bytes = store.get_object(location)?;
    let table = Table::from_csv_bytes(&bytes)?;
    if table.columns.is_empty() {
        return Err(Error::Stage(format!("{location} has no header row")));
    }

    let columns = table.columns.clone();
    let name = table_name.to_string();
    let uri = location.uri();
    let campaign = campaign_name.to_string();
    let grants = grantees.to_vec();
    let rows = warehouse
        .writer()
        .call(move |conn| {
            let rows = repository::replace_table(conn, &name, &table, &grants)?;
            repository::record_upload(conn, &name, &campaign, &uri, rows as i64)?;
            Ok::<usize, rusqlite::Error>(rows)
        })
        .await?;
    log::info!("Loaded {rows} rows into {table_name} from {location}");

    Ok(LoadOutcome {
        table_name: table_name.to_string(),
        object_uri: location.uri(),
        rows,
        columns,
        grantees: grantees.to_vec(),
    })
}
