//! Object-storage staging between ingestion and the warehouse load.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::ingest::Table;

/// Where a staged object lives: `s3://<bucket>/<key>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

fn is_safe_segment(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Make a free-form name usable as one key segment.
pub fn key_segment(name: &str) -> String {
    let seg: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    seg.trim_matches('.').to_string()
}

impl ObjectLocation {
    pub fn new(bucket: &str, key: &str) -> Result<Self> {
        if !is_safe_segment(bucket) {
            return Err(Error::Stage(format!("invalid bucket name `{bucket}`")));
        }
        if !key.split('/').all(is_safe_segment) {
            return Err(Error::Stage(format!("invalid object key `{key}`")));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    /// Parse an `s3://bucket/key` URI.
    pub fn parse(uri: &str) -> Result<Self> {
        let url = url::Url::parse(uri).map_err(|e| Error::Stage(format!("{uri}: {e}")))?;
        if url.scheme() != "s3" {
            return Err(Error::Stage(format!("not an s3:// URI: {uri}")));
        }
        let bucket = url
            .host_str()
            .ok_or_else(|| Error::Stage(format!("no bucket in {uri}")))?;
        let key: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        Self::new(bucket, &key.join("/"))
    }

    pub fn uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

/// Object storage used to stage uploads.
pub trait ObjectStore: Send + Sync {
    fn put_object(&self, location: &ObjectLocation, bytes: &[u8]) -> Result<()>;
    fn get_object(&self, location: &ObjectLocation) -> Result<Vec<u8>>;
}

/// An object store backed by a directory: objects live at `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, location: &ObjectLocation) -> PathBuf {
        let mut path = self.root.join(&location.bucket);
        for seg in location.key.split('/') {
            path.push(seg);
        }
        path
    }
}

impl ObjectStore for LocalObjectStore {
    fn put_object(&self, location: &ObjectLocation, bytes: &[u8]) -> Result<()> {
        let path = self.path_of(location);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Stage(format!("{}: {e}", parent.display())))?;
        }
        std::fs::write(&path, bytes)
            .map_err(|e| Error::Stage(format!("{}: {e}", path.display())))?;
        Ok(())
    }

    fn get_object(&self, location: &ObjectLocation) -> Result<Vec<u8>> {
        let path = self.path_of(location);
        std::fs::read(&path).map_err(|e| Error::Stage(format!("{location}: {e}")))
    }
}

/// Stage a table as CSV under `<folder>/<campaign_name>/<file_stem>.csv`.
pub fn stage_table(
    store: &dyn ObjectStore,
    table: &Table,
    bucket: &str,
    folder: &str,
    campaign_name: &str,
    file_stem: &str,
) -> Result<ObjectLocation> {
    let mut segments: Vec<String> = folder
        .split('/')
        .filter(|s| !s.is_empty())
        .map(key_segment)
        .collect();
    segments.push(key_segment(campaign_name));
    segments.push(format!("{}.csv", key_segment(file_stem)));
    let location = ObjectLocation::new(bucket, &segments.join("/"))?;

    let bytes = table.to_csv_bytes()?;
    store.put_object(&location, &bytes)?;
    log::info!("Staged {} rows to {location}", table.len());
    Ok(location)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_uri_round_trip() {
        let loc = ObjectLocation::parse("s3://marketing-data/campaigns/Winter_Winback/winter.csv")
            .unwrap();
        assert_eq!(loc.bucket, "marketing-data");
        assert_eq!(loc.key, "campaigns/Winter_Winback/winter.csv");
        assert_eq!(loc.to_string(), "s3://marketing-data/campaigns/Winter_Winback/winter.csv");
        assert!(ObjectLocation::parse("https://x/y").is_err());
        assert!(ObjectLocation::new("b", "a/../etc").is_err());
    }

    #[test]
    fn test_stage_and_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let mut table = Table::new(vec!["email".into()]);
        table.push_row(vec![Some("a@x.com".into())]).unwrap();

        let loc = stage_table(&store, &table, "bucket", "campaigns", "Winter Winback", "winter_winback")
            .unwrap();
        assert_eq!(loc.key, "campaigns/Winter_Winback/winter_winback.csv");
        assert!(dir
            .path()
            .join("bucket/campaigns/Winter_Winback/winter_winback.csv")
            .exists());
        let back = Table::from_csv_bytes(&store.get_object(&loc).unwrap()).unwrap();
        assert_eq!(back, table);
    }
}
