//! Pipeline settings: command-line overrides, then values stored in the
//! warehouse's `app_config` table, then defaults.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::storage::Warehouse;

pub const KEY_ROOT_DIR: &str = "root_dir";
pub const KEY_BUCKET: &str = "bucket";
pub const KEY_FOLDER: &str = "folder";
pub const KEY_STAGE_DIR: &str = "stage_dir";
pub const KEY_GRANTEES: &str = "grantees";

/// Keys accepted by `config set`.
pub const KNOWN_KEYS: [&str; 5] = [KEY_ROOT_DIR, KEY_BUCKET, KEY_FOLDER, KEY_STAGE_DIR, KEY_GRANTEES];

const DEFAULT_BUCKET: &str = "campaign-lists";
const DEFAULT_FOLDER: &str = "campaigns";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    /// Campaign directories given by relative path are looked up here.
    pub root_dir: PathBuf,
    pub bucket: String,
    pub folder: String,
    /// Root of the local object store.
    pub stage_dir: PathBuf,
    /// Principals granted read access on uploaded tables.
    pub grantees: Vec<String>,
}

/// Values given on the command line; `None` falls through to stored config.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub root_dir: Option<PathBuf>,
    pub bucket: Option<String>,
    pub folder: Option<String>,
    pub stage_dir: Option<PathBuf>,
    pub grantees: Option<String>,
}

fn home() -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| Error::Config("cannot determine home directory".into()))
}

fn parse_grantees(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|g| g.trim())
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect()
}

impl Settings {
    /// Defaults under the user's home directory.
    pub fn defaults() -> Result<Self> {
        let home = home()?;
        Ok(Self {
            root_dir: home.join("campaigns"),
            bucket: DEFAULT_BUCKET.into(),
            folder: DEFAULT_FOLDER.into(),
            stage_dir: home.join(".campaigndw").join("stage"),
            grantees: Vec::new(),
        })
    }

    /// Layer stored config and then `overrides` over `base`.
    pub async fn load(warehouse: &Warehouse, base: Settings, overrides: Overrides) -> Result<Self> {
        let mut settings = base;
        for (key, value) in warehouse.list_config().await? {
            settings.apply(&key, &value);
        }
        if let Some(v) = overrides.root_dir {
            settings.root_dir = v;
        }
        if let Some(v) = overrides.bucket {
            settings.bucket = v;
        }
        if let Some(v) = overrides.folder {
            settings.folder = v;
        }
        if let Some(v) = overrides.stage_dir {
            settings.stage_dir = v;
        }
        if let Some(v) = overrides.grantees {
            settings.grantees = parse_grantees(&v);
        }
        log::debug!("Settings: {settings:?}");
        Ok(settings)
    }

    /// Set one key by name.
    pub fn apply(&mut self, key: &str, value: &str) {
        match key {
            KEY_ROOT_DIR => self.root_dir = PathBuf::from(value),
            KEY_BUCKET => self.bucket = value.to_string(),
            KEY_FOLDER => self.folder = value.to_string(),
            KEY_STAGE_DIR => self.stage_dir = PathBuf::from(value),
            KEY_GRANTEES => self.grantees = parse_grantees(value),
            _ => log::warn!("Ignoring unknown config key `{key}`"),
        }
    }

    /// Resolve a campaign directory argument: existing or absolute paths are
    /// used as given, anything else is taken relative to `root_dir`.
    pub fn campaign_dir(&self, arg: &Path) -> PathBuf {
        if arg.is_absolute() || arg.exists() {
            arg.to_path_buf()
        } else {
            self.root_dir.join(arg)
        }
    }
}

/// Reject keys `config set` does not understand.
pub fn check_key(key: &str) -> Result<()> {
    if KNOWN_KEYS.contains(&key) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "unknown config key `{key}` (expected one of: {})",
            KNOWN_KEYS.join(", ")
        )))
    }
}
