use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};

use crate::error::StoreError;

pub const DEFAULT_TABLE: &str = "sessions";

/// One day.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 86_400;

/// How the database file is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
    #[default]
    ReadWriteCreate,
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpenMode::ReadOnly => "ro",
            OpenMode::ReadWrite => "rw",
            OpenMode::ReadWriteCreate => "rwc",
        };
        f.write_str(s)
    }
}

impl FromStr for OpenMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ro" | "read_only" | "readonly" => Ok(OpenMode::ReadOnly),
            "rw" | "read_write" | "readwrite" => Ok(OpenMode::ReadWrite),
            "rwc" | "read_write_create" | "readwritecreate" => Ok(OpenMode::ReadWriteCreate),
            other => Err(StoreError::InvalidConfig(format!(
                "unknown open mode '{other}' (expected ro, rw or rwc)"
            ))),
        }
    }
}

/// Where the session table lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    /// `:memory:` or a `file:...?mode=memory` URI.
    Memory(String),
    File(PathBuf),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backing table name. Interpolated into SQL, so it must be a plain identifier.
    pub table: String,

    /// Database file name, or an in-memory marker. Defaults to the table name.
    pub db: Option<String>,

    /// Directory the database file is placed in.
    pub dir: PathBuf,

    pub mode: OpenMode,

    /// Switch the database to write-ahead-log journaling.
    #[serde(alias = "WAL")]
    pub wal: bool,

    /// Seconds between background expiry sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            db: None,
            dir: PathBuf::from("."),
            mode: OpenMode::default(),
            wal: false,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl StoreConfig {
    /// Private in-memory database, gone once the store is dropped.
    pub fn in_memory() -> Self {
        Self {
            db: Some(":memory:".to_string()),
            ..Self::default()
        }
    }

    /// File database `dir/db`.
    pub fn file(dir: impl Into<PathBuf>, db: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            db: Some(db.into()),
            ..Self::default()
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_wal(mut self, wal: bool) -> Self {
        self.wal = wal;
        self
    }

    pub fn with_mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    /// The interval is kept in whole seconds; any sub-second part is dropped,
    /// so anything under one second fails [`StoreConfig::validate`].
    pub fn with_sweep_interval(mut self, every: Duration) -> Self {
        self.sweep_interval_secs = every.as_secs();
        self
    }

    /// Read overrides from `SESSION_STORE_*` environment variables.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`StoreConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(table) = lookup("SESSION_STORE_TABLE") {
            cfg.table = table;
        }
        if let Some(db) = lookup("SESSION_STORE_DB") {
            cfg.db = Some(db);
        }
        if let Some(dir) = lookup("SESSION_STORE_DIR") {
            cfg.dir = PathBuf::from(dir);
        }
        if let Some(mode) = lookup("SESSION_STORE_MODE") {
            cfg.mode = mode.parse()?;
        }
        if let Some(wal) = lookup("SESSION_STORE_WAL") {
            cfg.wal = parse_flag("SESSION_STORE_WAL", &wal)?;
        }
        if let Some(secs) = lookup("SESSION_STORE_SWEEP_SECS") {
            cfg.sweep_interval_secs = secs.trim().parse().map_err(|e| {
                StoreError::InvalidConfig(format!("SESSION_STORE_SWEEP_SECS '{secs}': {e}"))
            })?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if !is_identifier(&self.table) {
            return Err(StoreError::InvalidConfig(format!(
                "table name '{}' must match [A-Za-z_][A-Za-z0-9_]*",
                self.table
            )));
        }
        if self.sweep_interval_secs == 0 {
            return Err(StoreError::InvalidConfig(
                "sweep interval must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn target(&self) -> DatabaseTarget {
        let db = self.db.clone().unwrap_or_else(|| self.table.clone());

        if db.contains(":memory:") || db.contains("?mode=memory") {
            DatabaseTarget::Memory(db)
        } else {
            DatabaseTarget::File(self.dir.join(db))
        }
    }

    /// sqlx connection options for this configuration.
    pub fn connect_options(&self) -> Result<SqliteConnectOptions, StoreError> {
        let options = match self.target() {
            DatabaseTarget::Memory(uri) => {
                let url = if uri == ":memory:" {
                    "sqlite::memory:".to_string()
                } else {
                    format!("sqlite:{uri}")
                };
                SqliteConnectOptions::from_str(&url).map_err(|e| {
                    StoreError::InvalidConfig(format!("database '{uri}': {e}"))
                })?
            }
            DatabaseTarget::File(path) => SqliteConnectOptions::new().filename(path),
        };

        let options = match self.mode {
            OpenMode::ReadOnly => options.read_only(true),
            OpenMode::ReadWrite => options.create_if_missing(false),
            OpenMode::ReadWriteCreate => options.create_if_missing(true),
        };

        Ok(if self.wal {
            options.journal_mode(SqliteJournalMode::Wal)
        } else {
            options
        })
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, StoreError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(StoreError::InvalidConfig(format!(
            "{key} '{other}' is not a boolean"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.table, "sessions");
        assert_eq!(cfg.mode, OpenMode::ReadWriteCreate);
        assert!(!cfg.wal);
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(86_400));
        assert_eq!(cfg.target(), DatabaseTarget::File(PathBuf::from("./sessions")));
    }

    #[test]
    fn db_name_defaults_to_table_name() {
        let cfg = StoreConfig::default().with_table("web_sessions");
        assert_eq!(
            cfg.target(),
            DatabaseTarget::File(PathBuf::from("./web_sessions"))
        );
    }

    #[test]
    fn memory_markers_are_detected() {
        assert_eq!(
            StoreConfig::in_memory().target(),
            DatabaseTarget::Memory(":memory:".to_string())
        );

        let cfg = StoreConfig {
            db: Some("file:abc?mode=memory&cache=shared".to_string()),
            ..StoreConfig::default()
        };
        assert!(matches!(cfg.target(), DatabaseTarget::Memory(_)));
    }

    #[test]
    fn file_target_joins_dir_and_db() {
        let cfg = StoreConfig::file("/var/lib/app", "sessions.db");
        assert_eq!(
            cfg.target(),
            DatabaseTarget::File(PathBuf::from("/var/lib/app/sessions.db"))
        );
    }

    #[test]
    fn rejects_unsafe_table_names() {
        for bad in ["", "1sessions", "sessions; DROP TABLE x", "se\"ss", "a-b"] {
            let cfg = StoreConfig::default().with_table(bad);
            assert!(
                matches!(cfg.validate(), Err(StoreError::InvalidConfig(_))),
                "{bad} should be rejected"
            );
        }
        assert!(StoreConfig::default().with_table("_Sess_2").validate().is_ok());
    }

    #[test]
    fn rejects_zero_sweep_interval() {
        let cfg = StoreConfig::default().with_sweep_interval(Duration::from_millis(10));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn sweep_interval_keeps_whole_seconds() {
        let cfg = StoreConfig::default().with_sweep_interval(Duration::from_millis(1_500));
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(1));
    }

    #[test]
    fn open_mode_parses_and_displays() {
        assert_eq!("ro".parse::<OpenMode>().unwrap(), OpenMode::ReadOnly);
        assert_eq!("RW".parse::<OpenMode>().unwrap(), OpenMode::ReadWrite);
        assert_eq!(
            "read_write_create".parse::<OpenMode>().unwrap(),
            OpenMode::ReadWriteCreate
        );
        assert!("append".parse::<OpenMode>().is_err());
        assert_eq!(OpenMode::ReadOnly.to_string(), "ro");
    }

    #[test]
    fn from_lookup_applies_overrides() {
        let cfg = StoreConfig::from_lookup(lookup(&[
            ("SESSION_STORE_TABLE", "web_sessions"),
            ("SESSION_STORE_DB", "app.db"),
            ("SESSION_STORE_DIR", "/tmp/state"),
            ("SESSION_STORE_MODE", "rw"),
            ("SESSION_STORE_WAL", "yes"),
            ("SESSION_STORE_SWEEP_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(cfg.table, "web_sessions");
        assert_eq!(cfg.mode, OpenMode::ReadWrite);
        assert!(cfg.wal);
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(60));
        assert_eq!(
            cfg.target(),
            DatabaseTarget::File(PathBuf::from("/tmp/state/app.db"))
        );
    }

    #[test]
    fn from_lookup_without_vars_is_default() {
        let cfg = StoreConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg.table, DEFAULT_TABLE);
        assert!(cfg.db.is_none());
    }

    #[test]
    fn from_lookup_reports_bad_values() {
        let err = StoreConfig::from_lookup(lookup(&[("SESSION_STORE_WAL", "maybe")])).unwrap_err();
        assert!(err.to_string().contains("SESSION_STORE_WAL"));

        let err =
            StoreConfig::from_lookup(lookup(&[("SESSION_STORE_SWEEP_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfig(_)));

        let err =
            StoreConfig::from_lookup(lookup(&[("SESSION_STORE_TABLE", "bad name")])).unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfig(_)));
    }

    #[test]
    fn deserializes_with_defaults_and_wal_alias() {
        let cfg: StoreConfig =
            serde_json::from_str(r#"{ "table": "s", "WAL": true, "mode": "read_only" }"#).unwrap();
        assert_eq!(cfg.table, "s");
        assert!(cfg.wal);
        assert_eq!(cfg.mode, OpenMode::ReadOnly);
        assert_eq!(cfg.sweep_interval_secs, DEFAULT_SWEEP_INTERVAL_SECS);
    }
}
