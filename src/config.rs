//! Concord configuration (`concord.toml`).
//!
//! Defines the typed configuration for the object store location and the
//! membership group a process takes part in.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use concord_store::{DirStore, MemoryStore, ObjectStore};
use serde::Deserialize;

use crate::error::Error;
use crate::membership::{ParticipantId, Timing};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level concord configuration.
///
/// Missing fields use sensible defaults. Missing file → all defaults (no
/// error).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConcordConfig {
    /// Object store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Membership group settings.
    #[serde(default)]
    pub membership: MembershipConfig,
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

/// Which [`ObjectStore`] implementation to open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    /// Directory-backed store shared between processes.
    #[default]
    Dir,
    /// In-process store; contents vanish on exit.
    Memory,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dir => write!(f, "dir"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Object store settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Backend (default: `dir`).
    #[serde(default)]
    pub backend: StoreBackend,

    /// Root directory of the `dir` backend (default: `.concord/store`).
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Client id stamped on writes. Defaults to the participant id.
    #[serde(default)]
    pub client_id: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
            client_id: None,
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".concord/store")
}

impl StoreConfig {
    /// Open the configured store, writing as `client_id` unless the config
    /// names one.
    ///
    /// # Errors
    /// Returns [`Error::Store`] if the store root cannot be created or the
    /// client id is not a valid name.
    pub fn open(&self, client_id: &str) -> Result<Arc<dyn ObjectStore>, Error> {
        let client = self.client_id.as_deref().unwrap_or(client_id);
        Ok(match self.backend {
            StoreBackend::Dir => Arc::new(DirStore::open(&self.path, client)?),
            StoreBackend::Memory => Arc::new(MemoryStore::new().with_client_id(client)?),
        })
    }
}

// ---------------------------------------------------------------------------
// MembershipConfig
// ---------------------------------------------------------------------------

/// Membership group settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MembershipConfig {
    /// Bucket holding membership records (default: `"membership"`).
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Key of the group record (default: `"default"`).
    #[serde(default = "default_key")]
    pub key: String,

    /// Participant id. Generated from host and pid when unset.
    #[serde(default)]
    pub id: Option<String>,

    /// How long a joiner waits for acknowledgments (default: 2000).
    #[serde(default = "default_join_interval_ms")]
    pub join_interval_ms: u64,

    /// Expiry basis for part requests (default: 2000).
    #[serde(default = "default_part_interval_ms")]
    pub part_interval_ms: u64,

    /// Period of the background handle loop (default: 500).
    #[serde(default = "default_run_interval_ms")]
    pub run_interval_ms: u64,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            key: default_key(),
            id: None,
            join_interval_ms: default_join_interval_ms(),
            part_interval_ms: default_part_interval_ms(),
            run_interval_ms: default_run_interval_ms(),
        }
    }
}

fn default_bucket() -> String {
    "membership".to_owned()
}

fn default_key() -> String {
    "default".to_owned()
}

const fn default_join_interval_ms() -> u64 {
    2_000
}

const fn default_part_interval_ms() -> u64 {
    2_000
}

const fn default_run_interval_ms() -> u64 {
    500
}

impl MembershipConfig {
    /// Protocol intervals.
    #[must_use]
    pub const fn timing(&self) -> Timing {
        Timing {
            join_interval: Duration::from_millis(self.join_interval_ms),
            part_interval: Duration::from_millis(self.part_interval_ms),
            run_interval: Duration::from_millis(self.run_interval_ms),
        }
    }

    /// The configured participant id, or a generated one.
    ///
    /// # Errors
    /// Returns [`Error::InvalidId`] if the configured id is invalid.
    pub fn participant_id(&self) -> Result<ParticipantId, Error> {
        self.id
            .as_deref()
            .map_or_else(|| Ok(ParticipantId::generate()), ParticipantId::new)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Why `concord.toml` could not be used.
#[derive(Debug)]
pub enum ConfigError {
    /// The file exists but could not be read.
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Invalid TOML, a wrong value type, or an unknown field.
    Syntax {
        /// File being parsed, when known.
        path: Option<PathBuf>,
        /// 1-based line of the offending text, when known.
        line: Option<usize>,
        /// Parser message.
        message: String,
    },
    /// A protocol interval is zero.
    ZeroInterval {
        /// File being parsed, when known.
        path: Option<PathBuf>,
        /// The `membership.*_interval_ms` key.
        field: &'static str,
    },
}

impl ConfigError {
    /// The file the error refers to, if known.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Read { path, .. } => Some(path),
            Self::Syntax { path, .. } | Self::ZeroInterval { path, .. } => path.as_deref(),
        }
    }

    fn at(mut self, file: &Path) -> Self {
        match &mut self {
            Self::Read { .. } => {}
            Self::Syntax { path, .. } | Self::ZeroInterval { path, .. } => {
                *path = Some(file.to_owned());
            }
        }
        self
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = self
            .path()
            .map_or_else(|| "concord.toml".to_owned(), |p| p.display().to_string());
        match self {
            Self::Read { source, .. } => write!(
                f,
                "{origin}: could not read file: {source}\n  To fix: check the file's permissions, or pass --config <path>."
            ),
            Self::Syntax { line, message, .. } => {
                let at = line.map(|l| format!("line {l}: ")).unwrap_or_default();
                write!(
                    f,
                    "{origin}: {at}{message}\n  To fix: valid sections are [store] and [membership]; run 'concord config' to see the effective values."
                )
            }
            Self::ZeroInterval { field, .. } => write!(
                f,
                "{origin}: membership.{field} must be greater than 0\n  To fix: set it to a positive number of milliseconds, or remove it to use the default."
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl ConcordConfig {
    /// Read `path`. A missing file yields the defaults.
    ///
    /// # Errors
    /// Returns [`ConfigError::Read`] for I/O failures other than not-found,
    /// and the errors of [`parse`](Self::parse) tagged with `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).map_err(|e| e.at(path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_owned(),
                source,
            }),
        }
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    /// Returns [`ConfigError::Syntax`] or [`ConfigError::ZeroInterval`].
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Syntax {
            path: None,
            line: e
                .span()
                .map(|span| text[..span.start].matches('\n').count() + 1),
            message: e.message().to_owned(),
        })?;
        let m = &config.membership;
        for (field, value) in [
            ("join_interval_ms", m.join_interval_ms),
            ("part_interval_ms", m.part_interval_ms),
            ("run_interval_ms", m.run_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroInterval { path: None, field });
            }
        }
        Ok(config)
    }
}
