//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use trapseq_core::SegmentationConfig;

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,

    /// Thresholds, partition keys and timestamp fields for segmentation.
    #[serde(flatten)]
    pub segmentation: SegmentationConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("season_gap_days", &self.segmentation.season_gap_days)
            .field("sequence_gap_minutes", &self.segmentation.sequence_gap_minutes)
            .field(
                "max_members_per_sequence",
                &self.segmentation.max_members_per_sequence,
            )
            .field("transaction_scope", &self.segmentation.transaction_scope)
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("trapseq.db"),
            segmentation: SegmentationConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // TRAPSEQ_SEQUENCE_GAP_MINUTES=30 and friends
        figment = figment.merge(Env::prefixed("TRAPSEQ_"));

        figment.extract()
    }

    /// Path of the advisory lock file guarding segmentation passes.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self
            .database_path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".lock");
        self.database_path.with_file_name(name)
    }
}

/// Returns the platform-specific config directory for trapseq.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("trapseq"))
}

/// Returns the platform-specific data directory for trapseq.
///
/// On Linux: `~/.local/share/trapseq`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("trapseq"))
}
