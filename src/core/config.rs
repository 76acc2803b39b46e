//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{HarnessError, Result};
use crate::protocol::packed::CMD23_BLOCK_COUNT_MASK;

/// Bytes moved by one bio (one page).
pub const BIO_BYTES: u64 = 4096;
/// 512-byte blocks per bio.
#[allow(clippy::cast_possible_truncation)]
pub const BLOCKS_PER_BIO: u32 = (BIO_BYTES / 512) as u32;
/// Blocks taken by the packed header itself.
pub const HEADER_BLOCKS: u32 = 1;

/// Full harness configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub run: RunConfig,
    pub stream: StreamConfig,
    pub device: DeviceConfig,
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
}

/// Per-invocation run knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Cycles over the selected group when the caller passes a non-positive count.
    pub repeat: u32,
    /// Pause after every dispatch so foreign filesystem I/O can drain.
    pub settle_delay_ms: u64,
    /// Seed for randomized passes; 0 means derive one from the clock.
    pub random_seed: u32,
}

/// Request stream shaping limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    pub base_sector: u64,
    pub max_bios_per_request: u32,
    pub max_transfer_bytes: u64,
    /// Allocation ceiling for a single prepared stream.
    pub max_stream_requests: usize,
}

/// Simulated device/driver parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeviceConfig {
    pub packing_capable: bool,
    pub max_packed_writes: u32,
    pub stats_enabled: bool,
    pub max_packed_sectors: u32,
    pub retry_limit: u32,
    /// Foreign single-request writes injected ahead of each round.
    pub foreign_writes_per_round: u32,
}

/// JSONL event log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// Used when `paths.jsonl_log` cannot be opened.
    pub fallback_path: Option<PathBuf>,
    /// Append to the log instead of starting it empty each run.
    pub append: bool,
}

/// Filesystem paths used by pch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            repeat: 1,
            settle_delay_ms: 1_000,
            random_seed: 0,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_sector: 0,
            max_bios_per_request: 120,
            max_transfer_bytes: 600 * 1024 * 1024,
            max_stream_requests: 4_096,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            packing_capable: true,
            max_packed_writes: 8,
            stats_enabled: true,
            max_packed_sectors: 65_535,
            retry_limit: 3,
            foreign_writes_per_round: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fallback_path: None,
            append: false,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[PCH-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        Self {
            config_file: home_dir.join(".config").join("pch").join("config.toml"),
            jsonl_log: home_dir
                .join(".local")
                .join("share")
                .join("pch")
                .join("events.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| HarnessError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str::<Self>(&raw)?
        } else if path.is_some() {
            return Err(HarnessError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic FNV-1a hash of the effective config, for log correlation.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // run
        if let Some(raw) = lookup("PCH_RUN_REPEAT") {
            self.run.repeat = parse_env("PCH_RUN_REPEAT", &raw)?;
        }
        if let Some(raw) = lookup("PCH_RUN_SETTLE_DELAY_MS") {
            self.run.settle_delay_ms = parse_env("PCH_RUN_SETTLE_DELAY_MS", &raw)?;
        }
        if let Some(raw) = lookup("PCH_RUN_RANDOM_SEED") {
            self.run.random_seed = parse_env("PCH_RUN_RANDOM_SEED", &raw)?;
        }

        // stream
        if let Some(raw) = lookup("PCH_STREAM_BASE_SECTOR") {
            self.stream.base_sector = parse_env("PCH_STREAM_BASE_SECTOR", &raw)?;
        }
        if let Some(raw) = lookup("PCH_STREAM_MAX_BIOS_PER_REQUEST") {
            self.stream.max_bios_per_request =
                parse_env("PCH_STREAM_MAX_BIOS_PER_REQUEST", &raw)?;
        }
        if let Some(raw) = lookup("PCH_STREAM_MAX_STREAM_REQUESTS") {
            self.stream.max_stream_requests = parse_env("PCH_STREAM_MAX_STREAM_REQUESTS", &raw)?;
        }

        // device
        if let Some(raw) = lookup("PCH_DEVICE_PACKING_CAPABLE") {
            self.device.packing_capable = parse_env("PCH_DEVICE_PACKING_CAPABLE", &raw)?;
        }
        if let Some(raw) = lookup("PCH_DEVICE_MAX_PACKED_WRITES") {
            self.device.max_packed_writes = parse_env("PCH_DEVICE_MAX_PACKED_WRITES", &raw)?;
        }
        if let Some(raw) = lookup("PCH_DEVICE_STATS_ENABLED") {
            self.device.stats_enabled = parse_env("PCH_DEVICE_STATS_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("PCH_DEVICE_FOREIGN_WRITES_PER_ROUND") {
            self.device.foreign_writes_per_round =
                parse_env("PCH_DEVICE_FOREIGN_WRITES_PER_ROUND", &raw)?;
        }

        // logging
        if let Some(raw) = lookup("PCH_LOGGING_ENABLED") {
            self.logging.enabled = parse_env("PCH_LOGGING_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("PCH_LOGGING_APPEND") {
            self.logging.append = parse_env("PCH_LOGGING_APPEND", &raw)?;
        }
        if let Some(raw) = lookup("PCH_LOG_PATH") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream.max_bios_per_request == 0 {
            return Err(HarnessError::InvalidConfig {
                details: "stream.max_bios_per_request must be >= 1".to_string(),
            });
        }
        if self.stream.max_transfer_bytes < BIO_BYTES {
            return Err(HarnessError::InvalidConfig {
                details: format!(
                    "stream.max_transfer_bytes ({}) must cover at least one bio ({BIO_BYTES})",
                    self.stream.max_transfer_bytes
                ),
            });
        }
        if self.stream.max_stream_requests == 0 {
            return Err(HarnessError::InvalidConfig {
                details: "stream.max_stream_requests must be >= 1".to_string(),
            });
        }
        // The packed header stores the entry count in a single byte.
        if self.device.max_packed_writes > 255 {
            return Err(HarnessError::InvalidConfig {
                details: format!(
                    "device.max_packed_writes ({}) must fit the one-byte header count",
                    self.device.max_packed_writes
                ),
            });
        }
        if self.device.max_packed_sectors > CMD23_BLOCK_COUNT_MASK {
            return Err(HarnessError::InvalidConfig {
                details: format!(
                    "device.max_packed_sectors ({}) must fit the CMD23 block count ({CMD23_BLOCK_COUNT_MASK})",
                    self.device.max_packed_sectors
                ),
            });
        }
        // A full batch of the largest requests must fit one packed command,
        // otherwise batches close early on the sector limit.
        let full_batch_blocks = u64::from(self.device.max_packed_writes)
            * u64::from(self.stream.max_bios_per_request)
            * u64::from(BLOCKS_PER_BIO)
            + u64::from(HEADER_BLOCKS);
        if full_batch_blocks > u64::from(self.device.max_packed_sectors) {
            return Err(HarnessError::InvalidConfig {
                details: format!(
                    "device.max_packed_writes ({}) x stream.max_bios_per_request ({}) needs \
                     {full_batch_blocks} blocks, above device.max_packed_sectors ({})",
                    self.device.max_packed_writes,
                    self.stream.max_bios_per_request,
                    self.device.max_packed_sectors
                ),
            });
        }
        if self.device.retry_limit == 0 {
            return Err(HarnessError::InvalidConfig {
                details: "device.retry_limit must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| HarnessError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::{Config, HarnessError};
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn header_count_limit_enforced() {
        let mut cfg = Config::default();
        cfg.device.max_packed_writes = 256;
        let err = cfg.validate().expect_err("expected header count error");
        assert!(err.to_string().contains("max_packed_writes"));
    }

    #[test]
    fn sector_limit_capped_at_cmd23_block_count() {
        let mut cfg = Config::default();
        cfg.device.max_packed_sectors = 65_536;
        let err = cfg.validate().expect_err("expected block count error");
        assert_eq!(err.code(), "PCH-1101");
        assert!(err.to_string().contains("max_packed_sectors"));
    }

    #[test]
    fn full_batch_must_fit_sector_limit() {
        let mut cfg = Config::default();
        // 68 x 120 bios x 8 blocks + header = 65281 blocks.
        cfg.device.max_packed_writes = 68;
        assert!(cfg.validate().is_ok());
        cfg.device.max_packed_writes = 69;
        assert!(cfg.validate().is_err());
        cfg.device.max_packed_writes = 255;
        let err = cfg.validate().expect_err("expected sector budget error");
        assert!(err.to_string().contains("max_packed_sectors"));

        let mut small = Config::default();
        small.device.max_packed_sectors = 8;
        assert!(small.validate().is_err());
        small.device.max_packed_writes = 0;
        assert!(small.validate().is_ok());
    }

    #[test]
    fn zero_bios_rejected() {
        let mut cfg = Config::default();
        cfg.stream.max_bios_per_request = 0;
        let err = cfg.validate().expect_err("expected bios error");
        assert!(err.to_string().contains("max_bios_per_request"));
    }

    #[test]
    fn transfer_ceiling_below_one_bio_rejected() {
        let mut cfg = Config::default();
        cfg.stream.max_transfer_bytes = 512;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_retry_limit_rejected() {
        let mut cfg = Config::default();
        cfg.device.retry_limit = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("PCH_RUN_REPEAT", "3"),
            ("PCH_RUN_SETTLE_DELAY_MS", "0"),
            ("PCH_RUN_RANDOM_SEED", "1234"),
            ("PCH_DEVICE_MAX_PACKED_WRITES", "16"),
            ("PCH_DEVICE_PACKING_CAPABLE", "false"),
            ("PCH_LOGGING_APPEND", "true"),
            ("PCH_LOG_PATH", "/tmp/pch/custom.jsonl"),
        ]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("overrides should parse");

        assert_eq!(cfg.run.repeat, 3);
        assert_eq!(cfg.run.settle_delay_ms, 0);
        assert_eq!(cfg.run.random_seed, 1234);
        assert_eq!(cfg.device.max_packed_writes, 16);
        assert!(!cfg.device.packing_capable);
        assert!(cfg.logging.append);
        assert_eq!(
            cfg.paths.jsonl_log,
            std::path::PathBuf::from("/tmp/pch/custom.jsonl")
        );
    }

    #[test]
    fn env_invalid_number_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("PCH_RUN_RANDOM_SEED", "not-a-seed")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("invalid seed should fail");
        match err {
            HarnessError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("PCH_RUN_RANDOM_SEED"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn load_parses_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[run]\nsettle_delay_ms = 5\n\n[device]\nmax_packed_writes = 12\n",
        )
        .unwrap();

        let cfg = Config::load(Some(&path)).expect("config should load");
        assert_eq!(cfg.run.settle_delay_ms, 5);
        assert_eq!(cfg.device.max_packed_writes, 12);
        assert_eq!(cfg.run.repeat, 1);
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let err = Config::load(Some(std::path::Path::new(
            "/nonexistent_pch_dir_424242/config.toml",
        )))
        .expect_err("missing explicit config must fail");
        assert_eq!(err.code(), "PCH-1102");
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let mut modified = Config::default();
        modified.device.max_packed_writes += 1;
        assert_ne!(
            cfg.stable_hash().expect("hash"),
            modified.stable_hash().expect("hash")
        );
        assert_eq!(
            cfg.stable_hash().expect("hash"),
            Config::default().stable_hash().expect("hash")
        );
    }
}
