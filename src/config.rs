// src/config.rs
//! Pipeline configuration: `config/pipeline.toml` (or `$PIPELINE_CONFIG_PATH`),
//! then environment overrides. Every field has a default, so a missing file
//! yields a working config.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cluster::ClusterOptions;
use crate::fetch::FetchPlan;
use crate::pin::PIN_REEVALUATE_SECS;
use crate::summary::SUMMARY_TTL_SECS;

pub const DEFAULT_PIPELINE_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_PIPELINE_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upstream API root; `FetchPlan::endpoint` is appended.
    pub reports_base_url: String,
    pub refresh_interval_secs: u64,
    pub pin_interval_secs: u64,
    pub summary_interval_secs: u64,
    pub summary_ttl_secs: u64,
    /// JSON file backing the client key-value store; `None` keeps it in memory.
    pub store_path: Option<PathBuf>,
    pub relevance_config_path: Option<PathBuf>,
    pub fetch: FetchPlan,
    pub cluster: ClusterOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reports_base_url: "http://localhost:3000/api".to_string(),
            refresh_interval_secs: 30,
            pin_interval_secs: PIN_REEVALUATE_SECS,
            summary_interval_secs: SUMMARY_TTL_SECS,
            summary_ttl_secs: SUMMARY_TTL_SECS,
            store_path: None,
            relevance_config_path: None,
            fetch: FetchPlan::default(),
            cluster: ClusterOptions::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s).context("parsing pipeline config TOML")?;
        cfg.cluster.validate().context("[cluster]")?;
        Ok(cfg)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("in {}", path.display()))
    }

    /// File (if present) + env overrides. A file that exists but fails to
    /// parse is an error; a missing file is not.
    pub fn load() -> Result<Self> {
        let path = std::env::var(ENV_PIPELINE_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_PIPELINE_CONFIG_PATH));
        let mut cfg = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            Self::default()
        };
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Like `load`, but logs and falls back to defaults on error.
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(c) => c,
            Err(e) => {
                warn!(target: "config", error = ?e, "pipeline config invalid; using defaults");
                let mut cfg = Self::default();
                if let Err(e) = cfg.apply_env() {
                    warn!(target: "config", error = ?e, "ignoring env overrides");
                }
                cfg
            }
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("REPORTS_BASE_URL") {
            if !v.trim().is_empty() {
                self.reports_base_url = v.trim().to_string();
            }
        }
        override_num("REFRESH_INTERVAL_SECS", &mut self.refresh_interval_secs)?;
        override_num("PIN_INTERVAL_SECS", &mut self.pin_interval_secs)?;
        override_num("SUMMARY_INTERVAL_SECS", &mut self.summary_interval_secs)?;
        override_num("SUMMARY_TTL_SECS", &mut self.summary_ttl_secs)?;
        override_num("CACHE_TTL_MS", &mut self.fetch.cache_ttl_ms)?;
        if let Ok(v) = std::env::var("CLIENT_STORE_PATH") {
            self.store_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var(crate::relevance::ENV_RELEVANCE_CONFIG_PATH) {
            self.relevance_config_path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn pin_interval(&self) -> Duration {
        Duration::from_secs(self.pin_interval_secs)
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_interval_secs)
    }

    pub fn summary_ttl(&self) -> Duration {
        Duration::from_secs(self.summary_ttl_secs)
    }
}

fn override_num(var: &str, slot: &mut u64) -> Result<()> {
    if let Ok(v) = std::env::var(var) {
        *slot = v
            .trim()
            .parse()
            .with_context(|| format!("{var} must be a non-negative integer, got `{v}`"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: [&str; 4] = [
        ENV_PIPELINE_CONFIG_PATH,
        "REPORTS_BASE_URL",
        "REFRESH_INTERVAL_SECS",
        "CACHE_TTL_MS",
    ];

    fn clear_env() {
        for v in VARS {
            env::remove_var(v);
        }
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            reports_base_url = "https://lu.example/api"
            [fetch]
            fast_limit = 20
            [cluster]
            radius = 40.0
            extent = 512.0
            min_zoom = 0
            max_zoom = 14
            min_points = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.reports_base_url, "https://lu.example/api");
        assert_eq!(cfg.fetch.fast_limit, 20);
        assert_eq!(cfg.fetch.full_limit, 200);
        assert_eq!(cfg.cluster.max_zoom, 14);
        assert_eq!(cfg.refresh_interval_secs, 30);
        assert_eq!(cfg.pin_interval_secs, 60);
    }

    #[test]
    fn inverted_cluster_zooms_are_rejected() {
        let err = PipelineConfig::from_toml_str("[cluster]\nmin_zoom = 10\nmax_zoom = 5\n")
            .unwrap_err();
        assert!(format!("{err:#}").contains("min_zoom"));
    }

    #[test]
    #[serial]
    fn env_overrides_file_values() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("pipeline.toml");
        fs::write(&p, "refresh_interval_secs = 45\n").unwrap();
        env::set_var(ENV_PIPELINE_CONFIG_PATH, &p);
        env::set_var("CACHE_TTL_MS", "1000");

        let cfg = PipelineConfig::load().unwrap();
        assert_eq!(cfg.refresh_interval(), Duration::from_secs(45));
        assert_eq!(cfg.fetch.cache_ttl_ms, 1000);

        env::set_var("REFRESH_INTERVAL_SECS", "10");
        assert_eq!(PipelineConfig::load().unwrap().refresh_interval_secs, 10);
        clear_env();
    }

    #[test]
    #[serial]
    fn bad_env_number_falls_back_to_defaults() {
        clear_env();
        env::set_var(ENV_PIPELINE_CONFIG_PATH, "/nonexistent/pipeline.toml");
        env::set_var("REFRESH_INTERVAL_SECS", "soon");
        assert!(PipelineConfig::load().is_err());
        let cfg = PipelineConfig::load_or_default();
        assert_eq!(cfg.refresh_interval_secs, 30);
        clear_env();
    }
}
