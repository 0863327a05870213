// src/ingest/config.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::types::Publisher;
use crate::ingest::FetchTimeouts;
use crate::region::Region;

pub const ENV_PATH: &str = "REGION_PULSE_CONFIG";
pub const ENV_CHAT_TOKEN: &str = "CHAT_GATEWAY_TOKEN";
pub const DEFAULT_SOCIAL_API: &str = "https://public.api.bsky.app";

fn default_interval() -> u64 {
    300
}
fn default_metrics_addr() -> String {
    "0.0.0.0:9464".to_string()
}
fn default_social_api() -> String {
    DEFAULT_SOCIAL_API.to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_slow_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub publishers: Vec<Publisher>,
    /// Regions whose source coverage is too thin to tier.
    #[serde(default)]
    pub insufficient_coverage: Vec<Region>,
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
    #[serde(default)]
    pub chat_gateway: Option<ChatGatewayCfg>,
    /// Overrides the embedded keyword tables.
    #[serde(default)]
    pub regions_path: Option<PathBuf>,
    #[serde(default = "default_social_api")]
    pub social_api_base: String,
    #[serde(default)]
    pub timeouts: TimeoutsCfg,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatGatewayCfg {
    pub url: String,
    /// "ENV" means: read from CHAT_GATEWAY_TOKEN
    pub token: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TimeoutsCfg {
    #[serde(default = "default_timeout_secs")]
    pub default_secs: u64,
    #[serde(default = "default_slow_timeout_secs")]
    pub slow_secs: u64,
}

impl Default for TimeoutsCfg {
    fn default() -> Self {
        Self {
            default_secs: default_timeout_secs(),
            slow_secs: default_slow_timeout_secs(),
        }
    }
}

impl TimeoutsCfg {
    pub fn to_fetch_timeouts(&self) -> FetchTimeouts {
        FetchTimeouts {
            default: Duration::from_secs(self.default_secs.max(1)),
            slow: Duration::from_secs(self.slow_secs.max(1)),
        }
    }
}

impl AppConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing config from {}", path.display()))
    }

    /// Load using env var + fallbacks:
    /// 1) $REGION_PULSE_CONFIG
    /// 2) config/region_pulse.toml
    /// 3) config/region_pulse.json
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            } else {
                return Err(anyhow!("{ENV_PATH} points to non-existent path"));
            }
        }
        let toml_p = PathBuf::from("config/region_pulse.toml");
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from("config/region_pulse.json");
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        Err(anyhow!(
            "no config found: set {ENV_PATH} or create config/region_pulse.toml"
        ))
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<AppConfig> {
    let mut cfg: AppConfig = if hint_ext == "json" {
        serde_json::from_str(s)?
    } else {
        match toml::from_str(s) {
            Ok(c) => c,
            Err(toml_err) => {
                serde_json::from_str(s).map_err(|_| anyhow!("unsupported config format: {toml_err}"))?
            }
        }
    };
    validate(&mut cfg)?;
    Ok(cfg)
}

fn validate(cfg: &mut AppConfig) -> Result<()> {
    let mut seen = HashSet::new();
    for p in &mut cfg.publishers {
        p.id = p.id.trim().to_string();
        p.handle = p.handle.trim().to_string();
        if p.id.is_empty() || p.handle.is_empty() {
            bail!("publisher `{}` needs a non-empty id and handle", p.name);
        }
        if !seen.insert(p.id.clone()) {
            bail!("duplicate publisher id `{}`", p.id);
        }
        if p.single_region && p.default_region.is_none() {
            bail!("publisher `{}` is single_region but has no default_region", p.id);
        }
        p.confidence = p.confidence.clamp(0.0, 1.0);
        if !p.posts_per_day.is_finite() || p.posts_per_day < 0.0 {
            p.posts_per_day = 0.0;
        }
    }

    // Resolve gateway token if "ENV"
    if let Some(g) = &mut cfg.chat_gateway {
        if g.token.trim().eq_ignore_ascii_case("env") {
            g.token = std::env::var(ENV_CHAT_TOKEN)
                .map_err(|_| anyhow!("Missing {ENV_CHAT_TOKEN} env var"))?;
        }
    }
    Ok(())
}
