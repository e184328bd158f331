// gateway/src/config.rs

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{collections::{BTreeMap, HashSet}, fs, path::{Path, PathBuf}, time::Duration};
use tracing::warn;

use crate::{profile::Profile, registry::ProfileRegistry, retry::RetryPolicy};

/// Config is merged: system -> user -> explicit file -> environment.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub mcp: McpConfig,
    pub profiles: ProfilesConfig,
    pub gateway: FacadeConfig,
    pub log: LogConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Per-attempt deadline.
    pub timeout_ms: u64,
    /// Total attempts including the first.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: u32,
}
impl Default for McpConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000, max_retries: 3, backoff_base_ms: 250, backoff_factor: 2 }
    }
}

/// What dispatch does with a profile whose `is_active` is false.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InactivePolicy {
    /// Still dispatchable by direct id; only hidden from listings.
    #[default]
    Resolve,
    /// Treated as not found.
    Reject,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProfilesConfig {
    pub inactive_policy: InactivePolicy,
    /// Empty means the built-in catalog.
    pub entries: Vec<Profile>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FacadeConfig {
    pub max_message_chars: usize,
    /// bearer token -> caller id
    pub tokens: BTreeMap<String, String>,
}
impl Default for FacadeConfig {
    fn default() -> Self { Self { max_message_chars: 5000, tokens: BTreeMap::new() } }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LogConfig {
    pub level: Option<String>, // EnvFilter directive, e.g. "info" or "mcp_gateway=debug"
}

// A single file's contribution; absent keys leave lower layers alone.
#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigLayer {
    mcp: McpLayer,
    profiles: ProfilesLayer,
    gateway: FacadeLayer,
    log: LogConfig,
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
struct McpLayer {
    timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    backoff_base_ms: Option<u64>,
    backoff_factor: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
struct ProfilesLayer {
    inactive_policy: Option<InactivePolicy>,
    entries: Vec<Profile>,
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
struct FacadeLayer {
    max_message_chars: Option<usize>,
    tokens: BTreeMap<String, String>,
}

fn merge(a: &mut GatewayConfig, b: &ConfigLayer) {
    macro_rules! ov { ($dst:expr, $src:expr) => { if let Some(v) = $src.clone() { $dst = v; } } }

    ov!(a.mcp.timeout_ms, b.mcp.timeout_ms);
    ov!(a.mcp.max_retries, b.mcp.max_retries);
    ov!(a.mcp.backoff_base_ms, b.mcp.backoff_base_ms);
    ov!(a.mcp.backoff_factor, b.mcp.backoff_factor);

    ov!(a.profiles.inactive_policy, b.profiles.inactive_policy);
    if !b.profiles.entries.is_empty() { a.profiles.entries = b.profiles.entries.clone(); }

    ov!(a.gateway.max_message_chars, b.gateway.max_message_chars);
    for (k, v) in &b.gateway.tokens { a.gateway.tokens.insert(k.clone(), v.clone()); }

    if b.log.level.is_some() { a.log.level = b.log.level.clone(); }
}

fn apply_env(cfg: &mut GatewayConfig, env: impl Fn(&str) -> Option<String>) {
    fn parse<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
        let raw = raw?;
        match raw.trim().parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(key, value = %raw, "ignoring unparseable environment override");
                None
            }
        }
    }
    if let Some(v) = parse("MCP_TIMEOUT", env("MCP_TIMEOUT")) { cfg.mcp.timeout_ms = v; }
    if let Some(v) = parse("MCP_MAX_RETRIES", env("MCP_MAX_RETRIES")) { cfg.mcp.max_retries = v; }
    if let Some(v) = env("LOG_LEVEL").filter(|s| !s.trim().is_empty()) { cfg.log.level = Some(v); }
}

fn default_paths() -> Vec<PathBuf> {
    let system = if cfg!(target_os = "windows") {
        PathBuf::from(r"C:\ProgramData\McpGateway\gateway.toml")
    } else {
        PathBuf::from("/etc/mcp-gateway/gateway.toml")
    };
    let mut paths = vec![system];
    if let Some(proj) = ProjectDirs::from("dev", "mcp", "mcp-gateway") {
        paths.push(proj.config_dir().join("gateway.toml"));
    }
    paths
}

fn read_layer(path: &Path) -> Result<Option<ConfigLayer>> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };
    let layer = toml::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(layer))
}

impl GatewayConfig {
    /// System and user files, then `explicit` (which must exist when given),
    /// then process environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            if !p.exists() { bail!("config file not found: {}", p.display()); }
        }
        let mut paths = default_paths();
        paths.extend(explicit.map(Path::to_path_buf));
        Self::from_layers(&paths, |k| std::env::var(k).ok())
    }

    /// Merge the given files in order (missing ones are skipped), apply
    /// overrides from `env`, and validate.
    pub fn from_layers(paths: &[PathBuf], env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        for p in paths {
            if let Some(layer) = read_layer(p)? { merge(&mut cfg, &layer); }
        }
        apply_env(&mut cfg, env);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let layer: ConfigLayer = toml::from_str(text).context("parse gateway config")?;
        let mut cfg = Self::default();
        merge(&mut cfg, &layer);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mcp.timeout_ms == 0 { bail!("mcp.timeout_ms must be greater than zero"); }
        if self.mcp.max_retries == 0 { bail!("mcp.max_retries must allow at least one attempt"); }
        if self.mcp.backoff_base_ms == 0 || self.mcp.backoff_factor < 2 {
            bail!("mcp.backoff_base_ms must be > 0 and mcp.backoff_factor >= 2 so each retry waits longer");
        }
        self.retry_policy().validate().context("mcp retry policy")?;
        if self.gateway.max_message_chars == 0 { bail!("gateway.max_message_chars must be greater than zero"); }
        let mut ids = HashSet::new();
        for p in &self.profiles.entries {
            p.validate().with_context(|| format!("profiles.entries: '{}'", p.id))?;
            if !ids.insert(p.id.as_str()) { bail!("profiles.entries: duplicate id '{}'", p.id); }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.mcp.max_retries,
            attempt_timeout: Duration::from_millis(self.mcp.timeout_ms),
            base_delay: Duration::from_millis(self.mcp.backoff_base_ms),
            factor: self.mcp.backoff_factor,
        }
    }

    pub fn registry(&self) -> Result<ProfileRegistry> {
        if self.profiles.entries.is_empty() {
            return ProfileRegistry::builtin().context("build builtin profile registry");
        }
        ProfileRegistry::from_profiles(self.profiles.entries.clone()).context("build profile registry")
    }
}
