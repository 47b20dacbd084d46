use dirs::data_dir;
use std::collections::HashMap;
use std::{fs, path::Path, path::PathBuf};

use crate::error::{AppError, AppResult};

pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-opus-20240229";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4";

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Settings {
    /// Address the HTTP server binds to.
    pub listen_addr: String,
    /// SQLite file for logs, usage and the local backend. Defaults under the data dir.
    pub database_path: Option<PathBuf>,
    /// Minimum level echoed to stderr (debug/info/warn/error).
    pub log_level: String,
    /// Whole-request timeout for vendor calls.
    pub request_timeout_secs: u64,
    /// 1 means a single attempt per vendor call.
    pub retry_max_attempts: u32,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub anthropic: VendorConfig,
    pub openai: VendorConfig,
    pub backend: BackendConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8787".to_string(),
            database_path: None,
            log_level: "info".to_string(),
            request_timeout_secs: 60,
            retry_max_attempts: 1,
            retry_initial_ms: 300,
            retry_max_ms: 3000,
            anthropic: VendorConfig::default(),
            openai: VendorConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

/// Credentials and endpoint for one LLM vendor
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct VendorConfig {
    pub api_key: Option<String>,
    /// Overrides the public API host (used for proxies and test stubs).
    pub base_url: Option<String>,
    pub default_model: Option<String>,
}

impl VendorConfig {
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn base_url_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(fallback)
    }

    pub fn default_model_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.default_model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(fallback)
    }
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Static bearer tokens plus the local SQLite database.
    #[default]
    Local,
    /// Supabase auth and PostgREST tables.
    Supabase,
}

/// Identity, entitlement and conversation backend
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub supabase_url: Option<String>,
    pub supabase_service_role_key: Option<String>,
    /// Bearer token -> user id, for the local backend.
    pub tokens: HashMap<String, String>,
}

pub fn data_root() -> PathBuf {
    let mut p = data_dir().unwrap_or_else(|| PathBuf::from("."));
    p.push("ai-proxy");
    p
}

fn settings_path() -> PathBuf {
    if let Ok(custom) = std::env::var("AI_PROXY_CONFIG") {
        if !custom.trim().is_empty() {
            return PathBuf::from(custom);
        }
    }
    let mut p = data_root();
    p.push("settings.toml");
    p
}

impl Settings {
    /// Effective SQLite path, creating the parent directory if needed.
    pub fn resolved_database_path(&self) -> AppResult<PathBuf> {
        let path = match &self.database_path {
            Some(p) => p.clone(),
            None => {
                let mut p = data_root();
                p.push("ai-proxy.db");
                p
            }
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(path)
    }

    /// Overlay environment variables on top of file settings.
    ///
    /// `lookup` is `std::env::var` in production; tests pass a map.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("CLAUDE_API_KEY") {
            self.anthropic.api_key = Some(key);
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.openai.api_key = Some(key);
        }
        if let Some(url) = get("SUPABASE_URL") {
            self.backend.supabase_url = Some(url);
            self.backend.kind = BackendKind::Supabase;
        }
        if let Some(key) = get("SUPABASE_SERVICE_ROLE_KEY") {
            self.backend.supabase_service_role_key = Some(key);
        }
        if let Some(addr) = get("AI_PROXY_LISTEN") {
            self.listen_addr = addr;
        }
        if let Some(level) = get("AI_PROXY_LOG_LEVEL") {
            self.log_level = level;
        }
    }
}

/// Parse settings from a TOML file. A missing file yields defaults.
pub fn load_from(path: &Path) -> AppResult<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let s = fs::read_to_string(path)?;
    toml::from_str(&s)
        .map_err(|e| AppError::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Load the settings file and apply environment overrides.
pub fn load() -> AppResult<Settings> {
    let p = settings_path();
    let mut cfg = load_from(&p)?;
    cfg.apply_env(|key| std::env::var(key).ok());
    crate::logger::debug("config", &format!("Loaded settings from {:?}", p));
    Ok(cfg)
}
