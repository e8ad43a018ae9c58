//! Layered configuration: built-in defaults, then the TOML file, then
//! `CODERUN__SECTION__KEY` environment variables.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::exec::{FILE_PLACEHOLDER, LaunchSpec, PRELUDE_PLACEHOLDER};

pub const APP_NAME: &str = "coderun";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub executor: ExecutorConfig,
    pub upload: UploadConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// WebSocket keepalive ping interval.
    pub ping_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            ping_interval_secs: 30,
        }
    }
}

/// How submitted code is run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Interpreter executable.
    pub program: String,
    /// Arguments; `{file}` and `{prelude}` are substituted.
    pub args: Vec<String>,
    pub script_suffix: String,
    pub work_dir: Option<String>,
    /// Wall-clock limit for interactive runs, including time spent waiting for input.
    pub run_timeout_secs: u64,
    /// Wall-clock limit for one-shot `/compile-code` runs.
    pub compile_timeout_secs: u64,
    pub env: HashMap<String, String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec![
                "-u".to_string(),
                "-c".to_string(),
                PRELUDE_PLACEHOLDER.to_string(),
                FILE_PLACEHOLDER.to_string(),
            ],
            script_suffix: ".py".to_string(),
            work_dir: None,
            run_timeout_secs: 120,
            compile_timeout_secs: 5,
            env: HashMap::new(),
        }
    }
}

impl ExecutorConfig {
    pub fn interactive_spec(&self) -> Result<LaunchSpec> {
        self.spec(Duration::from_secs(self.run_timeout_secs))
    }

    pub fn compile_spec(&self) -> Result<LaunchSpec> {
        self.spec(Duration::from_secs(self.compile_timeout_secs))
    }

    fn spec(&self, timeout: Duration) -> Result<LaunchSpec> {
        let work_dir = self
            .work_dir
            .as_deref()
            .map(expand_str_path)
            .transpose()?;
        Ok(LaunchSpec {
            program: self.program.clone(),
            args: self.args.clone(),
            script_suffix: self.script_suffix.clone(),
            work_dir,
            env: self.env.clone(),
            timeout,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Where uploaded images are stored. Defaults to `<data dir>/images`.
    pub dir: Option<String>,
    pub max_upload_bytes: usize,
    pub ocr: OcrConfig,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_upload_bytes: 25 * 1024 * 1024,
            ocr: OcrConfig::default(),
        }
    }
}

impl UploadConfig {
    pub fn resolve_dir(&self) -> Result<PathBuf> {
        match self.dir {
            Some(ref dir) => expand_str_path(dir),
            None => Ok(default_data_dir()?.join("images")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub enabled: bool,
    pub command: String,
    /// Arguments; `{file}` is substituted. Text is read from stdout.
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "tesseract".to_string(),
            args: vec![FILE_PLACEHOLDER.to_string(), "stdout".to_string()],
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Channel endpoint used by `coderun run`.
    pub endpoint: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:5000/ws".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Build the configuration from `path` (if it exists) and the environment.
pub fn load(path: &Path) -> Result<AppConfig> {
    let built = Config::builder()
        .add_source(File::from(path).format(FileFormat::Toml).required(false))
        .add_source(
            Environment::with_prefix(&env_prefix())
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("loading configuration from {}", path.display()))?;

    built
        .try_deserialize()
        .context("parsing configuration")
}

/// Write a commented default config file.
pub fn write_default(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let toml = toml::to_string_pretty(&AppConfig::default())
        .context("serializing default config to TOML")?;
    let mut body = String::new();
    body.push_str("# Configuration for ");
    body.push_str(APP_NAME);
    body.push('\n');
    body.push_str("# File: ");
    body.push_str(&path.display().to_string());
    body.push_str("\n\n");
    body.push_str(&toml);
    std::fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

pub fn default_config_file() -> Result<PathBuf> {
    Ok(default_config_dir()?.join("config.toml"))
}

pub fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::data_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("share").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine data directory"))
}

fn env_prefix() -> String {
    APP_NAME.to_ascii_uppercase()
}
