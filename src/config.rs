use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Interpreter config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InterpreterConfig {
    /// Sandbox image tag built and looked up by the environment layer.
    #[serde(default = "default_image_tag")]
    pub image_tag: String,

    /// Name of the long-lived interpreter container.
    #[serde(default = "default_container_name")]
    pub container_name: String,

    /// Host directory bind-mounted into the container as its workdir.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Workdir path as seen from inside the container.
    #[serde(default = "default_container_workdir")]
    pub container_workdir: String,

    /// Per-command execution timeout.
    #[serde(default = "default_cmd_timeout")]
    pub cmd_timeout_secs: u64,

    /// Ceiling for a full image build.
    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,

    /// Python binary used for host-side file execution.
    #[serde(default = "default_local_python")]
    pub local_python: String,

    /// Forward interpreter output to the transcript sink.
    #[serde(default = "default_true")]
    pub attach_output: bool,

    /// Report the effective working directory in the shell command syntax.
    #[serde(default = "default_true")]
    pub auto_cwd: bool,

    /// Refuse host file execution outside the data directory.
    #[serde(default = "default_true")]
    pub restrict_to_workspace: bool,
}

fn default_image_tag() -> String {
    "codebox-ipython:latest".to_string()
}

fn default_container_name() -> String {
    "codebox-interpreter".to_string()
}

fn default_data_dir() -> String {
    "~/.codebox/data".to_string()
}

fn default_container_workdir() -> String {
    "/data".to_string()
}

fn default_cmd_timeout() -> u64 {
    60
}

fn default_build_timeout() -> u64 {
    600
}

fn default_local_python() -> String {
    "python3".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            image_tag: default_image_tag(),
            container_name: default_container_name(),
            data_dir: default_data_dir(),
            container_workdir: default_container_workdir(),
            cmd_timeout_secs: default_cmd_timeout(),
            build_timeout_secs: default_build_timeout(),
            local_python: default_local_python(),
            attach_output: default_true(),
            auto_cwd: default_true(),
            restrict_to_workspace: default_true(),
        }
    }
}

// ---------------------------------------------------------------------------
// Log config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Write a daily-rolling log file in addition to stdout.
    #[serde(default)]
    pub file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Root config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    #[serde(default)]
    pub log: LogConfig,
}

// ---------------------------------------------------------------------------
// Paths & loading
// ---------------------------------------------------------------------------

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".codebox")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

pub fn log_dir_path() -> PathBuf {
    config_dir().join("logs")
}

/// Host data directory with `~` expanded. Created on demand by callers.
pub fn data_dir_path(cfg: &Config) -> PathBuf {
    let raw = &cfg.interpreter.data_dir;
    if raw.starts_with('~') {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(raw.trim_start_matches("~/"))
    } else {
        PathBuf::from(raw)
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let p = path.map(PathBuf::from).unwrap_or_else(config_path);

    if p.exists() {
        let text = std::fs::read_to_string(&p)
            .with_context(|| format!("reading config from {}", p.display()))?;
        let cfg: Config = serde_json::from_str(&text)
            .with_context(|| format!("parsing config from {}", p.display()))?;
        Ok(cfg)
    } else {
        Ok(Config::default())
    }
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let p = path.map(PathBuf::from).unwrap_or_else(config_path);

    if let Some(parent) = p.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(cfg)?;
    std::fs::write(&p, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.interpreter.image_tag, "codebox-ipython:latest");
        assert_eq!(cfg.interpreter.container_workdir, "/data");
        assert_eq!(cfg.interpreter.cmd_timeout_secs, 60);
        assert!(cfg.interpreter.attach_output);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let cfg: Config =
            serde_json::from_str(r#"{"interpreter":{"imageTag":"custom:1"}}"#).unwrap();
        assert_eq!(cfg.interpreter.image_tag, "custom:1");
        assert_eq!(cfg.interpreter.container_name, "codebox-interpreter");
        assert_eq!(cfg.log.level, "info");
    }

    #[test]
    fn test_roundtrip() {
        let mut cfg = Config::default();
        cfg.interpreter.cmd_timeout_secs = 120;
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn test_data_dir_tilde_expansion() {
        let mut cfg = Config::default();
        cfg.interpreter.data_dir = "/tmp/codebox-data".to_string();
        assert_eq!(data_dir_path(&cfg), PathBuf::from("/tmp/codebox-data"));

        cfg.interpreter.data_dir = "~/.codebox/data".to_string();
        let expanded = data_dir_path(&cfg);
        assert!(!expanded.to_string_lossy().contains('~'));
    }
}
