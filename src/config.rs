//! Configuration management
//!
//! Stores defaults in ~/.config/covgen/config.json. Everything here can be
//! overridden per-invocation with CLI flags; the file just saves typing the
//! same host/model/budget flags on every run.

use crate::ollama::{DEFAULT_HOST, DEFAULT_MODEL};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_retries() -> u32 {
    3
}

fn default_gen_timeout() -> u64 {
    120
}

fn default_test_timeout() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Ollama endpoint, e.g. http://localhost:11434
    #[serde(default = "default_host")]
    pub host: String,
    /// Default model tag when --model is not given
    #[serde(default = "default_model")]
    pub model: String,
    /// Synthesis attempts per file before it is abandoned
    #[serde(default = "default_retries")]
    pub retries_per_file: u32,
    /// Seconds to wait for one model response
    #[serde(default = "default_gen_timeout")]
    pub gen_timeout_secs: u64,
    /// Seconds to wait for one test toolchain run
    #[serde(default = "default_test_timeout")]
    pub test_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            model: default_model(),
            retries_per_file: default_retries(),
            gen_timeout_secs: default_gen_timeout(),
            test_timeout_secs: default_test_timeout(),
        }
    }
}

impl Config {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("covgen"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return defaults. A corrupt file is backed
    /// up rather than silently discarded.
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        preserve_corrupt_config(&path, &content);
                        eprintln!(
                            "  Warning: Config file was corrupted ({}). A backup was saved and defaults were loaded.",
                            err
                        );
                    }
                }
            }
        }
        Self::default()
    }
}

fn preserve_corrupt_config(path: &std::path::Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.retries_per_file, 3);
        assert_eq!(config.test_timeout_secs, 600);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"model": "llama3:8b"}"#).unwrap();
        assert_eq!(config.model, "llama3:8b");
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.gen_timeout_secs, 120);
    }
}
