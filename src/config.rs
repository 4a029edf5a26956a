use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::models::DEFAULT_MAX_IMAGE_BYTES;
use crate::services::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::services::retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_QUOTA_MARKERS};
use crate::services::{Backoff, QuotaMatcher, RetryPolicy};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_BACKOFF_SECS: u64 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set (in the environment or a .env file)")]
    Missing(&'static str),
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub listen_addr: SocketAddr,
    pub retry: RetryPolicy,
    pub max_image_bytes: usize,
    pub static_dir: PathBuf,
}

impl Config {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = get("GOOGLE_API_KEY").ok_or(ConfigError::Missing("GOOGLE_API_KEY"))?;
        let model = get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let base_url = get("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let listen_addr = parse_or("SMARTPLATE_ADDR", get("SMARTPLATE_ADDR"), || {
            SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
        })?;

        let max_attempts: u32 = parse_or("SMARTPLATE_MAX_ATTEMPTS", get("SMARTPLATE_MAX_ATTEMPTS"), || {
            DEFAULT_MAX_ATTEMPTS
        })?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "SMARTPLATE_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        let backoff_secs: u64 = parse_or("SMARTPLATE_BACKOFF_SECS", get("SMARTPLATE_BACKOFF_SECS"), || {
            DEFAULT_BACKOFF_SECS
        })?;
        let base = Duration::from_secs(backoff_secs);
        let backoff_kind = get("SMARTPLATE_BACKOFF").map(|s| s.to_lowercase());
        let backoff = match backoff_kind.as_deref() {
            None | Some("fixed") => Backoff::Fixed(base),
            Some("exponential") => Backoff::Exponential { base },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "SMARTPLATE_BACKOFF",
                    value: other.to_string(),
                })
            }
        };

        let matcher = match get("SMARTPLATE_QUOTA_MARKERS") {
            Some(list) => QuotaMatcher::new(list.split(',').map(str::trim)),
            None => QuotaMatcher::new(DEFAULT_QUOTA_MARKERS.iter().copied()),
        };

        let max_image_mb: usize = parse_or("SMARTPLATE_MAX_IMAGE_MB", get("SMARTPLATE_MAX_IMAGE_MB"), || {
            DEFAULT_MAX_IMAGE_BYTES / (1024 * 1024)
        })?;
        let max_image_bytes = max_image_mb
            .checked_mul(1024 * 1024)
            .filter(|&bytes| bytes > 0)
            .ok_or_else(|| ConfigError::Invalid {
                var: "SMARTPLATE_MAX_IMAGE_MB",
                value: max_image_mb.to_string(),
            })?;
        let static_dir = get("SMARTPLATE_STATIC_DIR").unwrap_or_else(|| "static".to_string());

        Ok(Self {
            api_key,
            model,
            base_url,
            listen_addr,
            retry: RetryPolicy::new(max_attempts, backoff, matcher),
            max_image_bytes,
            static_dir: PathBuf::from(static_dir),
        })
    }
}

fn parse_or<T, D>(var: &'static str, raw: Option<String>, default: D) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    D: FnOnce() -> T,
{
    match raw {
        None => Ok(default()),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
