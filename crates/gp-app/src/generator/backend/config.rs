use std::env;
use std::time::Duration;
use anyhow::Context;
use log::info;

const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_GPU_ENV: &str = "remote";

#[derive(Debug, Clone, PartialEq)]
pub struct GenBackendConfig {
    /// Base URL of the generation API, without a trailing slash
    pub api_url: String,
    /// `remote` or `local` worker pool
    pub gpu_env: String,
    pub gpu_device: u32,
    pub request_timeout: Duration,
}

impl Default for GenBackendConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            gpu_env: DEFAULT_GPU_ENV.to_string(),
            gpu_device: 1,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl GenBackendConfig {
    /// Read `.env` (if present) and then the process environment.
    pub fn load() -> anyhow::Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => info!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(e).context("failed to read .env"),
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let api_url = lookup("GP_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_url);

        let gpu_env = lookup("GP_GPU_ENV").unwrap_or(defaults.gpu_env);

        let gpu_device = match lookup("GP_GPU_DEVICE") {
            Some(v) => v.parse().context("GP_GPU_DEVICE must be a number")?,
            None => defaults.gpu_device,
        };

        let request_timeout = match lookup("GP_REQUEST_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(v.parse().context("GP_REQUEST_TIMEOUT_SECS must be a number")?),
            None => defaults.request_timeout,
        };

        Ok(Self {
            api_url,
            gpu_env,
            gpu_device,
            request_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let conf = GenBackendConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(conf, GenBackendConfig::default());
    }

    #[test]
    fn test_overrides() {
        let conf = GenBackendConfig::from_lookup(lookup_from(&[
            ("GP_API_URL", "https://gen.example.com/api/"),
            ("GP_GPU_ENV", "local"),
            ("GP_GPU_DEVICE", "3"),
            ("GP_REQUEST_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(conf.api_url, "https://gen.example.com/api");
        assert_eq!(conf.gpu_env, "local");
        assert_eq!(conf.gpu_device, 3);
        assert_eq!(conf.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_bad_number() {
        let err = GenBackendConfig::from_lookup(lookup_from(&[("GP_GPU_DEVICE", "first")])).unwrap_err();
        assert!(err.to_string().contains("GP_GPU_DEVICE"));
    }
}
