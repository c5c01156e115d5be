use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

#[cfg(test)]
use once_cell::sync::Lazy;
#[cfg(test)]
pub(crate) static ENV_MUTEX: Lazy<std::sync::Mutex<()>> = Lazy::new(|| std::sync::Mutex::new(()));

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    http_bind: SocketAddr,
    provider_endpoints: Vec<String>,
    provider_connect_timeout: Duration,
    provider_timeout: Duration,
    provider_retry_enabled: bool,
    ad_base_density_desktop: f64,
    ad_base_density_mobile: f64,
    ad_fatigue_ceiling: u32,
    ad_session_ramp: Duration,
    slot_refresh_interval: Duration,
    slot_refresh_ceiling: u8,
    cache_ttl_hourly: Duration,
    cache_ttl_daily: Duration,
    cache_max_entries: usize,
    session_idle_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数から Listing Gateway の設定値を読み込み、検証する。
    ///
    /// # Errors
    /// `PROVIDER_ENDPOINTS` が未設定、もしくは各種値のパースに失敗した場合は
    /// [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        let provider_endpoints = parse_required_csv("PROVIDER_ENDPOINTS")?;
        let http_bind = parse_socket_addr("LISTING_GATEWAY_HTTP_BIND", "0.0.0.0:9010")?;

        // Provider fan-out settings (per-call budget, not cumulative)
        let provider_connect_timeout = parse_duration_ms("PROVIDER_CONNECT_TIMEOUT_MS", 1000)?;
        let provider_timeout = parse_duration_ms("PROVIDER_TIMEOUT_MS", 2000)?;
        let provider_retry_enabled = parse_bool("PROVIDER_RETRY_ENABLED", true)?;

        // Placement tuning. The fatigue ceiling and session ramp are tunables,
        // only the monotonic decay shape is contractual.
        let ad_base_density_desktop = parse_f64("AD_BASE_DENSITY_DESKTOP", 0.18)?;
        let ad_base_density_mobile = parse_f64("AD_BASE_DENSITY_MOBILE", 0.15)?;
        let ad_fatigue_ceiling = parse_u32("AD_FATIGUE_CEILING", 20)?;
        let ad_session_ramp = parse_duration_secs("AD_SESSION_RAMP_SECS", 300)?;

        // Slot refresh daemon settings
        let slot_refresh_interval = parse_duration_secs("SLOT_REFRESH_INTERVAL_SECS", 30)?;
        let slot_refresh_ceiling = parse_u8("SLOT_REFRESH_CEILING", 5)?;

        // Edge cache settings
        let cache_ttl_hourly = parse_duration_secs("CACHE_TTL_HOURLY_SECS", 3600)?;
        let cache_ttl_daily = parse_duration_secs("CACHE_TTL_DAILY_SECS", 86400)?;
        let cache_max_entries = parse_usize("CACHE_MAX_ENTRIES", 10_000)?;

        // Session registry settings
        let session_idle_timeout = parse_duration_secs("SESSION_IDLE_TIMEOUT_SECS", 1800)?;

        if provider_endpoints.is_empty() {
            return Err(ConfigError::Invalid {
                name: "PROVIDER_ENDPOINTS",
                source: anyhow::anyhow!("at least one provider endpoint is required"),
            });
        }

        Ok(Self {
            http_bind,
            provider_endpoints,
            provider_connect_timeout,
            provider_timeout,
            provider_retry_enabled,
            ad_base_density_desktop,
            ad_base_density_mobile,
            ad_fatigue_ceiling,
            ad_session_ramp,
            slot_refresh_interval,
            slot_refresh_ceiling,
            cache_ttl_hourly,
            cache_ttl_daily,
            cache_max_entries,
            session_idle_timeout,
        })
    }

    /// 既定値そのままの設定。環境変数に触れずにユニットテストで使う。
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            http_bind: "127.0.0.1:0".parse().expect("loopback bind"),
            provider_endpoints: vec!["http://127.0.0.1:1/api".to_string()],
            provider_connect_timeout: Duration::from_millis(1000),
            provider_timeout: Duration::from_millis(2000),
            provider_retry_enabled: true,
            ad_base_density_desktop: 0.18,
            ad_base_density_mobile: 0.15,
            ad_fatigue_ceiling: 20,
            ad_session_ramp: Duration::from_secs(300),
            slot_refresh_interval: Duration::from_secs(30),
            slot_refresh_ceiling: 5,
            cache_ttl_hourly: Duration::from_secs(3600),
            cache_ttl_daily: Duration::from_secs(86400),
            cache_max_entries: 10_000,
            session_idle_timeout: Duration::from_secs(1800),
        }
    }

    #[must_use]
    pub fn http_bind(&self) -> SocketAddr {
        self.http_bind
    }

    /// 優先度順のプロバイダーエンドポイント。重複解決の「先着」はこの順で決まる。
    #[must_use]
    pub fn provider_endpoints(&self) -> &[String] {
        &self.provider_endpoints
    }

    #[must_use]
    pub fn provider_connect_timeout(&self) -> Duration {
        self.provider_connect_timeout
    }

    #[must_use]
    pub fn provider_timeout(&self) -> Duration {
        self.provider_timeout
    }

    #[must_use]
    pub fn provider_retry_enabled(&self) -> bool {
        self.provider_retry_enabled
    }

    #[must_use]
    pub fn ad_base_density_desktop(&self) -> f64 {
        self.ad_base_density_desktop
    }

    #[must_use]
    pub fn ad_base_density_mobile(&self) -> f64 {
        self.ad_base_density_mobile
    }

    #[must_use]
    pub fn ad_fatigue_ceiling(&self) -> u32 {
        self.ad_fatigue_ceiling
    }

    #[must_use]
    pub fn ad_session_ramp(&self) -> Duration {
        self.ad_session_ramp
    }

    #[must_use]
    pub fn slot_refresh_interval(&self) -> Duration {
        self.slot_refresh_interval
    }

    #[must_use]
    pub fn slot_refresh_ceiling(&self) -> u8 {
        self.slot_refresh_ceiling
    }

    #[must_use]
    pub fn cache_ttl_hourly(&self) -> Duration {
        self.cache_ttl_hourly
    }

    #[must_use]
    pub fn cache_ttl_daily(&self) -> Duration {
        self.cache_ttl_daily
    }

    #[must_use]
    pub fn cache_max_entries(&self) -> usize {
        self.cache_max_entries
    }

    #[must_use]
    pub fn session_idle_timeout(&self) -> Duration {
        self.session_idle_timeout
    }
}

fn parse_required_csv(name: &'static str) -> Result<Vec<String>, ConfigError> {
    let raw = env::var(name).map_err(|_| ConfigError::Missing(name))?;
    Ok(raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

fn parse_socket_addr(name: &'static str, default: &str) -> Result<SocketAddr, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());

    raw.parse().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_duration_secs(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    let value = parse_u64(name, default_secs)?;
    Ok(Duration::from_secs(value))
}

fn parse_duration_ms(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let value = parse_u64(name, default_ms)?;
    Ok(Duration::from_millis(value))
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u8(name: &'static str, default: u8) -> Result<u8, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u8>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u32>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<f64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("invalid boolean value: {raw}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset_env() {
        for name in [
            "PROVIDER_ENDPOINTS",
            "LISTING_GATEWAY_HTTP_BIND",
            "PROVIDER_CONNECT_TIMEOUT_MS",
            "PROVIDER_TIMEOUT_MS",
            "PROVIDER_RETRY_ENABLED",
            "AD_BASE_DENSITY_DESKTOP",
            "AD_BASE_DENSITY_MOBILE",
            "AD_FATIGUE_CEILING",
            "AD_SESSION_RAMP_SECS",
            "SLOT_REFRESH_INTERVAL_SECS",
            "SLOT_REFRESH_CEILING",
            "CACHE_TTL_HOURLY_SECS",
            "CACHE_TTL_DAILY_SECS",
            "CACHE_MAX_ENTRIES",
            "SESSION_IDLE_TIMEOUT_SECS",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    fn from_env_uses_defaults_when_optional_missing() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        env::set_var(
            "PROVIDER_ENDPOINTS",
            "https://api.source1.example/videos,https://api.source2.example/feed",
        );

        let config = Config::from_env().expect("config should load");

        assert_eq!(
            config.provider_endpoints(),
            &[
                "https://api.source1.example/videos",
                "https://api.source2.example/feed"
            ]
        );
        assert_eq!(config.http_bind(), "0.0.0.0:9010".parse().unwrap());
        assert_eq!(config.provider_connect_timeout(), Duration::from_millis(1000));
        assert_eq!(config.provider_timeout(), Duration::from_millis(2000));
        assert!(config.provider_retry_enabled());
        assert!((config.ad_base_density_desktop() - 0.18).abs() < f64::EPSILON);
        assert!((config.ad_base_density_mobile() - 0.15).abs() < f64::EPSILON);
        assert_eq!(config.ad_fatigue_ceiling(), 20);
        assert_eq!(config.ad_session_ramp(), Duration::from_secs(300));
        assert_eq!(config.slot_refresh_interval(), Duration::from_secs(30));
        assert_eq!(config.slot_refresh_ceiling(), 5);
        assert_eq!(config.cache_ttl_hourly(), Duration::from_secs(3600));
        assert_eq!(config.cache_ttl_daily(), Duration::from_secs(86400));
        assert_eq!(config.cache_max_entries(), 10_000);
        assert_eq!(config.session_idle_timeout(), Duration::from_secs(1800));
    }

    #[test]
    fn from_env_overrides_values() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        env::set_var("PROVIDER_ENDPOINTS", "https://only.example/api");
        env::set_var("LISTING_GATEWAY_HTTP_BIND", "127.0.0.1:8088");
        env::set_var("PROVIDER_TIMEOUT_MS", "500");
        env::set_var("PROVIDER_RETRY_ENABLED", "false");
        env::set_var("AD_FATIGUE_CEILING", "10");
        env::set_var("SLOT_REFRESH_CEILING", "3");
        env::set_var("CACHE_TTL_HOURLY_SECS", "60");

        let config = Config::from_env().expect("config should load");

        assert_eq!(config.provider_endpoints(), &["https://only.example/api"]);
        assert_eq!(config.http_bind(), "127.0.0.1:8088".parse().unwrap());
        assert_eq!(config.provider_timeout(), Duration::from_millis(500));
        assert!(!config.provider_retry_enabled());
        assert_eq!(config.ad_fatigue_ceiling(), 10);
        assert_eq!(config.slot_refresh_ceiling(), 3);
        assert_eq!(config.cache_ttl_hourly(), Duration::from_secs(60));
    }

    #[test]
    fn from_env_errors_when_endpoints_missing() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();

        let error = Config::from_env().expect_err("missing endpoints should fail");

        assert!(matches!(error, ConfigError::Missing("PROVIDER_ENDPOINTS")));
    }

    #[test]
    fn from_env_errors_when_endpoints_empty() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        env::set_var("PROVIDER_ENDPOINTS", " , ");

        let error = Config::from_env().expect_err("empty endpoint list should fail");

        assert!(matches!(
            error,
            ConfigError::Invalid {
                name: "PROVIDER_ENDPOINTS",
                ..
            }
        ));
    }
}
