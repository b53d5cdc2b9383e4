use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::cached_response::FreshnessPolicy;

pub const CONFIG_PATH_VARIABLE: &str = "RESPCACHE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "respcache.yaml";
const ENV_PREFIX: &str = "RESPCACHE_";

/// `Cache-Control` value forced for every response coming from `domain`.
#[derive(Serialize, Debug, Deserialize, PartialEq, Clone)]
pub struct OverriddenCache {
    pub domain: String,
    pub cache: String,
}

#[derive(Serialize, Debug, Deserialize, PartialEq, Clone)]
pub struct Config {
    pub listen_address: String,
    pub default_ttl_seconds: u64,
    pub refresh_ratio: f64,
    pub request_timeout_seconds: u64,
    pub allow_from: Vec<String>,
    pub overridden_cache: Vec<OverriddenCache>,
    pub log_level: String,
    pub log_config_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_address: String::from("127.0.0.1:8080"),
            default_ttl_seconds: 300,
            refresh_ratio: 0.2,
            request_timeout_seconds: 30,
            allow_from: vec![String::from("localhost")],
            overridden_cache: vec![
                OverriddenCache {
                    domain: String::from("localhost"),
                    cache: String::from("max-age=60"),
                }
            ],
            log_level: String::from("info"),
            log_config_file: None,
        }
    }
}

impl Config {
    /// Defaults, then the YAML file at `path` (if present), then `RESPCACHE_*`
    /// environment variables.
    pub fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn load(path: &str) -> Result<Config, figment::Error> {
        Config::figment(path).extract()
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn freshness_policy(&self) -> FreshnessPolicy {
        FreshnessPolicy::new(self.refresh_ratio)
    }
}

/// `host` is `domain` itself or one of its subdomains.
pub fn domain_matches(host: &str, domain: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}
