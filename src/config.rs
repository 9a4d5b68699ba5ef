use rand::RngCore;
use serde::Deserialize;
use std::time::Instant;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub whois_timeout_seconds: u64,
    pub max_response_size: usize,
    pub max_referrals: usize,
    pub cache_max_entries: u64,
    pub self_ip_ttl_seconds: u64,
    pub ip_whois_ttl_seconds: u64,
    pub domain_whois_ttl_seconds: u64,
    pub session_secret: String,
    pub allowed_origins: Vec<String>,
    pub start_time: Instant,
}

#[derive(Debug, Clone, Deserialize)]
struct ConfigData {
    pub port: u16,
    pub whois_timeout_seconds: u64,
    pub max_response_size: usize,
    pub max_referrals: usize,
    pub cache_max_entries: u64,
    pub self_ip_ttl_seconds: u64,
    pub ip_whois_ttl_seconds: u64,
    pub domain_whois_ttl_seconds: u64,
    pub session_secret: String,
    pub allowed_origins: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let mut settings = config::Config::builder()
            .set_default("port", 3001)?
            .set_default("whois_timeout_seconds", 10)?
            .set_default("max_response_size", 1024 * 1024)?
            // Registry -> registrar -> sub-registrar chains collapse after 3 hops
            .set_default("max_referrals", 3)?
            .set_default("cache_max_entries", 1000)?
            .set_default("self_ip_ttl_seconds", 2)?
            .set_default("ip_whois_ttl_seconds", 60)?
            .set_default("domain_whois_ttl_seconds", 120)?
            .set_default("session_secret", "")?
            .set_default("allowed_origins", "http://localhost:3000")?;

        settings = Self::apply_env_overrides(settings)?;

        let config_data: ConfigData = settings.build()?.try_deserialize()?;

        let session_secret = if config_data.session_secret.is_empty() {
            warn!("SESSION_SECRET not set, generating an ephemeral secret; CSRF tokens will not survive restarts");
            Self::generate_secret()
        } else {
            config_data.session_secret
        };

        Ok(Config {
            port: config_data.port,
            whois_timeout_seconds: config_data.whois_timeout_seconds,
            max_response_size: config_data.max_response_size,
            max_referrals: config_data.max_referrals,
            cache_max_entries: config_data.cache_max_entries,
            self_ip_ttl_seconds: config_data.self_ip_ttl_seconds,
            ip_whois_ttl_seconds: config_data.ip_whois_ttl_seconds,
            domain_whois_ttl_seconds: config_data.domain_whois_ttl_seconds,
            session_secret,
            allowed_origins: config_data
                .allowed_origins
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            start_time: Instant::now(),
        })
    }

    fn generate_secret() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    fn apply_env_overrides(
        mut settings: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        let env_mappings = [
            ("PORT", "port"),
            ("WHOIS_TIMEOUT_SECONDS", "whois_timeout_seconds"),
            ("MAX_RESPONSE_SIZE", "max_response_size"),
            ("MAX_REFERRALS", "max_referrals"),
            ("CACHE_MAX_ENTRIES", "cache_max_entries"),
            ("SELF_IP_TTL_SECONDS", "self_ip_ttl_seconds"),
            ("IP_WHOIS_TTL_SECONDS", "ip_whois_ttl_seconds"),
            ("DOMAIN_WHOIS_TTL_SECONDS", "domain_whois_ttl_seconds"),
            ("SESSION_SECRET", "session_secret"),
            ("CORS_ALLOWED_ORIGINS", "allowed_origins"),
        ];

        for (env_var, config_key) in env_mappings {
            if let Ok(value) = std::env::var(env_var) {
                settings = settings.set_override(config_key, value)?;
            }
        }

        Ok(settings)
    }
}
