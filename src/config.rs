//! Configuration loading and validation
//!
//! All options come from the environment (a `.env` file is honored). The
//! configuration is captured once at startup into an immutable `Config`;
//! nothing re-reads the environment after that.

use serde::Deserialize;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub rpc: RpcConfig,
    pub wallet: WalletConfig,
    pub database: DatabaseConfig,
    pub kv: KvConfig,
    pub api: ApiConfig,
    pub risk: RiskConfig,
    pub swarm: SwarmConfig,
    pub signals: SignalsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    pub url: String,
    pub ws_url: String,
}

/// Signing key source; exactly one variant is configured.
#[derive(Debug, Clone, Deserialize)]
pub enum KeySource {
    /// Base58-encoded secret key in the environment
    PrivateKey(String),
    /// Path to a JSON keypair file
    KeypairPath(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub key_source: KeySource,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KvConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Maximum entry size per position, in whole base-currency units
    pub max_position_size_base: f64,
    pub max_slippage_bps: u64,
    pub max_priority_fee_base: u64,
    pub execution_cooldown_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwarmConfig {
    pub enabled: bool,
    pub llm_provider: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalsConfig {
    pub node_id: String,
    pub channel_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub node_env: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| Error::Config(format!("{} is not a valid value: {}", name, raw))),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let key_source = match (
            std::env::var("WALLET_PRIVATE_KEY").ok(),
            std::env::var("WALLET_KEYPAIR_PATH").ok(),
        ) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "Set exactly one of WALLET_PRIVATE_KEY or WALLET_KEYPAIR_PATH, not both"
                        .to_string(),
                ))
            }
            (Some(key), None) => KeySource::PrivateKey(key),
            (None, Some(path)) => KeySource::KeypairPath(path),
            (None, None) => {
                return Err(Error::MissingEnvVar(
                    "WALLET_PRIVATE_KEY or WALLET_KEYPAIR_PATH".to_string(),
                ))
            }
        };

        let config = Self {
            rpc: RpcConfig {
                url: std::env::var("SOLANA_RPC_URL")
                    .map_err(|_| Error::MissingEnvVar("SOLANA_RPC_URL".to_string()))?,
                ws_url: std::env::var("SOLANA_WS_URL")
                    .map_err(|_| Error::MissingEnvVar("SOLANA_WS_URL".to_string()))?,
            },
            wallet: WalletConfig { key_source },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .map_err(|_| Error::MissingEnvVar("DATABASE_URL".to_string()))?,
            },
            kv: KvConfig {
                url: std::env::var("REDIS_URL")
                    .map_err(|_| Error::MissingEnvVar("REDIS_URL".to_string()))?,
            },
            api: ApiConfig {
                host: env_or("API_HOST", "0.0.0.0"),
                port: env_parse("API_PORT", 3100)?,
            },
            risk: RiskConfig {
                max_position_size_base: env_parse("MAX_POSITION_SIZE_SOL", 0.5)?,
                max_slippage_bps: env_parse("MAX_SLIPPAGE_BPS", 2500)?,
                max_priority_fee_base: env_parse("MAX_PRIORITY_FEE_LAMPORTS", 1_000_000)?,
                execution_cooldown_ms: env_parse("EXECUTION_COOLDOWN_MS", 5_000)?,
            },
            swarm: SwarmConfig {
                enabled: env_parse("SWARM_ENABLED", false)?,
                llm_provider: env_or("LLM_PROVIDER", "openai"),
                llm_api_key: env_or("LLM_API_KEY", ""),
                llm_model: env_or("LLM_MODEL", "gpt-4o-mini"),
                llm_max_tokens: env_parse("LLM_MAX_TOKENS", 1024)?,
            },
            signals: SignalsConfig {
                node_id: env_or("NODE_ID", &uuid::Uuid::new_v4().to_string()),
                channel_prefix: env_or("INTEL_CHANNEL_PREFIX", "guardian"),
            },
            logging: LoggingConfig {
                level: env_or("LOG_LEVEL", "info"),
                node_env: env_or("NODE_ENV", "development"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.risk.max_slippage_bps == 0 || self.risk.max_slippage_bps > 10_000 {
            return Err(Error::Config(format!(
                "MAX_SLIPPAGE_BPS must be in [1,10000], got {}",
                self.risk.max_slippage_bps
            )));
        }

        if self.risk.max_position_size_base <= 0.0 {
            return Err(Error::Config(
                "MAX_POSITION_SIZE_SOL must be positive".to_string(),
            ));
        }

        if self.swarm.enabled && self.swarm.llm_api_key.is_empty() {
            return Err(Error::Config(
                "SWARM_ENABLED requires LLM_API_KEY".to_string(),
            ));
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  RPC:
    url: {}
    ws_url: {}
  Wallet:
    key_source: {}
  Stores:
    database: {}
    kv: {}
  API:
    bind: {}:{}
  Risk:
    max_position: {} SOL
    max_slippage: {}bps
    max_priority_fee: {} lamports
    cooldown: {}ms
  Swarm:
    enabled: {}
    provider: {}
    model: {}
    api_key: {}
  Signals:
    node_id: {}
    prefix: {}
"#,
            mask_url(&self.rpc.url),
            mask_url(&self.rpc.ws_url),
            match &self.wallet.key_source {
                KeySource::PrivateKey(_) => "env (***)",
                KeySource::KeypairPath(_) => "keypair file",
            },
            mask_url(&self.database.url),
            mask_url(&self.kv.url),
            self.api.host,
            self.api.port,
            self.risk.max_position_size_base,
            self.risk.max_slippage_bps,
            self.risk.max_priority_fee_base,
            self.risk.execution_cooldown_ms,
            self.swarm.enabled,
            self.swarm.llm_provider,
            self.swarm.llm_model,
            if self.swarm.llm_api_key.is_empty() {
                "(not set)"
            } else {
                "***"
            },
            self.signals.node_id,
            self.signals.channel_prefix,
        )
    }
}

/// Mask URL for display (hide credentials and API keys)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        return format!("{}?***", &url[..idx]);
    }
    if let (Some(scheme_end), Some(at)) = (url.find("://"), url.rfind('@')) {
        if at > scheme_end {
            return format!("{}://***@{}", &url[..scheme_end], &url[at + 1..]);
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_url_hides_query_and_userinfo() {
        assert_eq!(
            mask_url("https://api.example.com?key=secret"),
            "https://api.example.com?***"
        );
        assert_eq!(
            mask_url("postgres://user:pass@db:5432/guardian"),
            "postgres://***@db:5432/guardian"
        );
        assert_eq!(mask_url("https://rpc.example.com"), "https://rpc.example.com");
    }

    #[test]
    fn slippage_bounds_are_enforced() {
        let config = Config {
            rpc: RpcConfig {
                url: "http://localhost:8899".into(),
                ws_url: "ws://localhost:8900".into(),
            },
            wallet: WalletConfig {
                key_source: KeySource::KeypairPath("/tmp/key.json".into()),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/guardian".into(),
            },
            kv: KvConfig {
                url: "redis://localhost".into(),
            },
            api: ApiConfig {
                host: "0.0.0.0".into(),
                port: 3100,
            },
            risk: RiskConfig {
                max_position_size_base: 0.5,
                max_slippage_bps: 20_000,
                max_priority_fee_base: 1_000_000,
                execution_cooldown_ms: 5_000,
            },
            swarm: SwarmConfig {
                enabled: false,
                llm_provider: "openai".into(),
                llm_api_key: String::new(),
                llm_model: "gpt-4o-mini".into(),
                llm_max_tokens: 1024,
            },
            signals: SignalsConfig {
                node_id: "node-1".into(),
                channel_prefix: "guardian".into(),
            },
            logging: LoggingConfig {
                level: "info".into(),
                node_env: "test".into(),
            },
        };

        assert!(config.validate().is_err());
    }
}
