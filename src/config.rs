use bigdecimal::BigDecimal;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub rate_limit: RateLimitConfig,
    pub price: PriceConfig,
    pub stacks: StacksConfig,
    pub lenco: LencoConfig,
    pub monnify: MonnifyConfig,
    pub offramp: OfframpConfig,
    /// Shared secret for the internal confirm-receipt channel.
    pub internal_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub env: String,
    pub allowed_origin: Option<String>,
    pub self_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_requests: u32,
}

#[derive(Debug, Clone)]
pub struct PriceConfig {
    pub api_url: String,
    pub cache_ttl_ms: u64,
    pub stale_ttl_ms: u64,
    pub base_backoff_ms: u64,
    pub emergency_usd_ngn: f64,
    pub emergency_stx_usd: f64,
    pub emergency_usdc_usd: f64,
}

#[derive(Debug, Clone)]
pub struct StacksConfig {
    pub api_url: String,
    pub network: String,
    /// Platform deposit address; the indexer and offramp init require it.
    pub platform_address: Option<String>,
    pub usdc_contract_address: String,
    pub usdc_contract_name: String,
    /// Signing sidecar holding the platform key; onramp sends need it.
    pub signer_url: Option<String>,
    pub indexer_poll_interval_ms: u64,
    pub indexer_page_limit: u32,
    /// Extra canonical blocks required before a deposit counts as received.
    pub min_confirmations: u32,
}

impl StacksConfig {
    pub fn usdc_contract_id(&self) -> String {
        format!("{}.{}", self.usdc_contract_address, self.usdc_contract_name)
    }
}

#[derive(Debug, Clone)]
pub struct LencoConfig {
    pub api_url: String,
    pub api_key: String,
    pub account_id: String,
    pub webhook_secret: Option<String>,
    pub min_balance_ngn: i64,
}

#[derive(Debug, Clone)]
pub struct MonnifyConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub contract_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OfframpConfig {
    pub flat_fee_ngn: i64,
    pub min_token: BigDecimal,
    pub max_token: BigDecimal,
    pub expiry_minutes: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();

        let config = Config {
            server: ServerConfig {
                port: env_or("PORT", "3000").parse()?,
                env: env_or("APP_ENV", "development"),
                allowed_origin: env_opt("ALLOWED_ORIGIN"),
                self_base_url: env_opt("SELF_BASE_URL"),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")?,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", "10").parse()?,
            },
            rate_limit: RateLimitConfig {
                window_ms: env_or("RATE_LIMIT_WINDOW_MS", "60000").parse()?,
                max_requests: env_or("RATE_LIMIT_MAX", "100").parse()?,
            },
            price: PriceConfig {
                api_url: env_or("COINGECKO_API_URL", "https://api.coingecko.com/api/v3"),
                cache_ttl_ms: env_or("PRICE_CACHE_TTL_MS", "60000").parse()?,
                stale_ttl_ms: env_or("PRICE_STALE_TTL_MS", "300000").parse()?,
                base_backoff_ms: env_or("PRICE_BASE_BACKOFF_MS", "5000").parse()?,
                emergency_usd_ngn: env_or("EMERGENCY_USD_NGN", "1600").parse()?,
                emergency_stx_usd: env_or("EMERGENCY_STX_USD", "0.85").parse()?,
                emergency_usdc_usd: env_or("EMERGENCY_USDC_USD", "1.0").parse()?,
            },
            stacks: StacksConfig {
                api_url: env_or("STACKS_API_URL", "https://api.mainnet.hiro.so"),
                network: env_or("STACKS_NETWORK", "mainnet"),
                platform_address: env_opt("PLATFORM_STX_ADDRESS"),
                usdc_contract_address: env_or(
                    "USDC_CONTRACT_ADDRESS",
                    "SP3Y2ZSH8P7D50B0VBTSX11S7XSG24M1VB9YFQA4K",
                ),
                usdc_contract_name: env_or("USDC_CONTRACT_NAME", "token-aeusdc"),
                signer_url: env_opt("STACKS_SIGNER_URL"),
                indexer_poll_interval_ms: env_or("INDEXER_POLL_INTERVAL_MS", "20000").parse()?,
                indexer_page_limit: env_or("INDEXER_PAGE_LIMIT", "50").parse()?,
                min_confirmations: env_or("MIN_CONFIRMATIONS", "0").parse()?,
            },
            lenco: LencoConfig {
                api_url: env_or("LENCO_API_URL", "https://api.lenco.co/access/v1"),
                api_key: env_or("LENCO_API_KEY", ""),
                account_id: env_or("LENCO_ACCOUNT_ID", ""),
                webhook_secret: env_opt("LENCO_WEBHOOK_SECRET"),
                min_balance_ngn: env_or("LENCO_MIN_BALANCE_NGN", "5000").parse()?,
            },
            monnify: MonnifyConfig {
                api_url: env_or("MONNIFY_API_URL", "https://api.monnify.com"),
                api_key: env_opt("MONNIFY_API_KEY"),
                secret_key: env_opt("MONNIFY_SECRET_KEY"),
                contract_code: env_opt("MONNIFY_CONTRACT_CODE"),
            },
            offramp: OfframpConfig {
                flat_fee_ngn: env_or("OFFRAMP_FLAT_FEE_NGN", "100").parse()?,
                min_token: parse_decimal("OFFRAMP_MIN_TOKEN", "1")?,
                max_token: parse_decimal("OFFRAMP_MAX_TOKEN", "10000")?,
                expiry_minutes: env_or("OFFRAMP_EXPIRY_MINUTES", "30").parse()?,
            },
            internal_api_key: env_opt("INTERNAL_API_KEY"),
        };

        for (name, value) in [
            ("COINGECKO_API_URL", &config.price.api_url),
            ("STACKS_API_URL", &config.stacks.api_url),
            ("LENCO_API_URL", &config.lenco.api_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| anyhow::anyhow!("{} is not a valid URL ({}): {}", name, value, e))?;
        }

        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.server.env == "production"
    }

    /// The indexer runs only with a deposit address and an internal key.
    pub fn indexer_enabled(&self) -> bool {
        self.stacks.platform_address.is_some() && self.internal_api_key.is_some()
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_decimal(key: &str, default: &str) -> anyhow::Result<BigDecimal> {
    let raw = env_or(key, default);
    BigDecimal::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("{} is not a valid decimal ({}): {}", key, raw, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usdc_contract_id_joins_address_and_name() {
        let stacks = StacksConfig {
            api_url: "https://api.mainnet.hiro.so".to_string(),
            network: "mainnet".to_string(),
            platform_address: Some("SP000000000000000000002Q6VF78".to_string()),
            usdc_contract_address: "SP3Y2ZSH8P7D50B0VBTSX11S7XSG24M1VB9YFQA4K".to_string(),
            usdc_contract_name: "token-aeusdc".to_string(),
            signer_url: None,
            indexer_poll_interval_ms: 20_000,
            indexer_page_limit: 50,
            min_confirmations: 0,
        };

        assert_eq!(
            stacks.usdc_contract_id(),
            "SP3Y2ZSH8P7D50B0VBTSX11S7XSG24M1VB9YFQA4K.token-aeusdc"
        );
    }

    #[test]
    fn env_opt_treats_empty_as_missing() {
        env::set_var("STACKSWAP_TEST_EMPTY", "  ");
        assert_eq!(env_opt("STACKSWAP_TEST_EMPTY"), None);
        env::set_var("STACKSWAP_TEST_SET", "value");
        assert_eq!(env_opt("STACKSWAP_TEST_SET"), Some("value".to_string()));
    }
}
