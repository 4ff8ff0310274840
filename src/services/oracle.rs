use bigdecimal::{BigDecimal, FromPrimitive};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::PriceConfig;
use crate::db::models::{PriceSnapshot, TokenKind};
use crate::db::queries;
use crate::error::AppError;

const COINGECKO_STX_ID: &str = "blockstack";
const COINGECKO_USDC_ID: &str = "usd-coin";
const COINGECKO_USDT_ID: &str = "tether";

const MAX_BACKOFF_MS: u64 = 5 * 60 * 1000;
const MAX_HISTORY_HOURS: i64 = 168;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPrice {
    pub price_usd: f64,
    pub price_ngn: f64,
    pub change_24h: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBook {
    pub stx: TokenPrice,
    pub usdc: TokenPrice,
    pub usd_to_ngn: f64,
    pub fetched_at: DateTime<Utc>,
    pub from_cache: bool,
}

impl PriceBook {
    pub fn token(&self, token: TokenKind) -> &TokenPrice {
        match token {
            TokenKind::Stx => &self.stx,
            TokenKind::Usdc => &self.usdc,
        }
    }

    /// NGN-per-token rate; falls back to USD price times the USD/NGN rate
    /// when the direct NGN quote is absent.
    pub fn rate_ngn(&self, token: TokenKind) -> Option<BigDecimal> {
        let price = self.token(token);
        let ngn = if price.price_ngn > 0.0 {
            price.price_ngn
        } else {
            price.price_usd * self.usd_to_ngn
        };
        BigDecimal::from_f64(ngn).filter(|rate| rate > &BigDecimal::from(0))
    }
}

#[derive(Error, Debug)]
pub(crate) enum FetchError {
    #[error("upstream rate limited the request")]
    RateLimited,
    #[error("in backoff window")]
    Backoff,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream returned status {0}")]
    Upstream(u16),
    #[error("invalid upstream payload: {0}")]
    Invalid(String),
}

struct OracleState {
    book: Option<PriceBook>,
    fetched: Option<Instant>,
    failures: u32,
    backoff_until: Option<Instant>,
}

/// Single source of token prices. `get_current` never fails: it serves a
/// fresh cache, a stale cache, or the configured emergency constants, in
/// that order.
pub struct PriceOracle {
    client: Client,
    config: PriceConfig,
    pool: PgPool,
    state: RwLock<OracleState>,
    /// At most one in-flight upstream request per process.
    refresh_gate: Mutex<()>,
}

impl PriceOracle {
    pub fn new(config: PriceConfig, pool: PgPool) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            config,
            pool,
            state: RwLock::new(OracleState {
                book: None,
                fetched: None,
                failures: 0,
                backoff_until: None,
            }),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Current prices. Always yields a usable book; `from_cache` and
    /// `fetched_at` tell the caller how stale it is.
    pub async fn get_current(&self) -> PriceBook {
        if let Some(book) = self.cached_within(self.config.cache_ttl_ms).await {
            return book;
        }

        match self.refresh().await {
            Ok(book) => book,
            Err(err) => {
                tracing::debug!(error = %err, "price refresh failed, falling back");
                if let Some(book) = self.cached_within(self.config.stale_ttl_ms).await {
                    return book;
                }
                tracing::warn!("price cache exhausted, serving emergency constants");
                self.emergency_book()
            }
        }
    }

    /// Admin-forced refresh. Unlike `get_current`, errors propagate.
    pub async fn force_refresh(&self) -> Result<PriceBook, AppError> {
        self.refresh().await.map_err(|err| match err {
            FetchError::RateLimited | FetchError::Backoff => {
                AppError::UpstreamUnavailable("price oracle is rate limited".to_string())
            }
            other => AppError::UpstreamUnavailable(other.to_string()),
        })
    }

    pub async fn get_history(
        &self,
        token: TokenKind,
        hours: i64,
    ) -> Result<Vec<PriceSnapshot>, AppError> {
        let hours = hours.clamp(1, MAX_HISTORY_HOURS);
        Ok(queries::price_history(&self.pool, token, hours).await?)
    }

    /// Background refresh task; ticks at the fresh TTL and skips the call
    /// while the cache is still fresh.
    pub async fn run_refresh_loop(self: std::sync::Arc<Self>, cancel: CancellationToken) {
        let period = Duration::from_millis(self.config.cache_ttl_ms.max(1_000));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("price refresh task shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if self.cached_within(self.config.cache_ttl_ms).await.is_none() {
                        if let Err(err) = self.refresh().await {
                            tracing::debug!(error = %err, "background price refresh failed");
                        }
                    }
                }
            }
        }
    }

    async fn cached_within(&self, ttl_ms: u64) -> Option<PriceBook> {
        let state = self.state.read().await;
        let fetched = state.fetched?;
        if fetched.elapsed() < Duration::from_millis(ttl_ms) {
            let mut book = state.book.clone()?;
            book.from_cache = true;
            return Some(book);
        }
        None
    }

    async fn refresh(&self) -> Result<PriceBook, FetchError> {
        let _gate = self.refresh_gate.lock().await;

        // A concurrent caller may have refreshed while we waited.
        if let Some(book) = self.cached_within(self.config.cache_ttl_ms).await {
            return Ok(book);
        }

        {
            let state = self.state.read().await;
            if let Some(until) = state.backoff_until {
                if Instant::now() < until {
                    return Err(FetchError::Backoff);
                }
            }
        }

        match self.fetch_upstream().await {
            Ok(book) => {
                {
                    let mut state = self.state.write().await;
                    state.book = Some(book.clone());
                    state.fetched = Some(Instant::now());
                    state.failures = 0;
                    state.backoff_until = None;
                }
                self.persist_snapshots(&book).await;
                Ok(book)
            }
            Err(FetchError::RateLimited) => {
                let mut state = self.state.write().await;
                state.failures += 1;
                let delay = backoff_delay(self.config.base_backoff_ms, state.failures);
                state.backoff_until = Some(Instant::now() + delay);
                tracing::warn!(
                    failures = state.failures,
                    backoff_ms = delay.as_millis() as u64,
                    "price oracle rate limited, backing off"
                );
                Err(FetchError::RateLimited)
            }
            Err(err) => Err(err),
        }
    }

    async fn fetch_upstream(&self) -> Result<PriceBook, FetchError> {
        let url = format!(
            "{}/simple/price",
            self.config.api_url.trim_end_matches('/')
        );
        let ids = format!("{COINGECKO_STX_ID},{COINGECKO_USDC_ID},{COINGECKO_USDT_ID}");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("ids", ids.as_str()),
                ("vs_currencies", "usd,ngn"),
                ("include_24hr_change", "true"),
            ])
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(FetchError::Upstream(response.status().as_u16()));
        }

        let data: HashMap<String, HashMap<String, f64>> = response.json().await?;

        let stx = token_price(&data, COINGECKO_STX_ID)
            .ok_or_else(|| FetchError::Invalid("missing STX quote".to_string()))?;
        let usdc = token_price(&data, COINGECKO_USDC_ID)
            .ok_or_else(|| FetchError::Invalid("missing USDC quote".to_string()))?;

        // USD/NGN is taken from the stablecoin's NGN quote, then USDC's,
        // then the emergency constant.
        let usd_to_ngn = data
            .get(COINGECKO_USDT_ID)
            .and_then(|q| q.get("ngn").copied())
            .filter(|v| *v > 0.0)
            .or_else(|| Some(usdc.price_ngn).filter(|v| *v > 0.0))
            .unwrap_or(self.config.emergency_usd_ngn);

        Ok(PriceBook {
            stx,
            usdc,
            usd_to_ngn,
            fetched_at: Utc::now(),
            from_cache: false,
        })
    }

    async fn persist_snapshots(&self, book: &PriceBook) {
        for (token, price) in [(TokenKind::Stx, &book.stx), (TokenKind::Usdc, &book.usdc)] {
            let snapshot = PriceSnapshot {
                id: Uuid::new_v4(),
                token,
                price_usd: decimal_or_zero(price.price_usd),
                price_ngn: decimal_or_zero(price.price_ngn),
                usd_to_ngn: decimal_or_zero(book.usd_to_ngn),
                fetched_at: book.fetched_at,
            };
            if let Err(err) = queries::insert_price_snapshot(&self.pool, &snapshot).await {
                tracing::warn!(token = %token, error = %err, "failed to persist price snapshot");
            }
        }
    }

    fn emergency_book(&self) -> PriceBook {
        let usd_to_ngn = self.config.emergency_usd_ngn;
        PriceBook {
            stx: TokenPrice {
                price_usd: self.config.emergency_stx_usd,
                price_ngn: self.config.emergency_stx_usd * usd_to_ngn,
                change_24h: None,
            },
            usdc: TokenPrice {
                price_usd: self.config.emergency_usdc_usd,
                price_ngn: self.config.emergency_usdc_usd * usd_to_ngn,
                change_24h: None,
            },
            usd_to_ngn,
            fetched_at: Utc::now(),
            from_cache: true,
        }
    }
}

fn token_price(data: &HashMap<String, HashMap<String, f64>>, id: &str) -> Option<TokenPrice> {
    let quote = data.get(id)?;
    Some(TokenPrice {
        price_usd: *quote.get("usd")?,
        price_ngn: quote.get("ngn").copied().unwrap_or(0.0),
        change_24h: quote.get("usd_24h_change").copied(),
    })
}

fn decimal_or_zero(value: f64) -> BigDecimal {
    BigDecimal::from_f64(value).unwrap_or_else(|| BigDecimal::from(0))
}

/// `min(base * 2^(failures-1), 5 min)`.
pub(crate) fn backoff_delay(base_ms: u64, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    let delay = base_ms.saturating_mul(1u64 << exponent).min(MAX_BACKOFF_MS);
    Duration::from_millis(delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> PriceConfig {
        PriceConfig {
            api_url: "http://localhost:0".to_string(),
            cache_ttl_ms: 60_000,
            stale_ttl_ms: 300_000,
            base_backoff_ms: 5_000,
            emergency_usd_ngn: 1_600.0,
            emergency_stx_usd: 0.85,
            emergency_usdc_usd: 1.0,
        }
    }

    #[test]
    fn backoff_doubles_and_caps_at_five_minutes() {
        assert_eq!(backoff_delay(5_000, 1), Duration::from_millis(5_000));
        assert_eq!(backoff_delay(5_000, 2), Duration::from_millis(10_000));
        assert_eq!(backoff_delay(5_000, 3), Duration::from_millis(20_000));
        assert_eq!(backoff_delay(5_000, 7), Duration::from_millis(300_000));
        assert_eq!(backoff_delay(5_000, 32), Duration::from_millis(300_000));
    }

    #[tokio::test]
    async fn emergency_book_has_finite_positive_prices() {
        let oracle = PriceOracle::new(
            test_config(),
            sqlx::postgres::PgPoolOptions::new().connect_lazy("postgres://localhost/unused").unwrap(),
        );
        let book = oracle.emergency_book();

        assert!(book.stx.price_ngn.is_finite() && book.stx.price_ngn > 0.0);
        assert!(book.usdc.price_ngn.is_finite() && book.usdc.price_ngn > 0.0);
        assert_eq!(book.usd_to_ngn, 1_600.0);
        assert!(book.from_cache);
        assert!(book.rate_ngn(TokenKind::Stx).is_some());
        assert!(book.rate_ngn(TokenKind::Usdc).is_some());
    }

    #[test]
    fn rate_falls_back_to_usd_times_fx() {
        let book = PriceBook {
            stx: TokenPrice {
                price_usd: 2.0,
                price_ngn: 0.0,
                change_24h: None,
            },
            usdc: TokenPrice {
                price_usd: 1.0,
                price_ngn: 1_600.0,
                change_24h: None,
            },
            usd_to_ngn: 1_600.0,
            fetched_at: Utc::now(),
            from_cache: false,
        };

        assert_eq!(
            book.rate_ngn(TokenKind::Stx),
            BigDecimal::from_f64(3_200.0)
        );
        assert_eq!(
            book.rate_ngn(TokenKind::Usdc),
            BigDecimal::from_f64(1_600.0)
        );
    }

    #[test]
    fn token_price_reads_quote_fields() {
        let mut data = HashMap::new();
        data.insert(
            "blockstack".to_string(),
            HashMap::from([
                ("usd".to_string(), 0.85),
                ("ngn".to_string(), 1_360.0),
                ("usd_24h_change".to_string(), -1.2),
            ]),
        );

        let price = token_price(&data, "blockstack").unwrap();
        assert_eq!(price.price_usd, 0.85);
        assert_eq!(price.price_ngn, 1_360.0);
        assert_eq!(price.change_24h, Some(-1.2));
        assert!(token_price(&data, "usd-coin").is_none());
    }
}
