use serde::Serialize;
use std::sync::Arc;

use crate::providers::lenco::LencoClient;

/// Outcome of a liquidity gate check. `Unknown` (balance unreachable) is
/// distinct from an insufficient balance and also rejects the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum LiquidityDecision {
    Ok {
        available_ngn: i64,
    },
    Insufficient {
        available_ngn: i64,
        shortfall_ngn: i64,
    },
    Unknown,
}

/// Gates new offramps on the platform's NGN float, keeping a buffer that
/// must never be committed to payouts.
pub struct LiquidityGuard {
    lenco: Arc<LencoClient>,
    min_buffer_ngn: i64,
}

impl LiquidityGuard {
    pub fn new(lenco: Arc<LencoClient>, min_buffer_ngn: i64) -> Self {
        Self {
            lenco,
            min_buffer_ngn,
        }
    }

    pub async fn check(&self, required_ngn: i64) -> LiquidityDecision {
        match self.lenco.get_account_balance().await {
            Ok(balance) => decide(balance, required_ngn, self.min_buffer_ngn),
            Err(err) => {
                tracing::warn!(error = %err, "balance unavailable, rejecting as unknown");
                LiquidityDecision::Unknown
            }
        }
    }

    /// The largest order the float currently supports. Never exposes the
    /// raw balance.
    pub async fn max_order_ngn(&self) -> Option<i64> {
        self.lenco
            .get_account_balance()
            .await
            .ok()
            .map(|balance| (balance - self.min_buffer_ngn).max(0))
    }

    pub fn min_buffer_ngn(&self) -> i64 {
        self.min_buffer_ngn
    }
}

fn decide(balance_ngn: i64, required_ngn: i64, buffer_ngn: i64) -> LiquidityDecision {
    if balance_ngn >= required_ngn + buffer_ngn {
        LiquidityDecision::Ok {
            available_ngn: balance_ngn,
        }
    } else {
        LiquidityDecision::Insufficient {
            available_ngn: balance_ngn,
            shortfall_ngn: required_ngn + buffer_ngn - balance_ngn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_when_balance_covers_amount_plus_buffer() {
        assert_eq!(
            decide(20_000, 14_000, 5_000),
            LiquidityDecision::Ok {
                available_ngn: 20_000
            }
        );
        assert_eq!(
            decide(19_000, 14_000, 5_000),
            LiquidityDecision::Ok {
                available_ngn: 19_000
            }
        );
    }

    #[test]
    fn rejects_orders_that_would_eat_the_buffer() {
        assert_eq!(
            decide(20_000, 18_000, 5_000),
            LiquidityDecision::Insufficient {
                available_ngn: 20_000,
                shortfall_ngn: 3_000
            }
        );
        assert_eq!(
            decide(0, 1, 5_000),
            LiquidityDecision::Insufficient {
                available_ngn: 0,
                shortfall_ngn: 5_001
            }
        );
    }
}
