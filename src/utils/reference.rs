//! Swap reference generation and parsing.
//!
//! A reference doubles as the provider-side idempotency key and the chain
//! memo, so it must fit a 34-byte memo buffer: `SSWAP_OFFRAMP_<ts36>_<rand8hex>`
//! stays at 32 characters or fewer for any timestamp before year 5000.

use chrono::Utc;
use rand::RngCore;

pub const OFFRAMP_PREFIX: &str = "SSWAP_OFFRAMP_";
pub const ONRAMP_PREFIX: &str = "SSWAP_ONRAMP_";

pub fn offramp_reference() -> String {
    format!("{}{}_{}", OFFRAMP_PREFIX, timestamp36(), random_suffix())
}

pub fn onramp_reference() -> String {
    format!("{}{}_{}", ONRAMP_PREFIX, timestamp36(), random_suffix())
}

/// Returns true when a decoded memo carries an offramp reference.
pub fn is_offramp_reference(memo: &str) -> bool {
    memo.starts_with(OFFRAMP_PREFIX)
}

fn timestamp36() -> String {
    to_base36(Utc::now().timestamp_millis().max(0) as u128)
}

fn random_suffix() -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn to_base36(mut n: u128) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize] as char);
        n /= 36;
    }
    out.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offramp_reference_has_expected_shape() {
        let reference = offramp_reference();
        assert!(reference.starts_with(OFFRAMP_PREFIX));
        assert!(reference.len() <= 34, "must fit a chain memo: {reference}");

        let rest = reference.strip_prefix(OFFRAMP_PREFIX).unwrap();
        let (ts, rand) = rest.split_once('_').expect("ts and suffix");
        assert!(!ts.is_empty());
        assert!(ts.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_eq!(rand.len(), 8);
        assert!(rand.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn onramp_reference_uses_onramp_prefix() {
        assert!(onramp_reference().starts_with(ONRAMP_PREFIX));
    }

    #[test]
    fn references_are_unique() {
        let a = offramp_reference();
        let b = offramp_reference();
        assert_ne!(a, b);
    }

    #[test]
    fn recognizes_offramp_references() {
        assert!(is_offramp_reference("SSWAP_OFFRAMP_lx2a9f_0a1b2c3d"));
        assert!(!is_offramp_reference("SSWAP_ONRAMP_lx2a9f_0a1b2c3d"));
        assert!(!is_offramp_reference("thanks for the coffee"));
        assert!(!is_offramp_reference(""));
    }

    #[test]
    fn base36_round_trips_known_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_700_000_000_000), "loyw3v28");
    }
}
