use bigdecimal::BigDecimal;
use std::fmt;

pub const ACCOUNT_NUMBER_LEN: usize = 10;
pub const STACKS_ADDRESS_MIN_LEN: usize = 22;
pub const STACKS_ADDRESS_MAX_LEN: usize = 52;
pub const BANK_CODE_MAX_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

/// Stacks principals: `SP`/`SM` (mainnet) or `ST` (testnet) followed by
/// 20-50 c32 characters.
pub fn validate_stacks_address(field: &'static str, address: &str) -> ValidationResult {
    let address = sanitize_string(address);
    validate_required(field, &address)?;

    if address.len() < STACKS_ADDRESS_MIN_LEN || address.len() > STACKS_ADDRESS_MAX_LEN {
        return Err(ValidationError::new(
            field,
            format!(
                "must be between {} and {} characters",
                STACKS_ADDRESS_MIN_LEN, STACKS_ADDRESS_MAX_LEN
            ),
        ));
    }

    let prefix = &address[..2];
    if prefix != "SP" && prefix != "SM" && prefix != "ST" {
        return Err(ValidationError::new(
            field,
            "must start with 'SP', 'SM' or 'ST'",
        ));
    }

    if !address[2..]
        .chars()
        .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit())
    {
        return Err(ValidationError::new(
            field,
            "must contain only uppercase letters and digits",
        ));
    }

    Ok(())
}

/// Nigerian NUBAN account numbers are exactly ten digits.
pub fn validate_account_number(account_number: &str) -> ValidationResult {
    let account_number = sanitize_string(account_number);
    validate_required("accountNumber", &account_number)?;

    if account_number.len() != ACCOUNT_NUMBER_LEN
        || !account_number.chars().all(|ch| ch.is_ascii_digit())
    {
        return Err(ValidationError::new(
            "accountNumber",
            format!("must be exactly {} digits", ACCOUNT_NUMBER_LEN),
        ));
    }

    Ok(())
}

pub fn validate_bank_code(bank_code: &str) -> ValidationResult {
    let bank_code = sanitize_string(bank_code);
    validate_required("bankCode", &bank_code)?;

    if bank_code.len() > BANK_CODE_MAX_LEN
        || !bank_code.chars().all(|ch| ch.is_ascii_alphanumeric())
    {
        return Err(ValidationError::new("bankCode", "is not a valid bank code"));
    }

    Ok(())
}

pub fn validate_token_amount(
    amount: &BigDecimal,
    min: &BigDecimal,
    max: &BigDecimal,
) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new(
            "tokenAmount",
            "must be greater than zero",
        ));
    }
    if amount < min {
        return Err(ValidationError::new(
            "tokenAmount",
            format!("must be at least {}", min),
        ));
    }
    if amount > max {
        return Err(ValidationError::new(
            "tokenAmount",
            format!("must be at most {}", max),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn valid_address() -> String {
        "SP".to_owned() + &"2".repeat(38)
    }

    #[test]
    fn validates_required_field() {
        assert!(validate_required("field", "value").is_ok());
        assert!(validate_required("field", "   ").is_err());
    }

    #[test]
    fn sanitizes_string() {
        assert_eq!(sanitize_string("  hello\tworld  "), "hello world");
        assert_eq!(sanitize_string("single"), "single");
        assert_eq!(sanitize_string(" \n "), "");
        assert_eq!(sanitize_string("ab\u{0000}cd\u{0007}"), "abcd");
    }

    #[test]
    fn validates_stacks_address() {
        assert!(validate_stacks_address("address", &valid_address()).is_ok());
        assert!(validate_stacks_address(
            "address",
            "ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM"
        )
        .is_ok());
        assert!(validate_stacks_address("address", "SM0000000000000000000000").is_ok());
        assert!(validate_stacks_address("address", "SPSHORT").is_err());
        assert!(validate_stacks_address("address", &("XX".to_owned() + &"2".repeat(38))).is_err());
        assert!(validate_stacks_address("address", &("SP".to_owned() + &"a".repeat(38))).is_err());
        assert!(validate_stacks_address("address", &("SP".to_owned() + &"2".repeat(51))).is_err());
        assert!(validate_stacks_address("address", &format!(" {} ", valid_address())).is_ok());
    }

    #[test]
    fn validates_account_number() {
        assert!(validate_account_number("0123456789").is_ok());
        assert!(validate_account_number(" 0123456789 ").is_ok());
        assert!(validate_account_number("012345678").is_err());
        assert!(validate_account_number("01234567890").is_err());
        assert!(validate_account_number("01234abcde").is_err());
        assert!(validate_account_number("").is_err());
    }

    #[test]
    fn validates_bank_code() {
        assert!(validate_bank_code("058").is_ok());
        assert!(validate_bank_code("100004").is_ok());
        assert!(validate_bank_code("").is_err());
        assert!(validate_bank_code("0 58").is_err());
        assert!(validate_bank_code(&"9".repeat(13)).is_err());
    }

    #[test]
    fn validates_token_amount_bounds() {
        let min = BigDecimal::from(1);
        let max = BigDecimal::from(10_000);

        assert!(validate_token_amount(&BigDecimal::from(100), &min, &max).is_ok());
        assert!(validate_token_amount(&min, &min, &max).is_ok());
        assert!(validate_token_amount(&max, &min, &max).is_ok());
        assert!(validate_token_amount(&BigDecimal::from(0), &min, &max).is_err());
        assert!(validate_token_amount(&BigDecimal::from(-5), &min, &max).is_err());
        assert!(
            validate_token_amount(&BigDecimal::from_str("0.5").unwrap(), &min, &max).is_err()
        );
        assert!(validate_token_amount(&BigDecimal::from(10_001), &min, &max).is_err());
    }
}
