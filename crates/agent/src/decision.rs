//! Strict parser for the two-token decision grammar.
//!
//! ```text
//! decision := ("TRUE" | "FALSE") "_<" price ">"
//! price    := sign? (digits ("." digits?)? | "." digits) (("e" | "E") sign? digits)?
//! ```
//!
//! Surrounding whitespace is ignored; anything else that deviates fails closed.
//! A price must be exactly representable as a `Decimal`: literals that would be
//! rounded (more than 28 fractional digits) or that fall outside its range
//! (`1e-300`, `1e40`) are rejected rather than approximated.

use std::str::FromStr;

use parley_core::TransactDecision;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MalformedDecision {
    #[error("decision output is empty")]
    Empty,
    #[error("decision output `{0}` is missing the `_` delimiter")]
    MissingDelimiter(String),
    #[error("unrecognized decision token `{0}`")]
    UnknownToken(String),
    #[error("decision price `{0}` is not enclosed in angle brackets")]
    MissingBrackets(String),
    #[error("decision price `{0}` is not a numeric literal")]
    InvalidPrice(String),
}

pub fn parse_decision(output: &str) -> Result<TransactDecision, MalformedDecision> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(MalformedDecision::Empty);
    }

    let (token, bracketed) = trimmed
        .split_once('_')
        .ok_or_else(|| MalformedDecision::MissingDelimiter(trimmed.to_string()))?;

    let accepted = match token {
        "TRUE" => true,
        "FALSE" => false,
        other => return Err(MalformedDecision::UnknownToken(other.to_string())),
    };

    let literal = bracketed
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
        .ok_or_else(|| MalformedDecision::MissingBrackets(bracketed.to_string()))?;
    let price = parse_price(literal)?;

    if accepted {
        Ok(TransactDecision::accept(price))
    } else {
        Ok(TransactDecision::refuse())
    }
}

fn parse_price(literal: &str) -> Result<Decimal, MalformedDecision> {
    let invalid = || MalformedDecision::InvalidPrice(literal.to_string());

    let (mantissa, exponent) = match literal.find(['e', 'E']) {
        Some(index) => (&literal[..index], Some(&literal[index + 1..])),
        None => (literal, None),
    };

    let unsigned = mantissa.strip_prefix(['+', '-']).unwrap_or(mantissa);
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let digits_only = |part: &str| part.bytes().all(|byte| byte.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !digits_only(whole) || !digits_only(fraction) {
        return Err(invalid());
    }

    let negative = mantissa.starts_with('-');
    let canonical = format!(
        "{}{}.{}",
        if negative { "-" } else { "" },
        if whole.is_empty() { "0" } else { whole },
        if fraction.is_empty() { "0" } else { fraction }
    );

    let exponent = match exponent {
        None => 0,
        Some(exponent) => {
            let exponent_digits = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
            if exponent_digits.is_empty() || !digits_only(exponent_digits) {
                return Err(invalid());
            }
            match exponent.parse::<i64>() {
                // Beyond any exponent a Decimal can carry.
                Ok(value) if value.unsigned_abs() <= 64 => value,
                _ => return Err(invalid()),
            }
        }
    };

    let price = if exponent == 0 {
        Decimal::from_str(&canonical)
    } else {
        Decimal::from_scientific(&format!("{canonical}e{exponent}"))
    }
    .map_err(|_| invalid())?;

    let written = significant(&format!("{whole}{fraction}"), exponent - fraction.len() as i64);
    let parsed =
        significant(&price.mantissa().unsigned_abs().to_string(), -i64::from(price.scale()));
    let exact = if written.0.is_empty() {
        price.is_zero()
    } else {
        written == parsed && price.is_sign_negative() == negative
    };
    if !exact {
        return Err(invalid());
    }
    Ok(price)
}

/// Strips insignificant zeros, returning `(digits, power_of_ten)`.
fn significant(digits: &str, power: i64) -> (String, i64) {
    let digits = digits.trim_start_matches('0');
    let trimmed = digits.trim_end_matches('0');
    (trimmed.to_string(), power + (digits.len() - trimmed.len()) as i64)
}
