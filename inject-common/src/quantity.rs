//! Resource quantities as accepted by the cluster API (`500m`, `1.5`, `128Mi`, `1e3`).
//!
//! Only parsing and rounding to whole units are needed here: the raw annotation string is what
//! ends up in the rendered container, the parsed value only validates it and derives the
//! proxy worker bounds.

use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantityError(String);

impl Display for QuantityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for QuantityError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scale {
    /// value = mantissa * 10^exp
    Decimal(i32),
    /// value = mantissa * 2^exp
    Binary(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quantity {
    raw: String,
    negative: bool,
    mantissa: u128,
    fraction_digits: u32,
    scale: Scale,
}

fn invalid(raw: &str) -> QuantityError {
    QuantityError(format!(
        "quantities must match the regular expression '^([+-]?[0-9.]+)([eEinumkKMGTP]*[-+]?[0-9]*)$': {}",
        raw
    ))
}

fn split_suffix(raw: &str) -> Result<(&str, Scale), QuantityError> {
    const BINARY: [(&str, u32); 6] = [
        ("Ki", 10),
        ("Mi", 20),
        ("Gi", 30),
        ("Ti", 40),
        ("Pi", 50),
        ("Ei", 60),
    ];
    const DECIMAL: [(&str, i32); 9] = [
        ("n", -9),
        ("u", -6),
        ("m", -3),
        ("k", 3),
        ("M", 6),
        ("G", 9),
        ("T", 12),
        ("P", 15),
        ("E", 18),
    ];
    for (suffix, exp) in BINARY {
        if let Some(number) = raw.strip_suffix(suffix) {
            return Ok((number, Scale::Binary(exp)));
        }
    }
    // A decimal exponent (1e3, 2E-2) has to be checked before the plain SI suffixes
    if let Some(pos) = raw.find(|c: char| c == 'e' || c == 'E') {
        let (number, exponent) = raw.split_at(pos);
        let exponent = &exponent[1..];
        // A trailing `E` alone is the exa suffix
        if !exponent.is_empty() {
            let digits = exponent.trim_start_matches(|c: char| c == '+' || c == '-');
            if exponent.len() - digits.len() > 1 || !is_digits(digits) {
                return Err(invalid(raw));
            }
            let exp = exponent.parse::<i32>().map_err(|_| invalid(raw))?;
            return Ok((number, Scale::Decimal(exp)));
        }
    }
    for (suffix, exp) in DECIMAL {
        if let Some(number) = raw.strip_suffix(suffix) {
            return Ok((number, Scale::Decimal(exp)));
        }
    }
    Ok((raw, Scale::Decimal(0)))
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (number, scale) = split_suffix(raw)?;
        let (negative, number) = match number.as_bytes().first() {
            Some(b'-') => (true, &number[1..]),
            Some(b'+') => (false, &number[1..]),
            _ => (false, number),
        };
        let (whole, fraction) = match number.split_once('.') {
            Some((w, f)) => (w, f),
            None => (number, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid(raw));
        }
        if (!whole.is_empty() && !is_digits(whole)) || (!fraction.is_empty() && !is_digits(fraction))
        {
            return Err(invalid(raw));
        }
        let digits = format!("{}{}", whole, fraction);
        let digits = digits.trim_start_matches('0');
        let mantissa = if digits.is_empty() {
            0
        } else {
            digits
                .parse::<u128>()
                .map_err(|_| QuantityError(format!("quantity is too large: {}", raw)))?
        };
        Ok(Quantity {
            raw: raw.to_string(),
            negative,
            mantissa,
            fraction_digits: fraction.len() as u32,
            scale,
        })
    }
}

impl Quantity {
    /// Rounds the quantity up to the next whole unit, away from zero.
    /// `1500m` is 2, `1` is 1, `0.1` is 1, `-1500m` is -2.
    pub fn ceil_whole(&self) -> Result<i64, QuantityError> {
        let overflow = || QuantityError(format!("Could not parse cores: {}", self.raw));
        if self.mantissa == 0 {
            return Ok(0);
        }
        let (numerator, denominator) = match self.scale {
            Scale::Decimal(exp) => {
                let exp = exp - self.fraction_digits as i32;
                if exp >= 0 {
                    let factor = 10u128.checked_pow(exp as u32).ok_or_else(overflow)?;
                    (
                        self.mantissa.checked_mul(factor).ok_or_else(overflow)?,
                        1,
                    )
                } else {
                    match 10u128.checked_pow((-exp) as u32) {
                        Some(den) => (self.mantissa, den),
                        // Smaller than any representable denominator, but still positive
                        None => (1, 1),
                    }
                }
            }
            Scale::Binary(exp) => (
                self.mantissa
                    .checked_mul(1u128 << exp)
                    .ok_or_else(overflow)?,
                10u128
                    .checked_pow(self.fraction_digits)
                    .ok_or_else(overflow)?,
            ),
        };
        let whole = numerator / denominator + u128::from(numerator % denominator != 0);
        let whole = i64::try_from(whole).map_err(|_| overflow())?;
        Ok(if self.negative { -whole } else { whole })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

pub fn parse_quantity(raw: &str) -> Result<Quantity, QuantityError> {
    raw.parse()
}
