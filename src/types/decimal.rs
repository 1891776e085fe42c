use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecimalError {
    #[error("invalid decimal literal '{0}'")]
    Invalid(String),

    #[error("'{value}' does not fit DECIMAL({precision},{scale})")]
    Overflow {
        value: String,
        precision: u32,
        scale: u32,
    },

    #[error("'{value}' has non-zero digits beyond scale {scale}")]
    PrecisionLoss { value: String, scale: u32 },
}

/// Exact fixed-point number: `unscaled * 10^-scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Decimal {
    unscaled: i128,
    scale: u32,
}

impl Decimal {
    /// Widest precision representable in an `i128` mantissa.
    pub const MAX_PRECISION: u32 = 38;

    pub fn new(unscaled: i128, scale: u32) -> Self {
        Self { unscaled, scale }
    }

    pub fn unscaled(&self) -> i128 {
        self.unscaled
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Parses a decimal literal into a value with exactly `scale` fractional digits.
    ///
    /// Missing fractional digits are zero-filled. Trailing digits past `scale`
    /// are accepted only when they are all zero, and the integer part must fit
    /// in `precision - scale` digits.
    pub fn parse(text: &str, precision: u32, scale: u32) -> Result<Self, DecimalError> {
        let invalid = || DecimalError::Invalid(text.to_string());
        let overflow = || DecimalError::Overflow {
            value: text.to_string(),
            precision,
            scale,
        };

        let trimmed = text.trim();
        let (negative, digits) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };

        let (int_part, frac_part) = match digits.split_once('.') {
            Some((int_part, frac_part)) => (int_part, frac_part),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let keep = frac_part.len().min(scale as usize);
        let (frac_part, dropped) = frac_part.split_at(keep);
        if dropped.bytes().any(|b| b != b'0') {
            return Err(DecimalError::PrecisionLoss {
                value: text.to_string(),
                scale,
            });
        }

        let int_part = int_part.trim_start_matches('0');
        if scale > precision || int_part.len() > (precision - scale) as usize {
            return Err(overflow());
        }

        let mut unscaled: i128 = 0;
        let padding = std::iter::repeat_n(b'0', scale as usize - frac_part.len());
        for b in int_part.bytes().chain(frac_part.bytes()).chain(padding) {
            unscaled = unscaled
                .checked_mul(10)
                .and_then(|v| v.checked_add(i128::from(b - b'0')))
                .ok_or_else(overflow)?;
        }

        Ok(Self {
            unscaled: if negative { -unscaled } else { unscaled },
            scale,
        })
    }

    /// Parses a literal at the scale it is written with, e.g. `"1.50"` has
    /// scale 2. Used when the declared scale is unknown.
    pub fn parse_natural(text: &str) -> Result<Self, DecimalError> {
        let scale = text
            .trim()
            .split_once('.')
            .map_or(0, |(_, frac)| frac.len() as u32)
            .min(Self::MAX_PRECISION);
        Self::parse(text, Self::MAX_PRECISION, scale)
    }

    /// Lossy conversion for display and plotting.
    pub fn to_f64(&self) -> f64 {
        self.unscaled as f64 / 10f64.powi(self.scale as i32)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.unscaled.unsigned_abs().to_string();
        if self.unscaled < 0 {
            f.write_str("-")?;
        }
        let scale = self.scale as usize;
        if scale == 0 {
            return f.write_str(&digits);
        }

        let digits = format!("{digits:0>width$}", width = scale + 1);
        let (int_part, frac_part) = digits.split_at(digits.len() - scale);
        write!(f, "{int_part}.{frac_part}")
    }
}
