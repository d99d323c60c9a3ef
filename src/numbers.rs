//! Fixed-width, order-preserving encoding of decimal numerals.
//!
//! A numeral is parsed to a float64, shifted by 10^9 so every value in
//! range becomes non-negative, then scaled by 10^9 again to keep nine
//! fractional digits. The result is printed as a zero-padded 19-digit
//! integer, so comparing two canonical strings byte by byte gives the same
//! answer as comparing the numbers.
//!
//! ```text
//! -999999999.5 -> 0000000000500000000
//!          0   -> 1000000000000000000
//!        350   -> 1000000350000000000
//! ```
//!
//! Textually different numerals of equal value ("350", "350.0", "3.5e2")
//! canonicalize identically.

use std::borrow::Cow;

use crate::QuaminaError;

/// Exclusive bound on the magnitude of numbers that can be canonicalized.
pub const NINE_DIGITS: f64 = 1_000_000_000.0;

/// Maximum significant digits accepted in a numeral.
pub const DIGITS_OF_PRECISION: usize = 18;

/// Length of every canonical string.
pub const CANONICAL_WIDTH: usize = 19;

/// Largest key a canonical string can spell.
pub const MAX_KEY: u64 = 9_999_999_999_999_999_999;

/// Canonicalize a decimal numeral (optional sign, fraction and exponent).
///
/// Rejects numerals with more than 18 significant digits and numbers whose
/// magnitude is 10^9 or more with `OutOfRangeNumeric`.
pub fn canonicalize(numeral: &[u8]) -> Result<String, QuaminaError> {
    let text = std::str::from_utf8(numeral)
        .map_err(|_| QuaminaError::InvalidNumber(String::from_utf8_lossy(numeral).into_owned()))?;
    if !is_number(numeral) {
        return Err(QuaminaError::InvalidNumber(text.to_string()));
    }

    let digits = significant_digits(numeral);
    if digits > DIGITS_OF_PRECISION {
        return Err(QuaminaError::OutOfRangeNumeric(format!(
            "{text} has {digits} significant digits, exceeds max of {DIGITS_OF_PRECISION}"
        )));
    }

    let f: f64 = text
        .parse()
        .map_err(|_| QuaminaError::InvalidNumber(text.to_string()))?;
    if !f.is_finite() || f >= NINE_DIGITS || f <= -NINE_DIGITS {
        return Err(QuaminaError::OutOfRangeNumeric(format!(
            "{text} is outside of range ({}, {})",
            -NINE_DIGITS, NINE_DIGITS
        )));
    }

    Ok(format!("{:019.0}", (f + NINE_DIGITS) * NINE_DIGITS))
}

/// The spelling numerals are compared in when they can't be canonicalized:
/// the written text with a lowercase exponent mark and no `+` after it.
///
/// `1E+12`, `1e+12` and `1e12` all become `1e12`. Numerals that already
/// have that form are borrowed unchanged.
pub fn numeral_text(numeral: &[u8]) -> Cow<'_, [u8]> {
    if !numeral.iter().any(|&b| b == b'E' || b == b'+') {
        return Cow::Borrowed(numeral);
    }
    let mut text = Vec::with_capacity(numeral.len());
    let mut after_mark = false;
    for &b in numeral {
        match b {
            b'e' | b'E' => {
                text.push(b'e');
                after_mark = true;
                continue;
            }
            b'+' if after_mark => {}
            _ => text.push(b),
        }
        after_mark = false;
    }
    Cow::Owned(text)
}

/// Canonicalize and return the canonical string's integer value.
pub fn canonical_key(numeral: &[u8]) -> Result<u64, QuaminaError> {
    let canonical = canonicalize(numeral)?;
    canonical
        .parse()
        .map_err(|_| QuaminaError::InvalidNumber(canonical))
}

/// Render a key back into its 19-digit canonical form.
pub fn key_digits(key: u64) -> [u8; CANONICAL_WIDTH] {
    let mut digits = [b'0'; CANONICAL_WIDTH];
    let mut rest = key;
    for slot in digits.iter_mut().rev() {
        *slot = b'0' + (rest % 10) as u8;
        rest /= 10;
    }
    digits
}

/// True if the bytes are shaped like a JSON number: optional minus,
/// integer part, optional fraction, optional exponent.
pub fn is_number(val: &[u8]) -> bool {
    let mut i = 0;
    if val.first() == Some(&b'-') {
        i += 1;
    }
    let int_start = i;
    while i < val.len() && val[i].is_ascii_digit() {
        i += 1;
    }
    if i == int_start {
        return false;
    }
    if i < val.len() && val[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < val.len() && val[i].is_ascii_digit() {
            i += 1;
        }
        if i == frac_start {
            return false;
        }
    }
    if i < val.len() && (val[i] == b'e' || val[i] == b'E') {
        i += 1;
        if i < val.len() && (val[i] == b'+' || val[i] == b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < val.len() && val[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }
    i == val.len()
}

/// Count mantissa digits from the first non-zero digit on.
fn significant_digits(numeral: &[u8]) -> usize {
    numeral
        .iter()
        .take_while(|&&b| b != b'e' && b != b'E')
        .filter(|b| b.is_ascii_digit())
        .skip_while(|&&b| b == b'0')
        .count()
}
