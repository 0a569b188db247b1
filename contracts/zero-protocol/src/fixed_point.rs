//! 18-decimal fixed point arithmetic.
//!
//! Every amount, price and ratio in the protocol is an `i128` mantissa with an implicit
//! scale of 1e18. Division truncates toward zero. Products are formed in 256 bits before
//! dividing, so `a * b / c` only fails when the final quotient does not fit.

use crate::Error;

pub const DECIMAL_PRECISION: i128 = 1_000_000_000_000_000_000;
const HALF_PRECISION: i128 = DECIMAL_PRECISION / 2;

/// 1000 years of minutes. Larger exponents would only drive a decay factor to zero.
const MAX_POW_EXPONENT: u64 = 525_600_000;

const LOW_MASK: u128 = u64::MAX as u128;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Decimal(i128);

impl Decimal {
    pub const ZERO: Decimal = Decimal(0);
    pub const ONE: Decimal = Decimal(DECIMAL_PRECISION);
    pub const MAX: Decimal = Decimal(i128::MAX);

    pub const fn from_raw(raw: i128) -> Self {
        Decimal(raw)
    }

    pub const fn raw(self) -> i128 {
        self.0
    }

    /// Whole units, e.g. `from_units(200)` is 200.0
    pub fn from_units(units: i128) -> Result<Self, Error> {
        units
            .checked_mul(DECIMAL_PRECISION)
            .map(Decimal)
            .ok_or(Error::Overflow)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Decimal) -> Result<Self, Error> {
        self.0
            .checked_add(other.0)
            .map(Decimal)
            .ok_or(Error::Overflow)
    }

    pub fn checked_sub(self, other: Decimal) -> Result<Self, Error> {
        self.0
            .checked_sub(other.0)
            .map(Decimal)
            .ok_or(Error::Overflow)
    }

    pub fn checked_mul(self, other: Decimal) -> Result<Self, Error> {
        mul_div(self.0, other.0, DECIMAL_PRECISION).map(Decimal)
    }

    pub fn checked_div(self, other: Decimal) -> Result<Self, Error> {
        mul_div(self.0, DECIMAL_PRECISION, other.0).map(Decimal)
    }

    /// `self * numerator / denominator` with a 256-bit intermediate product.
    pub fn mul_div(self, numerator: Decimal, denominator: Decimal) -> Result<Self, Error> {
        mul_div(self.0, numerator.0, denominator.0).map(Decimal)
    }

    /// Raises a factor in `[0, 1]` to an integer power by repeated squaring.
    ///
    /// Intermediate products round half up. The exponent is capped at 1000 years of
    /// minutes, far past the point where any decay factor has reached zero.
    pub fn pow(self, exponent: u64) -> Result<Self, Error> {
        let mut n = exponent.min(MAX_POW_EXPONENT);
        if n == 0 {
            return Ok(Decimal::ONE);
        }

        let mut x = self.0;
        let mut y = DECIMAL_PRECISION;
        while n > 1 {
            if n % 2 == 0 {
                x = mul_round_half_up(x, x)?;
                n /= 2;
            } else {
                y = mul_round_half_up(x, y)?;
                x = mul_round_half_up(x, x)?;
                n = (n - 1) / 2;
            }
        }
        mul_round_half_up(x, y).map(Decimal)
    }
}

fn mul_round_half_up(x: i128, y: i128) -> Result<i128, Error> {
    let Some(product) = x.checked_mul(y) else {
        return Err(Error::Overflow);
    };
    let Some(rounded) = product.checked_add(HALF_PRECISION) else {
        return Err(Error::Overflow);
    };
    Ok(rounded / DECIMAL_PRECISION)
}

/// `a * b / c`, truncated toward zero.
pub fn mul_div(a: i128, b: i128, c: i128) -> Result<i128, Error> {
    mul_div_rem(a, b, c).map(|(quotient, _)| quotient)
}

/// `a * b / c` and the remainder of that division.
///
/// The quotient truncates toward zero and the remainder carries the sign of `a * b`,
/// matching Rust's `/` and `%` on the full-width product.
pub fn mul_div_rem(a: i128, b: i128, c: i128) -> Result<(i128, i128), Error> {
    if c == 0 {
        return Err(Error::DivisionByZero);
    }
    let product_negative = (a < 0) != (b < 0);
    let quotient_negative = product_negative != (c < 0);

    let (hi, lo) = widening_mul(a.unsigned_abs(), b.unsigned_abs());
    let Some((quotient, remainder)) = div_wide(hi, lo, c.unsigned_abs()) else {
        return Err(Error::Overflow);
    };
    let quotient = i128::try_from(quotient).map_err(|_| Error::Overflow)?;
    let remainder = i128::try_from(remainder).map_err(|_| Error::Overflow)?;

    Ok((
        if quotient_negative { -quotient } else { quotient },
        if product_negative { -remainder } else { remainder },
    ))
}

/// Full 256-bit product of two u128 values as `(high, low)` halves.
fn widening_mul(a: u128, b: u128) -> (u128, u128) {
    let (a_hi, a_lo) = (a >> 64, a & LOW_MASK);
    let (b_hi, b_lo) = (b >> 64, b & LOW_MASK);

    let lo_lo = a_lo * b_lo;
    let lo_hi = a_lo * b_hi;
    let hi_lo = a_hi * b_lo;
    let hi_hi = a_hi * b_hi;

    let middle = (lo_lo >> 64) + (lo_hi & LOW_MASK) + (hi_lo & LOW_MASK);
    let low = (lo_lo & LOW_MASK) | (middle << 64);
    let high = hi_hi + (lo_hi >> 64) + (hi_lo >> 64) + (middle >> 64);
    (high, low)
}

/// Divides the 256-bit value `(high, low)` by `divisor`.
///
/// Returns `None` when the quotient does not fit in 128 bits.
fn div_wide(high: u128, low: u128, divisor: u128) -> Option<(u128, u128)> {
    if high >= divisor {
        return None;
    }
    if high == 0 {
        return Some((low / divisor, low % divisor));
    }

    let mut remainder = high;
    let mut quotient = 0u128;
    for bit in (0..128).rev() {
        let carry = remainder >> 127;
        remainder = (remainder << 1) | ((low >> bit) & 1);
        quotient <<= 1;
        // with the carry set the true value exceeds u128::MAX, hence exceeds the divisor
        if carry == 1 || remainder >= divisor {
            remainder = remainder.wrapping_sub(divisor);
            quotient |= 1;
        }
    }
    Some((quotient, remainder))
}
