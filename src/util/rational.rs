//! Exact rational time-base arithmetic.
//!
//! These helpers mirror libavutil's `av_rescale_rnd`, `av_rescale_q`,
//! `av_compare_ts`, `av_inv_q` and `av_mul_q`, computed on 128-bit
//! intermediates so no precision is lost for any pair of 64-bit inputs.

use std::cmp::Ordering;
use std::fmt;

/// Reserved "no value" timestamp, identical to `AV_NOPTS_VALUE`.
pub const NOPTS_VALUE: i64 = i64::MIN;

/// Ticks per second of the global time base (microseconds).
pub const TIME_BASE: i32 = 1_000_000;

/// The global time base, `1/1000000`.
pub const TIME_BASE_Q: Rational = Rational { num: 1, den: TIME_BASE };

/// A fraction `num/den`, used as a time base or a rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// `true` for `0/x` and for the `{0, 0}` "unset" marker.
    pub fn is_zero(&self) -> bool {
        self.num == 0
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self { num: 0, den: 1 }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl From<(i32, i32)> for Rational {
    fn from((num, den): (i32, i32)) -> Self {
        Self { num, den }
    }
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_sys_next::AVRational> for Rational {
    fn from(q: ffmpeg_sys_next::AVRational) -> Self {
        Self { num: q.num, den: q.den }
    }
}

/// Rounding mode for [`rescale_rnd`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Round toward zero.
    Zero,
    /// Round away from zero.
    Inf,
    /// Round toward -infinity.
    Down,
    /// Round toward +infinity.
    Up,
    /// Round to nearest, halfway cases away from zero.
    NearInf,
}

/// Computes `a * b / c` with the requested rounding.
///
/// Returns [`NOPTS_VALUE`] when `c <= 0`, `b < 0`, or the result does not fit
/// in an `i64`. When `pass_minmax` is set, `i64::MIN` and `i64::MAX` are
/// passed through unchanged so sentinels survive a rescale.
pub fn rescale_rnd(a: i64, b: i64, c: i64, rnd: Rounding, pass_minmax: bool) -> i64 {
    if c <= 0 || b < 0 {
        return NOPTS_VALUE;
    }
    if pass_minmax && (a == i64::MIN || a == i64::MAX) {
        return a;
    }

    let negative = a < 0;
    // Rounding direction flips for negative inputs since we work on |a|.
    let rnd = match (negative, rnd) {
        (true, Rounding::Down) => Rounding::Up,
        (true, Rounding::Up) => Rounding::Down,
        (_, rnd) => rnd,
    };

    let abs_a = (a as i128).abs();
    let b = b as i128;
    let c = c as i128;
    let r = match rnd {
        Rounding::Zero | Rounding::Down => 0,
        Rounding::Inf | Rounding::Up => c - 1,
        Rounding::NearInf => c / 2,
    };
    let magnitude = (abs_a * b + r) / c;
    let value = if negative { -magnitude } else { magnitude };

    i64::try_from(value).unwrap_or(NOPTS_VALUE)
}

/// Rescales `a` from time base `bq` to time base `cq`, rounding to nearest.
pub fn rescale_q(a: i64, bq: Rational, cq: Rational) -> i64 {
    rescale_q_rnd(a, bq, cq, Rounding::NearInf, false)
}

/// Rescales `a` from time base `bq` to time base `cq` with explicit rounding.
pub fn rescale_q_rnd(a: i64, bq: Rational, cq: Rational, rnd: Rounding, pass_minmax: bool) -> i64 {
    let b = bq.num as i64 * cq.den as i64;
    let c = cq.num as i64 * bq.den as i64;
    rescale_rnd(a, b, c, rnd, pass_minmax)
}

/// Compares two timestamps expressed in different time bases.
pub fn compare_ts(ts_a: i64, tb_a: Rational, ts_b: i64, tb_b: Rational) -> Ordering {
    let a = ts_a as i128 * tb_a.num as i128 * tb_b.den as i128;
    let b = ts_b as i128 * tb_b.num as i128 * tb_a.den as i128;
    a.cmp(&b)
}

/// Inverts a rational, `num/den -> den/num`.
pub fn inv_q(q: Rational) -> Rational {
    Rational { num: q.den, den: q.num }
}

/// Multiplies two rationals and reduces the result.
pub fn mul_q(b: Rational, c: Rational) -> Rational {
    reduce(b.num as i64 * c.num as i64, b.den as i64 * c.den as i64)
}

/// Converts a rational to a float.
pub fn q2d(q: Rational) -> f64 {
    q.num as f64 / q.den as f64
}

fn reduce(num: i64, den: i64) -> Rational {
    let g = gcd(num.unsigned_abs(), den.unsigned_abs()).max(1) as i64;
    let (mut num, mut den) = (num / g, den / g);
    if den < 0 {
        num = -num;
        den = -den;
    }
    let num = num.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    let den = den.clamp(0, i32::MAX as i64) as i32;
    Rational { num, den }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}
