// syn.seq -- a tempo-aware sequencer and playback scheduler
// Copyright (C) 2021  Fabian Thorand
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Rational numbers are used for all musical positions and elapsed times,
//! so that long performances never accumulate floating point drift.

use std::error::Error;
use std::fmt;
use std::{cmp::Ordering, ops};

/// Underlying integral type for the rational numbers.
///
/// Tempo anchors multiply denominators of positions and seconds, which outgrows `i64` in long songs.
pub type Int = i128;

/// A rational number, always fully normalized.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Rational {
    /// The numerator of the fraction.
    /// If the fraction is negative, the numerator will be made negative.
    num: Int,
    /// The denominator of the fraction.
    /// If the fraction is negative, the denominator will stay positive.
    denom: Int,
}

impl Rational {
    pub const ZERO: Rational = Rational { num: 0, denom: 1 };

    // ==================== Constructors ====================

    /// Create a new rational from a potentially unnormalized fraction.
    ///
    /// # Panic
    ///
    /// Panics if the denominator is zero.
    ///
    /// # Examples
    ///
    /// ```
    /// # use synseq_core::rational::*;
    ///
    /// assert_eq!(Rational::new(10, 5), Rational::new(2, 1));
    /// assert_eq!(Rational::new(-10, -5), Rational::new(6, 3));
    /// assert_eq!(Rational::new(-6, 8), Rational::new(3, -4));
    /// assert_eq!(Rational::new(0, -7).denominator(), 1);
    /// ```
    pub fn new(num: Int, denom: Int) -> Rational {
        assert_ne!(denom, 0, "Denominator must not be zero");
        Rational { num, denom }.normalize()
    }

    /// Like [`Rational::new`], but reports a zero denominator instead of panicking.
    pub fn try_new(num: Int, denom: Int) -> Option<Rational> {
        if denom == 0 {
            None
        } else {
            Some(Rational { num, denom }.normalize())
        }
    }

    pub const fn int(int: Int) -> Rational {
        Rational { num: int, denom: 1 }
    }

    pub const fn zero() -> Rational {
        Rational::int(0)
    }

    pub const fn one() -> Rational {
        Rational::int(1)
    }

    pub fn nth(n: Int) -> Self {
        Rational::new(1, n)
    }

    /// Exact value of the decimal text of a float.
    ///
    /// The float is printed with the shortest representation that reads back as the same float,
    /// and that digit string is then parsed exactly. No binary expansion of the float is involved,
    /// so `0.1` becomes exactly `1/10`.
    /// Returns `None` for infinities, NaN and values that overflow the integer type.
    ///
    /// ```
    /// # use synseq_core::rational::*;
    /// assert_eq!(Rational::from_f64(0.1), Some(Rational::new(1, 10)));
    /// assert_eq!(Rational::from_f64(1e3), Some(Rational::int(1000)));
    /// assert_eq!(Rational::from_f64(-2.5e-2), Some(Rational::new(-1, 40)));
    /// assert_eq!(Rational::from_f64(f64::NAN), None);
    /// ```
    pub fn from_f64(value: f64) -> Option<Rational> {
        if !value.is_finite() {
            return None;
        }
        parse_decimal(&format!("{:e}", value)).ok()
    }

    // ==================== Transformations ====================

    /// Reduce by the greatest common divisor and move the sign into the numerator.
    fn normalize(self) -> Rational {
        debug_assert_ne!(self.denom, 0);
        let sign = if self.denom < 0 { -1 } else { 1 };
        let div = gcd(self.num, self.denom);
        Rational {
            num: sign * self.num / div,
            denom: sign * self.denom / div,
        }
    }

    /// # Panic
    ///
    /// Panics when taking the reciprocal of zero.
    pub fn recip(self) -> Rational {
        Rational::new(self.denom, self.num)
    }

    pub fn abs(self) -> Rational {
        Rational {
            num: self.num.abs(),
            denom: self.denom,
        }
    }

    /// Compute an integer power of the rational.
    ///
    /// ```
    /// # use synseq_core::rational::*;
    /// assert_eq!(Rational::int(2).powi(0), Rational::int(1));
    /// assert_eq!(Rational::int(2).powi(5), Rational::int(32));
    /// assert_eq!(Rational::int(10).powi(3), Rational::int(1000));
    /// assert_eq!(Rational::int(2).powi(-3), Rational::new(1, 8));
    /// assert_eq!(Rational::int(10).powi(-2), Rational::new(1, 100));
    /// ```
    pub fn powi(self, power: i32) -> Rational {
        if power == 0 {
            return Self::one();
        }
        let mut accum = if power > 0 { self } else { self.recip() };
        let mut correction = Rational::one();
        let mut remaining_power = power.abs();

        while remaining_power > 1 {
            if remaining_power % 2 == 1 {
                correction *= accum;
                remaining_power -= 1;
            }
            accum = accum * accum;
            remaining_power /= 2;
        }

        accum * correction
    }

    /// Round towards zero.
    ///
    /// ```
    /// # use synseq_core::rational::*;
    ///
    /// assert_eq!(Rational::new(10, 5).truncate(), 2);
    /// assert_eq!(Rational::new(-10, 6).truncate(), -1);
    /// assert_eq!(Rational::new(13, 7).truncate(), 1);
    /// ```
    pub const fn truncate(self) -> Int {
        self.num / self.denom
    }

    /// Round to closest integer, half away from zero.
    ///
    /// ```
    /// # use synseq_core::rational::*;
    ///
    /// assert_eq!(Rational::new(10, 4).round(), 3);
    /// assert_eq!(Rational::new(-10, 4).round(), -3);
    /// assert_eq!(Rational::new(3, 7).round(), 0);
    /// assert_eq!(Rational::new(4, 7).round(), 1);
    /// ```
    pub fn round(self) -> Int {
        (self.num + self.num.signum() * self.denom / 2) / self.denom
    }

    /// Lossy conversion at the boundary to sample based code.
    pub fn to_f64(self) -> f64 {
        self.num as f64 / self.denom as f64
    }

    /// The exact decimal expansion, if it is finite.
    ///
    /// That is the case exactly when the denominator has no prime factors besides 2 and 5.
    ///
    /// ```
    /// # use synseq_core::rational::*;
    /// assert_eq!(Rational::new(1, 10).to_decimal_string().as_deref(), Some("0.1"));
    /// assert_eq!(Rational::new(-1, 40).to_decimal_string().as_deref(), Some("-0.025"));
    /// assert_eq!(Rational::int(1000).to_decimal_string().as_deref(), Some("1000"));
    /// assert_eq!(Rational::new(1, 3).to_decimal_string(), None);
    /// ```
    pub fn to_decimal_string(self) -> Option<String> {
        let mut rest = self.denom;
        let mut twos = 0u32;
        let mut fives = 0u32;
        while rest % 2 == 0 {
            rest /= 2;
            twos += 1;
        }
        while rest % 5 == 0 {
            rest /= 5;
            fives += 1;
        }
        if rest != 1 {
            return None;
        }

        let scale = twos.max(fives);
        let digits_value = self.num.abs().checked_mul(10_i128.checked_pow(scale)?)? / self.denom;
        let mut digits = digits_value.to_string();
        if scale > 0 {
            let scale = scale as usize;
            if digits.len() <= scale {
                digits = "0".repeat(scale + 1 - digits.len()) + &digits;
            }
            digits.insert(digits.len() - scale, '.');
        }
        if self.num < 0 {
            digits.insert(0, '-');
        }
        Some(digits)
    }

    // ==================== Predicates ====================

    pub const fn is_zero(self) -> bool {
        self.num == 0
    }

    pub const fn is_negative(self) -> bool {
        self.num < 0
    }

    // ==================== Destructors ====================

    pub const fn numerator(self) -> Int {
        self.num
    }

    pub const fn denominator(self) -> Int {
        self.denom
    }
}

impl Default for Rational {
    fn default() -> Self {
        Rational::ZERO
    }
}

/// # Examples
///
/// ```
/// use synseq_core::rational::*;
///
/// assert_eq!(Rational::new(1, 2) + Rational::new(3, 4), Rational::new(5, 4));
/// assert_eq!(Rational::new(3, 4) + Rational::new(3, 4), Rational::new(3, 2));
/// assert_eq!(Rational::new(3, 4) + Rational::new(-5, 8), Rational::new(1, 8));
/// ```
impl ops::Add for Rational {
    type Output = Rational;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn add(self, rhs: Rational) -> Self::Output {
        // Using the lcm keeps intermediate products small for the common case of equal denominators.
        let div = gcd(self.denom, rhs.denom);
        let lhs_scale = rhs.denom / div;
        let rhs_scale = self.denom / div;
        Rational::new(
            self.num * lhs_scale + rhs.num * rhs_scale,
            self.denom * lhs_scale,
        )
    }
}

impl ops::Sub for Rational {
    type Output = Rational;

    fn sub(self, rhs: Rational) -> Self::Output {
        self + (-rhs)
    }
}

impl ops::Mul for Rational {
    type Output = Rational;

    fn mul(self, rhs: Rational) -> Self::Output {
        // cross-reduce first to keep the products in range
        let a = gcd(self.num, rhs.denom).max(1);
        let b = gcd(rhs.num, self.denom).max(1);
        Rational::new(
            (self.num / a) * (rhs.num / b),
            (self.denom / b) * (rhs.denom / a),
        )
    }
}

impl ops::Div for Rational {
    type Output = Rational;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn div(self, rhs: Rational) -> Self::Output {
        self * rhs.recip()
    }
}

impl ops::Mul<Int> for Rational {
    type Output = Rational;

    fn mul(self, rhs: Int) -> Self::Output {
        self * Rational::int(rhs)
    }
}

impl ops::Mul<Rational> for Int {
    type Output = Rational;

    fn mul(self, rhs: Rational) -> Self::Output {
        Rational::int(self) * rhs
    }
}

/// ```
/// # use synseq_core::rational::*;
/// assert_eq!(Rational::new(1, 4) / 2, Rational::new(1, 8));
/// assert_eq!(Rational::new(9, 13) / 3, Rational::new(3, 13));
/// ```
impl ops::Div<Int> for Rational {
    type Output = Rational;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn div(self, rhs: Int) -> Self::Output {
        self / Rational::int(rhs)
    }
}

impl ops::Neg for Rational {
    type Output = Rational;

    fn neg(self) -> Self::Output {
        Rational {
            num: -self.num,
            denom: self.denom,
        }
    }
}

impl ops::AddAssign for Rational {
    fn add_assign(&mut self, rhs: Rational) {
        *self = *self + rhs;
    }
}

impl ops::SubAssign for Rational {
    fn sub_assign(&mut self, rhs: Rational) {
        *self = *self - rhs;
    }
}

impl ops::MulAssign for Rational {
    fn mul_assign(&mut self, rhs: Rational) {
        *self = *self * rhs;
    }
}

impl ops::DivAssign for Rational {
    fn div_assign(&mut self, rhs: Rational) {
        *self = *self / rhs;
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Rational) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// ```
/// use synseq_core::rational::*;
///
/// assert!(Rational::new(3,4) < Rational::new(3,2));
/// assert!(Rational::new(-1,2) < Rational::new(1,3));
/// ```
impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        // a / b < c / d
        // <=>
        // a * d < c * b    (b, d > 0)
        let l = self.num * other.denom;
        let r = other.num * self.denom;
        l.cmp(&r)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.num)?;
        if self.denom != 1 {
            write!(f, "/{}", self.denom)?;
        }
        Ok(())
    }
}

/// An error which can be returned when parsing a rational.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRationalError(RationalErrorKind);

impl ParseRationalError {
    pub fn kind(&self) -> RationalErrorKind {
        self.0
    }
}

impl Error for ParseRationalError {}

impl fmt::Display for ParseRationalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            RationalErrorKind::InvalidInt => write!(f, "invalid integer literal"),
            RationalErrorKind::Zero => write!(f, "denominator is zero"),
            RationalErrorKind::Malformed => write!(f, "malformed fraction"),
            RationalErrorKind::Overflow => write!(f, "number too large"),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RationalErrorKind {
    /// The numerator or denominator could not be parsed as integer.
    InvalidInt,
    /// The denominator was zero
    Zero,
    /// The rational was not of the form `<int>`, `<int>/<int>` or a decimal literal.
    Malformed,
    /// The exact value does not fit into the integer type.
    Overflow,
}

/// Accepts fractions (`3/4`), integers and decimal literals with optional exponent (`-2.5e-2`).
///
/// ```
/// # use synseq_core::rational::*;
/// assert_eq!("3/4".parse::<Rational>(), Ok(Rational::new(3, 4)));
/// assert_eq!("0.75".parse::<Rational>(), Ok(Rational::new(3, 4)));
/// assert_eq!("75e-2".parse::<Rational>(), Ok(Rational::new(3, 4)));
/// assert_eq!("1e3".parse::<Rational>(), Ok(Rational::int(1000)));
/// assert!("1/0".parse::<Rational>().is_err());
/// ```
impl std::str::FromStr for Rational {
    type Err = ParseRationalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let numerator_str = parts.next().unwrap_or("");

        if let Some(denominator_str) = parts.next() {
            let numerator: Int = numerator_str
                .parse()
                .map_err(|_| ParseRationalError(RationalErrorKind::InvalidInt))?;
            let denominator: Int = denominator_str
                .parse()
                .map_err(|_| ParseRationalError(RationalErrorKind::InvalidInt))?;
            if denominator == 0 {
                Err(ParseRationalError(RationalErrorKind::Zero))
            } else if parts.next().is_some() {
                Err(ParseRationalError(RationalErrorKind::Malformed))
            } else {
                Ok(Rational::new(numerator, denominator))
            }
        } else {
            parse_decimal(numerator_str)
        }
    }
}

/// Parse `[+-]digits[.digits][(e|E)[+-]digits]` exactly.
fn parse_decimal(s: &str) -> Result<Rational, ParseRationalError> {
    let malformed = || ParseRationalError(RationalErrorKind::Malformed);
    let overflow = || ParseRationalError(RationalErrorKind::Overflow);

    let (mantissa, exponent) = match s.find(|ch| ch == 'e' || ch == 'E') {
        Some(index) => {
            let exponent: i32 = s[index + 1..]
                .parse()
                .map_err(|_| ParseRationalError(RationalErrorKind::InvalidInt))?;
            (&s[..index], exponent)
        }
        None => (s, 0),
    };

    let (negative, unsigned) = match mantissa.as_bytes().first() {
        Some(b'-') => (true, &mantissa[1..]),
        Some(b'+') => (false, &mantissa[1..]),
        _ => (false, mantissa),
    };
    let (int_digits, frac_digits) = match unsigned.find('.') {
        Some(index) => (&unsigned[..index], &unsigned[index + 1..]),
        None => (unsigned, ""),
    };
    if int_digits.is_empty() && frac_digits.is_empty() {
        return Err(malformed());
    }
    if !int_digits
        .bytes()
        .chain(frac_digits.bytes())
        .all(|b| b.is_ascii_digit())
    {
        return Err(ParseRationalError(RationalErrorKind::InvalidInt));
    }

    let mut num: Int = 0;
    for digit in int_digits.bytes().chain(frac_digits.bytes()) {
        num = num
            .checked_mul(10)
            .and_then(|n| n.checked_add(Int::from(digit - b'0')))
            .ok_or_else(overflow)?;
    }
    if negative {
        num = -num;
    }

    // fold the fractional digits and the exponent into a single power of ten
    let shift = exponent
        .checked_sub(frac_digits.len() as i32)
        .ok_or_else(overflow)?;
    let power = (10 as Int)
        .checked_pow(shift.unsigned_abs())
        .ok_or_else(overflow)?;
    if shift >= 0 {
        Ok(Rational::int(num.checked_mul(power).ok_or_else(overflow)?))
    } else {
        Ok(Rational::new(num, power))
    }
}

/// Computes the greates common divisor of two numbers using euclids algorithm.
///
/// # Example
///
/// ```
/// use synseq_core::rational::*;
///
/// assert_eq!(gcd(20, 15), 5);
/// assert_eq!(gcd(20, 19), 1);
/// assert_eq!(gcd(10, 0), 10);
/// assert_eq!(gcd(0, 10), 10);
/// assert_eq!(gcd(0, 0), 0);
/// assert_eq!(gcd(10, -10), 10);
/// ```
pub fn gcd(mut a: Int, mut b: Int) -> Int {
    // normalized inputs to be positive to guarantee that it terminates
    if a < 0 {
        a = -a
    }
    if b < 0 {
        b = -b
    }

    // Invariant: a >= b
    if a < b {
        std::mem::swap(&mut a, &mut b)
    }

    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

#[cfg(test)]
mod test {
    use super::*;

    fn dec(s: &str) -> Rational {
        s.parse().unwrap()
    }

    #[test]
    fn decimal_sums_are_exact() {
        assert_eq!(dec("0.1") + dec("0.2"), dec("0.3"));
        assert_eq!(
            (dec("0.1") + dec("0.2")).cmp(&Rational::new(3, 10)),
            Ordering::Equal
        );
        assert_eq!(dec("1.5") - dec("2.25"), Rational::new(-3, 4));

        let mut total = Rational::zero();
        for _ in 0..1000 {
            total += dec("0.001");
        }
        assert_eq!(total, Rational::one());
    }

    #[test]
    fn float_round_trip() {
        for value in &[0.1, 1e3, -2.5e-2, 0.5, 120.0, -7.0, 0.0, 1.125e-7] {
            let exact = Rational::from_f64(*value).unwrap();
            assert_eq!(exact.to_decimal_string(), Some(format!("{}", value)));
        }
    }

    #[test]
    fn exponent_folding() {
        assert_eq!(dec("1e3"), Rational::int(1000));
        assert_eq!(dec("-2.5e-2"), Rational::new(-1, 40));
        assert_eq!(dec("2.5E+1"), Rational::int(25));
        assert_eq!(dec(".5"), Rational::new(1, 2));
        assert_eq!(dec("5."), Rational::int(5));
    }

    #[test]
    fn malformed_literals() {
        assert_eq!(
            "".parse::<Rational>().unwrap_err().kind(),
            RationalErrorKind::Malformed
        );
        assert_eq!(
            "1/2/3".parse::<Rational>().unwrap_err().kind(),
            RationalErrorKind::Malformed
        );
        assert_eq!(
            "1.2.3".parse::<Rational>().unwrap_err().kind(),
            RationalErrorKind::InvalidInt
        );
        assert_eq!(
            "1e999".parse::<Rational>().unwrap_err().kind(),
            RationalErrorKind::Overflow
        );
    }

    #[test]
    fn normalized_sign() {
        let r = Rational::new(4, -6);
        assert_eq!(r.numerator(), -2);
        assert_eq!(r.denominator(), 3);
        let zero = Rational::new(0, -5) * Rational::new(3, 7);
        assert_eq!((zero.numerator(), zero.denominator()), (0, 1));
    }
}
