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

//! Exact musical positions, exact elapsed times and the tempo connecting the two.

use std::{fmt, ops};

use crate::rational::{Int, Rational};

/// Elapsed time in seconds, relative to some epoch (song start or session start).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct RationalTime(Rational);

impl RationalTime {
    pub const ZERO: RationalTime = RationalTime(Rational::ZERO);

    /// # Panic
    ///
    /// Panics if the denominator is zero.
    pub fn new(num: Int, den: Int) -> Self {
        RationalTime(Rational::new(num, den))
    }

    pub const fn seconds(seconds: Rational) -> Self {
        RationalTime(seconds)
    }

    /// Exact time from the decimal text of `seconds`, see [`Rational::from_f64`].
    pub fn from_f64(seconds: f64) -> Option<Self> {
        Rational::from_f64(seconds).map(RationalTime)
    }

    pub const fn as_rational(self) -> Rational {
        self.0
    }

    pub fn num(self) -> Int {
        self.0.numerator()
    }

    pub fn den(self) -> Int {
        self.0.denominator()
    }

    pub fn to_f64(self) -> f64 {
        self.0.to_f64()
    }

    /// The sample frame this time falls on, rounded to the closest frame.
    ///
    /// ```
    /// # use synseq_core::time::*;
    /// assert_eq!(RationalTime::new(1, 2).frames(44100), 22050);
    /// assert_eq!(RationalTime::new(1, 3).frames(48000), 16000);
    /// ```
    pub fn frames(self, sample_rate: u32) -> Int {
        (self.0 * Int::from(sample_rate)).round()
    }

    /// Exact time of a frame index.
    pub fn from_frames(frames: u64, sample_rate: u32) -> Self {
        RationalTime::new(Int::from(frames), Int::from(sample_rate))
    }
}

impl ops::Add for RationalTime {
    type Output = RationalTime;

    fn add(self, rhs: RationalTime) -> RationalTime {
        RationalTime(self.0 + rhs.0)
    }
}

impl ops::Sub for RationalTime {
    type Output = RationalTime;

    fn sub(self, rhs: RationalTime) -> RationalTime {
        RationalTime(self.0 - rhs.0)
    }
}

impl ops::AddAssign for RationalTime {
    fn add_assign(&mut self, rhs: RationalTime) {
        self.0 += rhs.0;
    }
}

impl ops::SubAssign for RationalTime {
    fn sub_assign(&mut self, rhs: RationalTime) {
        self.0 -= rhs.0;
    }
}

impl ops::Mul<Rational> for RationalTime {
    type Output = RationalTime;

    fn mul(self, rhs: Rational) -> RationalTime {
        RationalTime(self.0 * rhs)
    }
}

impl ops::Div<Int> for RationalTime {
    type Output = RationalTime;

    fn div(self, rhs: Int) -> RationalTime {
        RationalTime(self.0 / rhs)
    }
}

impl fmt::Display for RationalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// Musical position measured in quarter notes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Position(Rational);

impl Position {
    pub const ZERO: Position = Position(Rational::ZERO);

    /// # Panic
    ///
    /// A zero denominator is a violated precondition and panics.
    ///
    /// ```
    /// # use synseq_core::time::*;
    /// assert!(Position::new(1, 4) < Position::new(1, 2));
    /// assert_eq!(Position::new(2, 4), Position::new(1, 2));
    /// ```
    pub fn new(numerator: Int, denominator: Int) -> Self {
        Position(Rational::new(numerator, denominator))
    }

    pub fn try_new(numerator: Int, denominator: Int) -> Option<Self> {
        Rational::try_new(numerator, denominator).map(Position)
    }

    pub const fn quarters(quarters: Rational) -> Self {
        Position(quarters)
    }

    pub const fn as_rational(self) -> Rational {
        self.0
    }

    pub fn numerator(self) -> Int {
        self.0.numerator()
    }

    pub fn denominator(self) -> Int {
        self.0.denominator()
    }

    pub fn is_negative(self) -> bool {
        self.0.is_negative()
    }
}

impl ops::Add for Position {
    type Output = Position;

    fn add(self, rhs: Position) -> Position {
        Position(self.0 + rhs.0)
    }
}

impl ops::Sub for Position {
    type Output = Position;

    fn sub(self, rhs: Position) -> Position {
        Position(self.0 - rhs.0)
    }
}

impl ops::AddAssign for Position {
    fn add_assign(&mut self, rhs: Position) {
        self.0 += rhs.0;
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}q", self.0)
    }
}

/// The speed of the music, stored as the exact duration of one quarter note.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Tempo {
    seconds_per_quarter: Rational,
}

impl Tempo {
    /// # Panic
    ///
    /// Panics unless `bpm` is positive.
    ///
    /// ```
    /// # use synseq_core::{rational::Rational, time::*};
    /// assert_eq!(Tempo::from_bpm(Rational::int(120)).seconds_per_quarter(), Rational::new(1, 2));
    /// ```
    pub fn from_bpm(bpm: Rational) -> Self {
        assert!(bpm > Rational::zero(), "tempo must be positive");
        Tempo {
            seconds_per_quarter: Rational::int(60) / bpm,
        }
    }

    /// Tempo as stored in standard MIDI files.
    pub fn from_micros_per_quarter(micros: u32) -> Self {
        assert!(micros > 0, "tempo must be positive");
        Tempo {
            seconds_per_quarter: Rational::new(Int::from(micros), 1_000_000),
        }
    }

    pub fn seconds_per_quarter(self) -> Rational {
        self.seconds_per_quarter
    }

    pub fn bpm(self) -> Rational {
        Rational::int(60) / self.seconds_per_quarter
    }

    /// How long it takes to play `span` at this tempo.
    pub fn duration(self, span: Position) -> RationalTime {
        RationalTime(span.0 * self.seconds_per_quarter)
    }

    /// How far the music advances during `time` at this tempo.
    pub fn span(self, time: RationalTime) -> Position {
        Position(time.0 / self.seconds_per_quarter)
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Tempo {
            seconds_per_quarter: Rational::new(1, 2),
        }
    }
}

impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bpm().to_decimal_string() {
            Some(bpm) => write!(f, "{} bpm", bpm),
            None => write!(f, "{} bpm", self.bpm()),
        }
    }
}
