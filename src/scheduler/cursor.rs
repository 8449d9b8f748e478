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

//! Tracks where playback is, both musically and in session time.

use synseq_core::time::{Position, RationalTime, Tempo};

/// Playback cursor anchored at the last tempo change (or jump).
///
/// Times of later positions are computed from the anchor, so that rounding never accumulates.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Cursor {
    base_position: Position,
    base_time: RationalTime,
    tempo: Tempo,
    /// Position of the last dispatched action.
    position: Position,
    /// Session time of the last dispatched action.
    time: RationalTime,
}

impl Cursor {
    pub fn new(position: Position, time: RationalTime, tempo: Tempo) -> Self {
        Self {
            base_position: position,
            base_time: time,
            tempo,
            position,
            time,
        }
    }

    /// Session time of `position`, assuming no tempo change before it.
    pub fn time_at(&self, position: Position) -> RationalTime {
        self.base_time + self.tempo.duration(position - self.base_position)
    }

    /// Move to `position` without changing the anchor.
    pub fn advance(&mut self, position: Position) {
        if position > self.position {
            self.position = position;
            self.time = self.time_at(position);
        }
    }

    /// A tempo change at `position`: all later times are measured from here.
    pub fn change_tempo(&mut self, position: Position, tempo: Tempo) {
        self.advance(position);
        self.base_position = self.position;
        self.base_time = self.time;
        self.tempo = tempo;
    }

    /// Replace the tempo without moving the anchor.
    ///
    /// Used while silently replaying the part before the anchor, where only the
    /// final tempo matters.
    pub fn set_tempo(&mut self, tempo: Tempo) {
        self.tempo = tempo;
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn time(&self) -> RationalTime {
        self.time
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use synseq_core::rational::Rational;

    #[test]
    fn tempo_changes_reanchor() {
        let mut cursor = Cursor::new(Position::ZERO, RationalTime::new(10, 1), Tempo::default());
        assert_eq!(cursor.time_at(Position::new(2, 1)), RationalTime::new(11, 1));
        cursor.change_tempo(Position::new(2, 1), Tempo::from_bpm(Rational::int(60)));
        assert_eq!(cursor.time(), RationalTime::new(11, 1));
        assert_eq!(cursor.time_at(Position::new(5, 2)), RationalTime::new(23, 2));
        // going backwards never moves the cursor
        cursor.advance(Position::new(1, 1));
        assert_eq!(cursor.position(), Position::new(2, 1));
    }
}
