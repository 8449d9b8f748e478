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

//! Loop region and fade-out progress.

use synseq_core::rational::Rational;
use synseq_core::time::{Position, RationalTime};

/// Repeat a part of the song.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LoopRegion {
    pub start: Position,
    /// Defaults to the end of the song.
    pub end: Option<Position>,
    /// How often playback jumps back to `start`. `None` loops forever.
    pub count: Option<u32>,
}

/// A loop in progress.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LoopStatus {
    pub start: Position,
    pub end: Position,
    pub count: Option<u32>,
    /// Number of jumps back performed so far.
    pub index: u32,
}

impl LoopStatus {
    pub fn exhausted(&self) -> bool {
        self.count.map_or(false, |count| self.index >= count)
    }
}

/// Fade the song out instead of ending it abruptly.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Fadeout {
    /// Number of volume steps.
    pub steps: u32,
    /// Delay from the start of the faded pass (or of playback, without finite loop)
    /// to the first step.
    pub start_offset: RationalTime,
    /// Time from the fade-out start to silence.
    pub duration: RationalTime,
}

/// A fade-out that has been armed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FadeoutStatus {
    pub step_count: u32,
    pub duration: RationalTime,
    /// Steps already applied.
    pub current_step: u32,
    pub start_time: RationalTime,
    pub next_step_time: RationalTime,
}

impl FadeoutStatus {
    /// Arm `fadeout` for a pass starting at `pass_start`.
    pub fn arm(fadeout: &Fadeout, pass_start: RationalTime) -> Self {
        let start_time = pass_start + fadeout.start_offset;
        Self {
            step_count: fadeout.steps,
            duration: fadeout.duration,
            current_step: 0,
            start_time,
            next_step_time: start_time + fadeout.duration / i128::from(fadeout.steps),
        }
    }

    /// Current gain as fraction `(numerator, denominator)`.
    pub fn gain(&self) -> (u32, u32) {
        (self.step_count - self.current_step, self.step_count)
    }

    /// Apply the next step. Returns true once the volume has reached zero.
    pub fn step(&mut self) -> bool {
        self.current_step += 1;
        self.next_step_time = self.start_time
            + self.duration
                * Rational::new(
                    i128::from(self.current_step + 1),
                    i128::from(self.step_count),
                );
        self.current_step >= self.step_count
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fadeout_steps_are_evenly_spaced() {
        let fadeout = Fadeout {
            steps: 4,
            start_offset: RationalTime::new(1, 1),
            duration: RationalTime::new(2, 1),
        };
        let mut status = FadeoutStatus::arm(&fadeout, RationalTime::new(3, 1));
        let mut times = vec![];
        loop {
            times.push(status.next_step_time);
            if status.step() {
                break;
            }
            assert_eq!(status.gain().1, 4);
        }
        assert_eq!(
            times,
            vec![
                RationalTime::new(9, 2),
                RationalTime::new(5, 1),
                RationalTime::new(11, 2),
                RationalTime::new(6, 1)
            ]
        );
        assert_eq!(status.gain(), (0, 4));
    }
}
