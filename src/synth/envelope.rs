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

/// An Attack-Release envelope.
/// When a key is pressed, the amplitude rises linearly from zero to one over `attack` seconds
/// and stays there as long as the key is pressed. When the key is released, it falls back
/// to zero over the next `release` seconds, starting from wherever it was.
///
/// # Example
///
/// ```
/// use syn_seq::synth::envelope::*;
/// let ar = AR { attack: 0.5, release: 1.0 };
/// let mut env = ar.instantiate(4.0);
/// let levels: Vec<f64> = (0..3).map(|_| env.step()).collect();
/// assert_eq!(levels, vec![0.0, 0.5, 1.0]);
/// env.release();
/// let levels: Vec<f64> = (0..5).map(|_| env.step()).collect();
/// assert_eq!(levels, vec![1.0, 0.75, 0.5, 0.25, 0.0]);
/// assert!(env.faded());
/// ```
#[derive(Debug, Clone)]
pub struct AR {
    /// Time in seconds to go from 0.0 to 1.0
    pub attack: f64,
    /// Time in seconds to go from 1.0 to 0.0.
    pub release: f64,
}

impl AR {
    /// Evaluate the envelope step by step at the given sample rate.
    pub fn instantiate(&self, sample_rate: f64) -> EvalAR {
        EvalAR {
            level: 0.0,
            attack_step: step_size(self.attack, sample_rate),
            release_step: step_size(self.release, sample_rate),
            released: false,
        }
    }
}

fn step_size(seconds: f64, sample_rate: f64) -> f64 {
    if seconds > 0.0 {
        1.0 / (seconds * sample_rate)
    } else {
        1.0
    }
}

#[derive(Debug, Clone)]
pub struct EvalAR {
    level: f64,
    attack_step: f64,
    release_step: f64,
    released: bool,
}

impl EvalAR {
    /// Current level, then advance by one sample.
    pub fn step(&mut self) -> f64 {
        let level = self.level;
        if self.released {
            self.level = (self.level - self.release_step).max(0.0);
        } else {
            self.level = (self.level + self.attack_step).min(1.0);
        }
        level
    }

    pub fn release(&mut self) {
        self.released = true;
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn faded(&self) -> bool {
        self.released && self.level <= 0.0
    }
}
