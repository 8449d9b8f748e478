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

/// A sine oscillator sampled at a fixed sample rate.
///
/// The frequency can change at any time without a jump in phase.
#[derive(Debug)]
pub struct Oscillator {
    sample_rate: f64,
    frequency: f64,
    phase_offset: f64,
}

impl Oscillator {
    pub fn new(sample_rate: f64, frequency: f64) -> Self {
        Self {
            sample_rate,
            frequency,
            phase_offset: 0.0,
        }
    }

    pub fn set_frequency(&mut self, frequency: f64) {
        self.frequency = frequency;
    }

    pub fn next_sample(&mut self) -> f64 {
        let phase = self.phase_offset;
        // Increment phase
        self.phase_offset += self.frequency / self.sample_rate;
        while self.phase_offset > 1.0 {
            self.phase_offset -= 1.0;
        }
        (phase * 2.0 * std::f64::consts::PI).sin()
    }
}

/// Frequency of a MIDI note at concert pitch (A4 = 440 Hz), shifted by `bend` semitones.
///
/// ```
/// # use syn_seq::synth::oscillator::frequency;
/// assert_eq!(frequency(69, 0.0), 440.0);
/// assert_eq!(frequency(57, 0.0), 220.0);
/// assert_eq!(frequency(69, 12.0), 880.0);
/// ```
pub fn frequency(pitch: u8, bend: f64) -> f64 {
    let semitones = f64::from(pitch) - 69.0 + bend;
    440.0 * 2.0f64.powf(semitones / 12.0)
}
