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

//! A synthesizer turns events into sound.

pub mod envelope;
pub mod oscillator;
pub mod tone;

use crate::sink::SinkEvent;

/// Sound generator driven by channel events.
///
/// Events take effect before the next rendered frame. Sample accurate timing is achieved by
/// the caller, who splits the rendering at event boundaries.
pub trait Synthesizer {
    fn set_sample_rate(&mut self, sample_rate: u32);
    fn handle(&mut self, event: &SinkEvent);
    /// Add the next `left.len()` frames to the buffers.
    fn render(&mut self, left: &mut [f32], right: &mut [f32]);
    /// Voices that are still audible, including those fading out after note off.
    fn active_voices(&self) -> usize;
    /// Silence everything immediately and forget all channel state.
    fn reset(&mut self);
}

impl<S: Synthesizer + ?Sized> Synthesizer for Box<S> {
    fn set_sample_rate(&mut self, sample_rate: u32) {
        (**self).set_sample_rate(sample_rate)
    }
    fn handle(&mut self, event: &SinkEvent) {
        (**self).handle(event)
    }
    fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        (**self).render(left, right)
    }
    fn active_voices(&self) -> usize {
        (**self).active_voices()
    }
    fn reset(&mut self) {
        (**self).reset()
    }
}
