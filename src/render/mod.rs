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

//! The glue between the scheduler and the synthesizer: timed events in, frame blocks out.

use std::collections::VecDeque;

use log::trace;

use synseq_core::rational::Int;
use synseq_core::time::RationalTime;

use crate::queue::FrameBlock;
use crate::sink::{EventSink, SinkError, SinkEvent};
use crate::synth::Synthesizer;

/// Feeds a synthesizer with scheduled events, generating audio block by block.
///
/// Session time is mapped to frames relative to an epoch, which moves whenever the sample
/// rate changes. Events scheduled for a frame that was already rendered take effect at the
/// start of the next block.
pub struct Renderer<S> {
    synth: S,
    sample_rate: u32,
    /// Session time of frame `epoch_frame`.
    epoch_time: RationalTime,
    epoch_frame: u64,
    /// Frames rendered so far.
    rendered: u64,
    /// Events that were not rendered yet, ordered by frame, then by arrival.
    pending: VecDeque<(u64, SinkEvent)>,
    /// Reject the next event sent by the scheduler.
    stop_requested: bool,
}

impl<S: Synthesizer> Renderer<S> {
    pub fn new(mut synth: S, sample_rate: u32) -> Self {
        synth.set_sample_rate(sample_rate);
        Self {
            synth,
            sample_rate,
            epoch_time: RationalTime::ZERO,
            epoch_frame: 0,
            rendered: 0,
            pending: VecDeque::new(),
            stop_requested: false,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn synth(&self) -> &S {
        &self.synth
    }

    pub fn synth_mut(&mut self) -> &mut S {
        &mut self.synth
    }

    /// Session time of the next frame to render.
    pub fn now(&self) -> RationalTime {
        self.time_of_frame(self.rendered)
    }

    pub fn rendered_frames(&self) -> u64 {
        self.rendered
    }

    /// Refuse the next event from the scheduler, which then winds playback down.
    ///
    /// Only one event is refused, the note offs and the finish marker that follow are rendered.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn cancel_stop(&mut self) {
        self.stop_requested = false;
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Schedule `event` at session time `at`, or at the render head if `None` or already past.
    pub fn enqueue(&mut self, event: SinkEvent, at: Option<RationalTime>) {
        let frame = match at {
            Some(at) => self.frame_of(at).max(self.rendered),
            None => self.rendered,
        };
        let index = self.pending.partition_point(|(f, _)| *f <= frame);
        self.pending.insert(index, (frame, event));
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn time_of_frame(&self, frame: u64) -> RationalTime {
        let offset = frame.saturating_sub(self.epoch_frame);
        self.epoch_time + RationalTime::from_frames(offset, self.sample_rate)
    }

    /// The frame `time` falls on, never before the epoch.
    pub fn frame_of(&self, time: RationalTime) -> u64 {
        let offset: Int = (time - self.epoch_time).frames(self.sample_rate);
        self.epoch_frame + offset.max(0) as u64
    }

    /// Forget all events that were not rendered yet.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Switch to a new sample rate, keeping the session time of the render head.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.epoch_time = self.now();
        self.epoch_frame = self.rendered;
        self.sample_rate = sample_rate;
        self.pending.clear();
        self.synth.set_sample_rate(sample_rate);
    }

    /// Render the next `frames` frames into `block`, splitting at event boundaries.
    ///
    /// Markers become block markers, everything else goes to the synthesizer.
    pub fn render_block(&mut self, block: &mut FrameBlock, frames: usize) {
        block.reset(frames);
        let start = self.rendered;
        let end = start + frames as u64;
        let mut offset = 0;
        while offset < frames {
            let now = start + offset as u64;
            while let Some((frame, _)) = self.pending.front() {
                if *frame > now {
                    break;
                }
                if let Some((_, event)) = self.pending.pop_front() {
                    match event {
                        SinkEvent::Marker(name) => block.push_marker(offset, name),
                        event => {
                            trace!("frame {}: {:?}", now, event);
                            self.synth.handle(&event);
                        }
                    }
                }
            }
            let next = match self.pending.front() {
                Some((frame, _)) => (*frame).min(end),
                None => end,
            };
            let until = (next - start) as usize;
            self.synth
                .render(&mut block.left[offset..until], &mut block.right[offset..until]);
            offset = until;
        }
        self.rendered = end;
    }
}

impl<S: Synthesizer> EventSink for Renderer<S> {
    fn send(&mut self, event: &SinkEvent, at: Option<RationalTime>) -> Result<(), SinkError> {
        if self.stop_requested {
            self.stop_requested = false;
            trace!("rejecting {:?}, stop requested", event);
            return Err(SinkError::StopRequested);
        }
        self.enqueue(event.clone(), at);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Writes the number of handled events into every sample.
    #[derive(Default)]
    struct CountingSynth {
        handled: Vec<SinkEvent>,
    }

    impl Synthesizer for CountingSynth {
        fn set_sample_rate(&mut self, _sample_rate: u32) {}
        fn handle(&mut self, event: &SinkEvent) {
            self.handled.push(event.clone());
        }
        fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
            for sample in left.iter_mut().chain(right.iter_mut()) {
                *sample += self.handled.len() as f32;
            }
        }
        fn active_voices(&self) -> usize {
            0
        }
        fn reset(&mut self) {
            self.handled.clear();
        }
    }

    fn off(pitch: u8) -> SinkEvent {
        SinkEvent::NoteOff { channel: 0, pitch }
    }

    #[test]
    fn events_take_effect_at_their_frame() {
        let mut renderer = Renderer::new(CountingSynth::default(), 10);
        renderer.send(&off(1), Some(RationalTime::new(3, 10))).unwrap();
        renderer.send(&off(2), Some(RationalTime::new(1, 10))).unwrap();
        renderer
            .send(&SinkEvent::Marker("m".into()), Some(RationalTime::new(1, 2)))
            .unwrap();
        let mut block = FrameBlock::default();
        renderer.render_block(&mut block, 4);
        assert_eq!(block.left, vec![0.0, 1.0, 1.0, 2.0]);
        assert!(block.markers.is_empty());
        assert_eq!(renderer.now(), RationalTime::new(2, 5));

        // late events are played right away
        renderer.send(&off(3), Some(RationalTime::ZERO)).unwrap();
        renderer.render_block(&mut block, 4);
        assert_eq!(block.left, vec![3.0; 4]);
        assert_eq!(block.markers.len(), 1);
        assert_eq!(block.markers[0].offset, 1);
        assert_eq!(renderer.synth().handled[2], off(3));
    }

    #[test]
    fn sample_rate_change_keeps_session_time() {
        let mut renderer = Renderer::new(CountingSynth::default(), 10);
        let mut block = FrameBlock::default();
        renderer.render_block(&mut block, 5);
        renderer.set_sample_rate(100);
        assert_eq!(renderer.now(), RationalTime::new(1, 2));
        assert_eq!(renderer.frame_of(RationalTime::new(6, 10)), 15);
    }

    #[test]
    fn stop_request_refuses_one_event() {
        let mut renderer = Renderer::new(CountingSynth::default(), 10);
        renderer.request_stop();
        renderer.enqueue(SinkEvent::Marker("user".into()), None);
        assert!(renderer.is_stop_requested());
        assert_eq!(renderer.send(&off(1), None), Err(SinkError::StopRequested));
        assert_eq!(renderer.send(&off(2), None), Ok(()));
        assert!(!renderer.is_stop_requested());

        let mut block = FrameBlock::default();
        renderer.render_block(&mut block, 1);
        assert_eq!(renderer.synth().handled, vec![off(2)]);
        assert_eq!(block.markers.len(), 1);
    }
}
