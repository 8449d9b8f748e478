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

//! The real-time end of playback.
//!
//! [`OutputStage::process`] is meant to be called from an audio callback. It never blocks and
//! never allocates as long as the queue stays within its preallocated capacity: messages are
//! exchanged with `try_push`/`try_pop` only, and consumed blocks travel back to the renderer
//! instead of being freed here.
//!
//! Backpressure signals and markers must reach the control side even when the return channel is
//! full. They wait in a backlog that is flushed before anything else is sent, while status
//! reports are simply skipped until the backlog is empty.

pub mod sox;

use std::collections::VecDeque;

use ringbuf::traits::{Consumer, Producer};
use ringbuf::HeapProd;

use crate::message::{FromOutput, OutputEnd, ToOutput};
use crate::queue::{Backpressure, FrameQueue, QueueConfig, Watermarks};

pub struct OutputStage {
    queue: FrameQueue,
    channel: OutputEnd,
    config: QueueConfig,
    sample_rate: u32,
    paused: bool,
    released: bool,
    consumed_frames: u64,
    /// Messages that did not fit into the return channel, oldest first.
    backlog: VecDeque<FromOutput>,
}

const BACKLOG_CAPACITY: usize = 32;

/// Send `message`, or append it to `backlog` if the channel is full or older messages still wait.
fn deliver(
    to_control: &mut HeapProd<FromOutput>,
    backlog: &mut VecDeque<FromOutput>,
    message: FromOutput,
) {
    if backlog.is_empty() {
        if let Err(message) = to_control.try_push(message) {
            backlog.push_back(message);
        }
        return;
    }
    // only the latest backpressure state matters
    if let FromOutput::PauseQueue(paused) = message {
        if let Some(FromOutput::PauseQueue(last)) = backlog.back_mut() {
            *last = paused;
            return;
        }
    }
    backlog.push_back(message);
}

impl OutputStage {
    pub fn new(channel: OutputEnd, config: QueueConfig, sample_rate: u32, block_capacity: usize) -> Self {
        Self {
            queue: FrameQueue::new(Watermarks::new(&config, sample_rate), block_capacity),
            channel,
            config,
            sample_rate,
            paused: false,
            released: false,
            consumed_frames: 0,
            backlog: VecDeque::with_capacity(BACKLOG_CAPACITY),
        }
    }

    /// The control side released the output, nothing more will be played.
    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn consumed_frames(&self) -> u64 {
        self.consumed_frames
    }

    /// Fill `left` and `right` with the next frames, or silence where none are available.
    ///
    /// Returns the number of frames taken from the queue.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) -> usize {
        self.flush_backlog();
        self.handle_messages();

        let mut frames = 0;
        if !self.paused && !self.released {
            let to_control = &mut self.channel.to_control;
            let backlog = &mut self.backlog;
            let consumed = self.queue.consume(left, right, |name, frames_into_call| {
                let marker = FromOutput::Marker {
                    name: name.clone(),
                    frames_into_call,
                };
                deliver(to_control, backlog, marker);
            });
            frames = consumed.frames;
            self.signal(consumed.signal);
        }
        for sample in left[frames..].iter_mut().chain(right[frames..].iter_mut()) {
            *sample = 0.0;
        }
        self.consumed_frames += frames as u64;

        if !self.backlog.is_empty() {
            return frames;
        }
        self.recycle();
        let _ = self.channel.to_control.try_push(FromOutput::Status {
            consumed_frames: self.consumed_frames,
            sample_rate: self.sample_rate,
            queue_empty: self.queue.is_empty(),
            input_finished: self.queue.is_input_finished(),
        });
        frames
    }

    /// Messages still waiting to be sent to the control side.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    fn flush_backlog(&mut self) {
        while let Some(message) = self.backlog.pop_front() {
            if let Err(message) = self.channel.to_control.try_push(message) {
                self.backlog.push_front(message);
                break;
            }
        }
    }

    fn handle_messages(&mut self) {
        while let Some(message) = self.channel.from_control.try_pop() {
            match message {
                ToOutput::Render(block) => {
                    let signal = self.queue.push(block);
                    self.signal(signal);
                }
                ToOutput::EndOfStream => self.queue.finish_input(),
                ToOutput::Stop => {
                    let signal = self.queue.clear();
                    self.signal(signal);
                }
                ToOutput::Pause(paused) => self.paused = paused,
                ToOutput::Reconfigure { sample_rate } => {
                    self.sample_rate = sample_rate;
                    let signal = self
                        .queue
                        .set_watermarks(Watermarks::new(&self.config, sample_rate));
                    self.signal(signal);
                }
                ToOutput::Release => {
                    self.released = true;
                    self.queue.clear();
                }
            }
        }
    }

    fn signal(&mut self, signal: Option<Backpressure>) {
        let message = match signal {
            Some(Backpressure::Pause) => FromOutput::PauseQueue(true),
            Some(Backpressure::Resume) => FromOutput::PauseQueue(false),
            None => return,
        };
        deliver(&mut self.channel.to_control, &mut self.backlog, message);
    }

    fn recycle(&mut self) {
        while let Some(block) = self.queue.take_spent() {
            if let Err(FromOutput::Recycle(block)) =
                self.channel.to_control.try_push(FromOutput::Recycle(block))
            {
                // return channel full, try again after the next buffer
                self.queue.return_spent(block);
                break;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::{self, ControlEnd};
    use crate::queue::FrameBlock;
    use synseq_core::time::RationalTime;

    fn stage() -> (ControlEnd, OutputStage) {
        stage_with_channel(64)
    }

    fn stage_with_channel(capacity: usize) -> (ControlEnd, OutputStage) {
        let (control, output) = message::channel(capacity);
        let config = QueueConfig {
            prerender: RationalTime::new(4, 100),
            max_queue: RationalTime::new(8, 100),
        };
        // 4 frames prerender, 8 frames high watermark
        (control, OutputStage::new(output, config, 100, 16))
    }

    fn drain(control: &mut ControlEnd) -> Vec<String> {
        std::iter::from_fn(|| control.from_output.try_pop())
            .filter_map(|message| match message {
                FromOutput::Status { .. } => None,
                FromOutput::Recycle(block) => Some(format!("recycle {}", block.len())),
                FromOutput::PauseQueue(paused) => Some(format!("pause {}", paused)),
                FromOutput::Marker {
                    name,
                    frames_into_call,
                } => Some(format!("marker {} +{}", name, frames_into_call)),
            })
            .collect()
    }

    #[test]
    fn plays_queued_blocks_and_reports_back() {
        let (mut control, mut stage) = stage();
        let mut block = FrameBlock::silence(5);
        block.left[0] = 1.0;
        block.push_marker(2, "two".into());
        let _ = control.to_output.try_push(ToOutput::Render(block));
        let _ = control.to_output.try_push(ToOutput::Render(FrameBlock::silence(5)));

        let mut left = [0.5; 3];
        let mut right = [0.5; 3];
        assert_eq!(stage.process(&mut left, &mut right), 3);
        assert_eq!(left, [1.0, 0.0, 0.0]);
        assert_eq!(drain(&mut control), vec!["pause true", "marker two +2"]);

        let mut left = [0.5; 8];
        let mut right = [0.5; 8];
        assert_eq!(stage.process(&mut left, &mut right), 7);
        assert_eq!(right, [0.0; 8]);
        assert_eq!(
            drain(&mut control),
            vec!["pause false", "recycle 5", "recycle 5"]
        );
        assert_eq!(stage.consumed_frames(), 10);
    }

    #[test]
    fn paused_output_keeps_queue() {
        let (mut control, mut stage) = stage();
        let _ = control.to_output.try_push(ToOutput::Render(FrameBlock::silence(6)));
        let _ = control.to_output.try_push(ToOutput::Pause(true));
        let mut left = [0.0; 4];
        let mut right = [0.0; 4];
        assert_eq!(stage.process(&mut left, &mut right), 0);
        let _ = control.to_output.try_push(ToOutput::Pause(false));
        assert_eq!(stage.process(&mut left, &mut right), 4);

        let _ = control.to_output.try_push(ToOutput::Release);
        assert_eq!(stage.process(&mut left, &mut right), 0);
        assert!(stage.is_released());
    }

    #[test]
    fn resume_survives_a_full_return_channel() {
        let (mut control, mut stage) = stage_with_channel(2);
        let _ = control.to_output.try_push(ToOutput::Render(FrameBlock::silence(5)));
        let _ = control.to_output.try_push(ToOutput::Render(FrameBlock::silence(5)));

        // the pause signal and one status fill the return channel
        let mut one = [0.0; 1];
        let mut other = [0.0; 1];
        for _ in 0..3 {
            assert_eq!(stage.process(&mut one, &mut other), 1);
        }
        assert_eq!(stage.backlog_len(), 0);

        // draining below the low watermark while nobody reads the channel
        let mut left = [0.0; 6];
        let mut right = [0.0; 6];
        assert_eq!(stage.process(&mut left, &mut right), 6);
        assert_eq!(stage.backlog_len(), 1);
        assert_eq!(drain(&mut control), vec!["pause true"]);

        assert_eq!(stage.process(&mut one, &mut other), 1);
        assert_eq!(stage.backlog_len(), 0);
        assert_eq!(drain(&mut control), vec!["pause false", "recycle 5"]);
    }

    #[test]
    fn markers_wait_in_backlog() {
        let (mut control, mut stage) = stage_with_channel(2);
        let mut block = FrameBlock::silence(4);
        block.push_marker(1, "a".into());
        block.push_marker(3, "b".into());
        block.push_marker(4, "c".into());
        let _ = control.to_output.try_push(ToOutput::Render(block));

        let mut left = [0.0; 4];
        let mut right = [0.0; 4];
        assert_eq!(stage.process(&mut left, &mut right), 4);
        assert_eq!(stage.backlog_len(), 1);
        assert_eq!(drain(&mut control), vec!["marker a +1", "marker b +3"]);

        assert_eq!(stage.process(&mut left, &mut right), 0);
        assert_eq!(drain(&mut control), vec!["marker c +4", "recycle 4"]);
    }
}
