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

//! Rendered audio waiting to be played, with watermark based backpressure.
//!
//! The renderer produces audio in bursts, the output consumes it at a fixed rate. The queue
//! sits in between on the output side: it holds back playback until enough audio was
//! prerendered, tells the producer to pause when it is full and to resume when it drained
//! sufficiently. Signals are edge triggered, so a producer sees one pause and one resume per
//! cycle, not one per block.

use std::collections::VecDeque;
use std::sync::Arc;

use synseq_core::rational::Rational;
use synseq_core::time::RationalTime;

/// A named point within a frame block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMarker {
    /// Frame offset within the block, at most the length of the block.
    pub offset: usize,
    pub name: Arc<str>,
}

/// Stereo audio plus markers, the unit of transfer between renderer and output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameBlock {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    /// Sorted by offset.
    pub markers: Vec<BlockMarker>,
}

impl FrameBlock {
    pub fn with_capacity(frames: usize) -> Self {
        Self {
            left: Vec::with_capacity(frames),
            right: Vec::with_capacity(frames),
            markers: Vec::new(),
        }
    }

    /// A silent block of `frames` frames.
    pub fn silence(frames: usize) -> Self {
        Self {
            left: vec![0.0; frames],
            right: vec![0.0; frames],
            markers: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Make this a silent block of `frames` frames, keeping the allocation.
    pub fn reset(&mut self, frames: usize) {
        self.left.clear();
        self.right.clear();
        self.left.resize(frames, 0.0);
        self.right.resize(frames, 0.0);
        self.markers.clear();
    }

    pub fn push_marker(&mut self, offset: usize, name: Arc<str>) {
        let offset = offset.min(self.len());
        let index = self.markers.partition_point(|m| m.offset <= offset);
        self.markers.insert(index, BlockMarker { offset, name });
    }
}

/// How much audio is buffered, in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Audio buffered before playback may start.
    pub prerender: RationalTime,
    /// Audio buffered before the producer has to pause.
    pub max_queue: RationalTime,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            prerender: RationalTime::new(1, 10),
            max_queue: RationalTime::new(1, 2),
        }
    }
}

/// Frame counts at which the queue changes behavior.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Watermarks {
    /// Playback starts once this many frames are queued.
    pub prerender: usize,
    /// The producer pauses once this many frames are queued.
    pub high: usize,
    /// A paused producer resumes once the queue drained to this many frames.
    pub low: usize,
}

fn ceil_frames(time: RationalTime, sample_rate: u32) -> usize {
    let frames = time.as_rational() * Rational::int(i128::from(sample_rate));
    let whole = frames.truncate();
    let ceil = if Rational::int(whole) < frames {
        whole + 1
    } else {
        whole
    };
    ceil.max(0) as usize
}

impl Watermarks {
    /// ```
    /// # use syn_seq::queue::*;
    /// let marks = Watermarks::new(&QueueConfig::default(), 44100);
    /// assert_eq!(marks, Watermarks { prerender: 4410, high: 22050, low: 13230 });
    /// ```
    pub fn new(config: &QueueConfig, sample_rate: u32) -> Self {
        let prerender = ceil_frames(config.prerender, sample_rate);
        let high = ceil_frames(config.max_queue, sample_rate).max(prerender + 1);
        Self {
            prerender,
            high,
            low: (prerender + high) / 2,
        }
    }
}

/// Instruction for the producer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Backpressure {
    /// The queue reached the high watermark.
    Pause,
    /// The queue drained to the low watermark.
    Resume,
}

/// Outcome of [`FrameQueue::consume`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Consumed {
    /// Frames written to the output, the rest of the output must be filled with silence.
    pub frames: usize,
    pub signal: Option<Backpressure>,
}

/// FIFO of frame blocks, owned by the output side.
#[derive(Debug)]
pub struct FrameQueue {
    blocks: VecDeque<FrameBlock>,
    /// Frames of the front block that were already consumed.
    head: usize,
    /// Frames queued and not yet consumed.
    queued: usize,
    watermarks: Watermarks,
    /// The prerender threshold was reached (or the input ended).
    started: bool,
    input_finished: bool,
    /// The producer was told to pause and not yet to resume.
    paused: bool,
    /// Consumed blocks, to be handed back to the producer for reuse.
    spent: VecDeque<FrameBlock>,
}

impl FrameQueue {
    /// Create a queue with room for `block_capacity` blocks before any allocation happens.
    pub fn new(watermarks: Watermarks, block_capacity: usize) -> Self {
        Self {
            blocks: VecDeque::with_capacity(block_capacity),
            head: 0,
            queued: 0,
            watermarks,
            started: false,
            input_finished: false,
            paused: false,
            spent: VecDeque::with_capacity(block_capacity),
        }
    }

    pub fn queued_frames(&self) -> usize {
        self.queued
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn watermarks(&self) -> Watermarks {
        self.watermarks
    }

    /// Append a block.
    pub fn push(&mut self, block: FrameBlock) -> Option<Backpressure> {
        self.queued += block.len();
        self.blocks.push_back(block);
        if !self.started && self.queued >= self.watermarks.prerender {
            self.started = true;
        }
        if !self.paused && self.queued >= self.watermarks.high {
            self.paused = true;
            return Some(Backpressure::Pause);
        }
        None
    }

    /// No more blocks will follow, play what is there even below the prerender threshold.
    pub fn finish_input(&mut self) {
        self.input_finished = true;
        self.started = true;
    }

    pub fn is_input_finished(&self) -> bool {
        self.input_finished
    }

    /// Copy as many frames as fit into `left` and `right`.
    ///
    /// `on_marker` is called for every marker passed, in order, with the number of frames
    /// written by this call before the marker.
    pub fn consume<F>(&mut self, left: &mut [f32], right: &mut [f32], mut on_marker: F) -> Consumed
    where
        F: FnMut(&Arc<str>, usize),
    {
        if !self.started {
            return Consumed {
                frames: 0,
                signal: None,
            };
        }
        let wanted = left.len().min(right.len());
        let mut written = 0;
        while written < wanted || self.front_is_spent() {
            let block = match self.blocks.front() {
                Some(block) => block,
                None => break,
            };
            let count = (block.len() - self.head).min(wanted - written);
            let end = self.head + count;
            let exhausted = end == block.len();
            for marker in block.markers.iter() {
                if marker.offset >= self.head && (marker.offset < end || exhausted) {
                    on_marker(&marker.name, written + (marker.offset - self.head));
                }
            }
            left[written..written + count].copy_from_slice(&block.left[self.head..end]);
            right[written..written + count].copy_from_slice(&block.right[self.head..end]);
            written += count;

            if exhausted {
                if let Some(spent) = self.blocks.pop_front() {
                    self.spent.push_back(spent);
                }
                self.head = 0;
            } else {
                self.head = end;
            }
        }
        self.queued -= written;

        let signal = if self.paused && self.queued <= self.watermarks.low {
            self.paused = false;
            Some(Backpressure::Resume)
        } else {
            None
        };
        Consumed {
            frames: written,
            signal,
        }
    }

    /// The front block has nothing left to play, only markers at its end.
    fn front_is_spent(&self) -> bool {
        self.blocks
            .front()
            .map_or(false, |block| self.head == block.len())
    }

    /// Next consumed block that can be reused by the producer.
    pub fn take_spent(&mut self) -> Option<FrameBlock> {
        self.spent.pop_front()
    }

    /// Put back a block from [`FrameQueue::take_spent`] that could not be handed over.
    pub fn return_spent(&mut self, block: FrameBlock) {
        self.spent.push_front(block);
    }

    /// Drop all queued audio and go back to waiting for the prerender threshold.
    pub fn clear(&mut self) -> Option<Backpressure> {
        while let Some(block) = self.blocks.pop_front() {
            self.spent.push_back(block);
        }
        self.head = 0;
        self.queued = 0;
        self.started = false;
        self.input_finished = false;
        if self.paused {
            self.paused = false;
            Some(Backpressure::Resume)
        } else {
            None
        }
    }

    /// Apply watermarks for a new sample rate.
    pub fn set_watermarks(&mut self, watermarks: Watermarks) -> Option<Backpressure> {
        self.watermarks = watermarks;
        if !self.started && self.queued >= watermarks.prerender {
            self.started = true;
        }
        if self.paused && self.queued <= watermarks.low {
            self.paused = false;
            Some(Backpressure::Resume)
        } else if !self.paused && self.queued >= watermarks.high {
            self.paused = true;
            Some(Backpressure::Pause)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn marks() -> Watermarks {
        Watermarks {
            prerender: 4,
            high: 10,
            low: 6,
        }
    }

    fn block(frames: usize, first: f32) -> FrameBlock {
        FrameBlock {
            left: (0..frames).map(|i| first + i as f32).collect(),
            right: (0..frames).map(|i| -(first + i as f32)).collect(),
            markers: Vec::new(),
        }
    }

    fn consume(queue: &mut FrameQueue, frames: usize) -> (Consumed, Vec<f32>, Vec<(String, usize)>) {
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        let mut markers = Vec::new();
        let consumed = queue.consume(&mut left, &mut right, |name, offset| {
            markers.push((name.to_string(), offset))
        });
        (consumed, left, markers)
    }

    #[test]
    fn waits_for_prerender() {
        let mut queue = FrameQueue::new(marks(), 8);
        queue.push(block(2, 0.0));
        assert_eq!(consume(&mut queue, 2).0.frames, 0);
        queue.push(block(2, 2.0));
        let (consumed, left, _) = consume(&mut queue, 3);
        assert_eq!(consumed.frames, 3);
        assert_eq!(left, vec![0.0, 1.0, 2.0]);
        assert_eq!(queue.queued_frames(), 1);
        assert_eq!(queue.take_spent().map(|b| b.len()), Some(2));
    }

    #[test]
    fn end_of_input_opens_the_gate() {
        let mut queue = FrameQueue::new(marks(), 8);
        queue.push(block(1, 5.0));
        queue.finish_input();
        let (consumed, left, _) = consume(&mut queue, 4);
        // underrun: the rest stays silent
        assert_eq!(consumed.frames, 1);
        assert_eq!(left, vec![5.0, 0.0, 0.0, 0.0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn one_signal_per_crossing() {
        let mut queue = FrameQueue::new(marks(), 16);
        let mut signals = Vec::new();
        for i in 0..8 {
            signals.extend(queue.push(block(2, i as f32)));
        }
        assert_eq!(signals, vec![Backpressure::Pause]);
        for _ in 0..8 {
            signals.extend(consume(&mut queue, 2).0.signal);
        }
        assert_eq!(signals, vec![Backpressure::Pause, Backpressure::Resume]);
        assert_eq!(queue.queued_frames(), 0);
    }

    #[test]
    fn markers_report_offset_within_call() {
        let mut queue = FrameQueue::new(marks(), 8);
        let mut first = block(4, 0.0);
        first.push_marker(1, "a".into());
        first.push_marker(4, "end of first".into());
        let mut second = block(4, 4.0);
        second.push_marker(0, "b".into());
        second.push_marker(3, "c".into());
        queue.push(first);
        queue.push(second);

        let (_, _, markers) = consume(&mut queue, 3);
        assert_eq!(markers, vec![("a".to_string(), 1)]);
        let (_, left, markers) = consume(&mut queue, 3);
        assert_eq!(left, vec![3.0, 4.0, 5.0]);
        assert_eq!(
            markers,
            vec![("end of first".to_string(), 1), ("b".to_string(), 1)]
        );
        let (consumed, _, markers) = consume(&mut queue, 3);
        assert_eq!(consumed.frames, 2);
        assert_eq!(markers, vec![("c".to_string(), 1)]);
    }

    #[test]
    fn marker_on_empty_block() {
        let mut queue = FrameQueue::new(marks(), 8);
        queue.push(block(4, 0.0));
        let mut last = FrameBlock::default();
        last.push_marker(0, "finish".into());
        queue.push(last);
        let (consumed, _, markers) = consume(&mut queue, 4);
        assert_eq!(consumed.frames, 4);
        assert_eq!(markers, vec![("finish".to_string(), 4)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_resumes_paused_producer() {
        let mut queue = FrameQueue::new(marks(), 8);
        assert_eq!(queue.push(block(12, 0.0)), Some(Backpressure::Pause));
        assert_eq!(queue.clear(), Some(Backpressure::Resume));
        assert!(!queue.is_started());
        assert_eq!(queue.take_spent().map(|b| b.len()), Some(12));
    }

    #[test]
    fn watermarks_follow_sample_rate() {
        let config = QueueConfig::default();
        let low_rate = Watermarks::new(&config, 8000);
        assert_eq!(low_rate.prerender, 800);
        assert_eq!(low_rate.high, 4000);

        let mut queue = FrameQueue::new(Watermarks::new(&config, 48000), 8);
        queue.push(FrameBlock::silence(5000));
        assert!(queue.is_started());
        assert_eq!(queue.set_watermarks(low_rate), Some(Backpressure::Pause));
        let degenerate = Watermarks::new(
            &QueueConfig {
                prerender: RationalTime::new(1, 10),
                max_queue: RationalTime::ZERO,
            },
            100,
        );
        assert_eq!(degenerate.high, 11);
    }
}
