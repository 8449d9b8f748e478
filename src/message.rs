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

//! Messages between the control side (scheduler and renderer) and the real-time output.
//!
//! Both directions are bounded single producer single consumer ring buffers. Neither side ever
//! blocks on them: a full buffer is reported to the caller, who decides what to drop.

use std::sync::Arc;

use ringbuf::traits::Split;
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::queue::FrameBlock;

/// From the control side to the output.
#[derive(Debug)]
pub enum ToOutput {
    /// Rendered audio to append to the queue.
    Render(FrameBlock),
    /// The last block was sent, play the queue even if it is below the prerender threshold.
    EndOfStream,
    /// Drop everything queued.
    Stop,
    /// Output silence without consuming the queue while paused.
    Pause(bool),
    /// The sample rate changed, derive new watermarks.
    Reconfigure { sample_rate: u32 },
    /// The control side is going away, the output should shut down.
    Release,
}

/// From the output back to the control side.
#[derive(Debug)]
pub enum FromOutput {
    /// Sent after every processed output buffer.
    Status {
        consumed_frames: u64,
        sample_rate: u32,
        queue_empty: bool,
        /// The end of stream was received since the queue was last cleared.
        input_finished: bool,
    },
    /// The producer should pause (`true`) or resume (`false`) rendering.
    PauseQueue(bool),
    /// A marker was played, `frames_into_call` frames into the current output buffer.
    Marker {
        name: Arc<str>,
        frames_into_call: usize,
    },
    /// A consumed block, returned for reuse.
    Recycle(FrameBlock),
}

/// The control side's ends of the message channel.
pub struct ControlEnd {
    pub to_output: HeapProd<ToOutput>,
    pub from_output: HeapCons<FromOutput>,
}

/// The output's ends of the message channel.
pub struct OutputEnd {
    pub from_control: HeapCons<ToOutput>,
    pub to_control: HeapProd<FromOutput>,
}

/// Create both directions, each holding up to `capacity` messages.
pub fn channel(capacity: usize) -> (ControlEnd, OutputEnd) {
    let (to_output, from_control) = HeapRb::<ToOutput>::new(capacity).split();
    let (to_control, from_output) = HeapRb::<FromOutput>::new(capacity).split();
    (
        ControlEnd {
            to_output,
            from_output,
        },
        OutputEnd {
            from_control,
            to_control,
        },
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use ringbuf::traits::{Consumer, Producer};

    #[test]
    fn bounded_in_both_directions() {
        let (mut control, mut output) = channel(2);
        assert!(control.to_output.try_push(ToOutput::Pause(true)).is_ok());
        assert!(control.to_output.try_push(ToOutput::EndOfStream).is_ok());
        assert!(control.to_output.try_push(ToOutput::Stop).is_err());
        assert!(matches!(
            output.from_control.try_pop(),
            Some(ToOutput::Pause(true))
        ));

        assert!(output
            .to_control
            .try_push(FromOutput::PauseQueue(false))
            .is_ok());
        assert!(matches!(
            control.from_output.try_pop(),
            Some(FromOutput::PauseQueue(false))
        ));
        assert!(control.from_output.try_pop().is_none());
    }
}
