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

//! Where the scheduler delivers its events.

use std::sync::Arc;

use snafu::Snafu;

use synseq_core::time::RationalTime;
use synseq_core::timeline::Channel;

/// A channel message or marker, ready to be handed to a synthesizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    NoteOn {
        channel: Channel,
        pitch: u8,
        velocity: u8,
    },
    NoteOff {
        channel: Channel,
        pitch: u8,
    },
    ControlChange {
        channel: Channel,
        controller: u8,
        value: u8,
    },
    /// Program change, together with the bank selected on the channel at that moment.
    ProgramChange {
        channel: Channel,
        preset: u8,
        bank: u16,
    },
    PitchBend {
        channel: Channel,
        value: i16,
    },
    ChannelPressure {
        channel: Channel,
        value: u8,
    },
    KeyPressure {
        channel: Channel,
        pitch: u8,
        value: u8,
    },
    SysEx(Vec<u8>),
    /// A named position in the output stream, reported back once it is played.
    Marker(Arc<str>),
}

impl SinkEvent {
    pub fn channel(&self) -> Option<Channel> {
        match *self {
            SinkEvent::NoteOn { channel, .. }
            | SinkEvent::NoteOff { channel, .. }
            | SinkEvent::ControlChange { channel, .. }
            | SinkEvent::ProgramChange { channel, .. }
            | SinkEvent::PitchBend { channel, .. }
            | SinkEvent::ChannelPressure { channel, .. }
            | SinkEvent::KeyPressure { channel, .. } => Some(channel),
            SinkEvent::SysEx(_) | SinkEvent::Marker(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum SinkError {
    /// The consumer wants playback to end. The scheduler stops as soon as possible.
    #[snafu(display("The sink requested playback to stop"))]
    StopRequested,
}

/// Consumer of scheduled events.
pub trait EventSink {
    /// Deliver `event`, to take effect at `at` (session time), or immediately if `at` is `None`.
    fn send(&mut self, event: &SinkEvent, at: Option<RationalTime>) -> Result<(), SinkError>;
}

/// A sink that only records what it receives.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub events: Vec<(Option<RationalTime>, SinkEvent)>,
    /// Reject every event after this many were accepted.
    pub reject_after: Option<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting_after(accepted: usize) -> Self {
        Self {
            events: Vec::new(),
            reject_after: Some(accepted),
        }
    }

    /// One line per event, for comparing against snapshots.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (at, event) in self.events.iter() {
            let at = match at {
                Some(at) => at.to_string(),
                None => "now".to_string(),
            };
            out.push_str(&format!("{} {:?}\n", at, event));
        }
        out
    }
}

impl EventSink for RecordingSink {
    fn send(&mut self, event: &SinkEvent, at: Option<RationalTime>) -> Result<(), SinkError> {
        if let Some(limit) = self.reject_after {
            if self.events.len() >= limit {
                return Err(SinkError::StopRequested);
            }
        }
        self.events.push((at, event.clone()));
        Ok(())
    }
}
