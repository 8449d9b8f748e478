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

//! Bookkeeping of sounding notes, so that every note on gets exactly one note off.

use std::collections::BinaryHeap;

use synseq_core::time::Position;
use synseq_core::timeline::Channel;

/// A note that was started and still needs to be released.
#[derive(Debug, Copy, Clone)]
pub struct PlayingNote {
    pub channel: Channel,
    pub pitch: u8,
    /// Where the note is released, unless the sustain pedal holds it.
    pub stop: Position,
    /// Start order, breaks ties between notes stopping at the same position.
    serial: u64,
}

/// Playing notes are compared by their stop position.
impl PartialEq for PlayingNote {
    fn eq(&self, other: &Self) -> bool {
        self.stop == other.stop && self.serial == other.serial
    }
}

impl Eq for PlayingNote {}

impl PartialOrd for PlayingNote {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// The earlier the stop, the larger the playing note, so that the standard max heap yields
/// the next release first.
impl Ord for PlayingNote {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .stop
            .cmp(&self.stop)
            .then_with(|| other.serial.cmp(&self.serial))
    }
}

/// All notes that are currently sounding, ordered by their stop position.
#[derive(Debug, Default)]
pub struct PlayingNotes {
    heap: BinaryHeap<PlayingNote>,
    next_serial: u64,
}

impl PlayingNotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, channel: Channel, pitch: u8, stop: Position) {
        self.heap.push(PlayingNote {
            channel,
            pitch,
            stop,
            serial: self.next_serial,
        });
        self.next_serial += 1;
    }

    /// Put back a note that was held by the pedal, to be released at `stop`.
    pub fn restart(&mut self, note: PlayingNote, stop: Position) {
        self.heap.push(PlayingNote { stop, ..note });
    }

    /// Stop position of the next note to release.
    pub fn next_stop(&self) -> Option<Position> {
        self.heap.peek().map(|note| note.stop)
    }

    pub fn pop(&mut self) -> Option<PlayingNote> {
        self.heap.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn released_by_stop_then_start_order() {
        let mut notes = PlayingNotes::new();
        notes.start(0, 60, Position::new(2, 1));
        notes.start(0, 62, Position::new(1, 2));
        notes.start(1, 64, Position::new(2, 1));
        notes.start(0, 65, Position::new(1, 2));
        let order: Vec<u8> = std::iter::from_fn(|| notes.pop()).map(|n| n.pitch).collect();
        assert_eq!(order, vec![62, 65, 60, 64]);
        assert!(notes.is_empty());
    }
}
