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

//! The timeline: every note and control event of a song in one canonically ordered list.

use std::cmp::Ordering;

use snafu::Snafu;

use crate::time::{Position, Tempo};

/// MIDI channel, 0 based.
pub type Channel = u8;

/// Controller numbers with special meaning for playback.
pub mod controller {
    pub const BANK_SELECT_MSB: u8 = 0;
    pub const DATA_ENTRY_MSB: u8 = 6;
    pub const VOLUME_MSB: u8 = 7;
    pub const BANK_SELECT_LSB: u8 = 32;
    pub const DATA_ENTRY_LSB: u8 = 38;
    pub const VOLUME_LSB: u8 = 39;
    pub const HOLD: u8 = 0x40;
    pub const ALL_SOUND_OFF: u8 = 120;
    pub const ALL_NOTES_OFF: u8 = 123;
}

/// Stable identity of an object on a timeline, also the last tie-break of the canonical order.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn from_raw(raw: u64) -> Self {
        ObjectId(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// What happens at a position of the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    Note {
        channel: Channel,
        pitch: u8,
        velocity: u8,
        /// Nominal length, before any sustain pedal extension.
        length: Position,
    },
    Tempo(Tempo),
    TimeSignature {
        numerator: u8,
        denominator: u8,
    },
    KeySignature {
        /// Negative values count flats.
        sharps: i8,
        minor: bool,
    },
    Controller {
        channel: Channel,
        controller: u8,
        value: u8,
    },
    Program {
        channel: Channel,
        program: u8,
    },
    PitchBend {
        channel: Channel,
        /// Signed offset from the center, in `-8192..=8191`.
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
    RawMeta {
        meta_type: u8,
        data: Vec<u8>,
    },
    /// Explicit end of the song.
    End,
}

impl ObjectKind {
    pub fn channel(&self) -> Option<Channel> {
        match *self {
            ObjectKind::Note { channel, .. }
            | ObjectKind::Controller { channel, .. }
            | ObjectKind::Program { channel, .. }
            | ObjectKind::PitchBend { channel, .. }
            | ObjectKind::ChannelPressure { channel, .. }
            | ObjectKind::KeyPressure { channel, .. } => Some(channel),
            _ => None,
        }
    }

    /// DATA ENTRY MSB/LSB must follow the (N)RPN selection sent at the same position.
    pub fn is_data_entry(&self) -> bool {
        matches!(
            self,
            ObjectKind::Controller {
                controller: controller::DATA_ENTRY_MSB,
                ..
            } | ObjectKind::Controller {
                controller: controller::DATA_ENTRY_LSB,
                ..
            }
        )
    }

    pub fn is_note(&self) -> bool {
        matches!(self, ObjectKind::Note { .. })
    }
}

/// A single object placed on the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqObject {
    pub id: ObjectId,
    pub position: Position,
    pub kind: ObjectKind,
}

impl SeqObject {
    /// Where the note ends without sustain pedal, `None` for anything but notes.
    pub fn nominal_stop(&self) -> Option<Position> {
        match self.kind {
            ObjectKind::Note { length, .. } => Some(self.position + length),
            _ => None,
        }
    }

    fn sort_key(&self) -> (Position, bool, ObjectId) {
        (self.position, self.kind.is_data_entry(), self.id)
    }
}

/// The canonical total order of timeline objects.
///
/// Objects are ordered by position. At equal positions, data entry controllers (6 and 38)
/// come after everything else, so that the controllers selecting the (N)RPN always precede
/// them. This is stricter than needed: they also follow notes and objects on other channels,
/// which keeps the order independent of channels. Remaining ties are broken by id, i.e. by
/// insertion order.
///
/// ```
/// # use synseq_core::{time::Position, timeline::*};
/// let mut timeline = Timeline::new();
/// let data = timeline.insert(Position::ZERO, ObjectKind::Controller { channel: 0, controller: 6, value: 12 });
/// let rpn = timeline.insert(Position::ZERO, ObjectKind::Controller { channel: 0, controller: 101, value: 0 });
/// let ids: Vec<_> = timeline.objects().iter().map(|o| o.id).collect();
/// assert_eq!(ids, vec![rpn, data]);
/// ```
pub fn canonical_cmp(a: &SeqObject, b: &SeqObject) -> Ordering {
    a.sort_key().cmp(&b.sort_key())
}

/// Problems found while assembling a timeline.
#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum TimelineError {
    #[snafu(display("Object id {:?} is used more than once", id))]
    DuplicateId { id: ObjectId },
    #[snafu(display("Object {:?} does not exist", id))]
    UnknownId { id: ObjectId },
    #[snafu(display("Object {:?} is placed before the start of the song at {}", id, position))]
    NegativePosition { id: ObjectId, position: Position },
    #[snafu(display("Note {:?} has negative length {}", id, length))]
    NegativeLength { id: ObjectId, length: Position },
}

/// All objects of a song, kept in canonical order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    objects: Vec<SeqObject>,
    next_id: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a timeline from objects in any order, assigning ids in iteration order.
    pub fn from_kinds<I>(objects: I) -> Result<Self, TimelineError>
    where
        I: IntoIterator<Item = (Position, ObjectKind)>,
    {
        let objects = objects
            .into_iter()
            .enumerate()
            .map(|(index, (position, kind))| SeqObject {
                id: ObjectId(index as u64),
                position,
                kind,
            })
            .collect();
        Self::from_objects(objects)
    }

    /// Build a timeline from objects that already carry their ids.
    ///
    /// This is the load-time validation point: anything that would break playback later is rejected here.
    pub fn from_objects(mut objects: Vec<SeqObject>) -> Result<Self, TimelineError> {
        objects.sort_by(canonical_cmp);

        let mut ids: Vec<ObjectId> = objects.iter().map(|o| o.id).collect();
        ids.sort();
        if let Some(pair) = ids.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(TimelineError::DuplicateId { id: pair[0] });
        }

        for object in objects.iter() {
            if object.position.is_negative() {
                return Err(TimelineError::NegativePosition {
                    id: object.id,
                    position: object.position,
                });
            }
            if let ObjectKind::Note { length, .. } = object.kind {
                if length.is_negative() {
                    return Err(TimelineError::NegativeLength {
                        id: object.id,
                        length,
                    });
                }
            }
        }

        let next_id = ids.last().map_or(0, |id| id.0 + 1);
        Ok(Timeline { objects, next_id })
    }

    /// Add an object with a fresh id at its canonical place.
    pub fn insert(&mut self, position: Position, kind: ObjectKind) -> ObjectId {
        let object = SeqObject {
            id: ObjectId(self.next_id),
            position,
            kind,
        };
        self.next_id += 1;
        let index = self
            .objects
            .partition_point(|other| canonical_cmp(other, &object) == Ordering::Less);
        let id = object.id;
        self.objects.insert(index, object);
        id
    }

    pub fn remove(&mut self, id: ObjectId) -> Result<SeqObject, TimelineError> {
        let index = self.index_of(id).ok_or(TimelineError::UnknownId { id })?;
        Ok(self.objects.remove(index))
    }

    pub fn objects(&self) -> &[SeqObject] {
        &self.objects
    }

    pub fn get(&self, index: usize) -> Option<&SeqObject> {
        self.objects.get(index)
    }

    pub fn index_of(&self, id: ObjectId) -> Option<usize> {
        self.objects.iter().position(|o| o.id == id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Index of the first object at or after `position`.
    pub fn first_index_at(&self, position: Position) -> usize {
        self.objects.partition_point(|o| o.position < position)
    }

    /// Where the song ends: at the end marker if there is one,
    /// otherwise after the last object or the nominal end of the last note.
    pub fn end_position(&self) -> Position {
        if let Some(end) = self
            .objects
            .iter()
            .find(|o| matches!(o.kind, ObjectKind::End))
        {
            return end.position;
        }
        self.objects
            .iter()
            .map(|o| o.nominal_stop().unwrap_or(o.position))
            .max()
            .unwrap_or(Position::ZERO)
    }
}
