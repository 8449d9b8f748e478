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

//! Offline conversion between musical positions and elapsed time.
//!
//! The resolver walks the canonical sequence once, integrating every tempo change into a tempo map,
//! and records the sustain pedal state of every channel. With those two tables it answers
//! position/time queries and computes how long the song really lasts, including notes that are
//! held beyond their nominal end by the pedal.

use snafu::Snafu;

use synseq_core::time::{Position, RationalTime, Tempo};
use synseq_core::timeline::{controller, Channel, ObjectKind, Timeline};

/// A point of the song, known both as position and as time since the song start.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Anchor {
    pub position: Position,
    pub time: RationalTime,
}

/// How a queried point between two events is reported.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Snap {
    /// Report the exact point, even if it lies between two events.
    Exact,
    /// Move the point forward to the next event at or after it.
    NextEvent,
}

/// Result of resolving a time or position range.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Resolution {
    pub start: Anchor,
    pub end: Anchor,
    /// Time from the queried start to the first event at or after it.
    pub time_start_offset: RationalTime,
    /// Time spanned from `start` to `end`.
    pub duration: RationalTime,
}

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum ResolveError {
    #[snafu(display("Time range is inverted: {} > {}", from, to))]
    InvertedTimeRange { from: RationalTime, to: RationalTime },
    #[snafu(display("Position range is inverted: {} > {}", from, to))]
    InvertedPositionRange { from: Position, to: Position },
}

/// Piecewise linear mapping between positions and times.
#[derive(Debug, Clone)]
pub struct TempoMap {
    /// Tempo anchors, sorted by position (and therefore by time). The first one is at zero.
    anchors: Vec<TempoAnchor>,
}

#[derive(Debug, Copy, Clone)]
struct TempoAnchor {
    position: Position,
    time: RationalTime,
    tempo: Tempo,
}

impl TempoMap {
    pub fn build(timeline: &Timeline, initial_tempo: Tempo) -> Self {
        let mut anchors = vec![TempoAnchor {
            position: Position::ZERO,
            time: RationalTime::ZERO,
            tempo: initial_tempo,
        }];
        for object in timeline.objects() {
            if let ObjectKind::Tempo(tempo) = object.kind {
                let last = anchors[anchors.len() - 1];
                let anchor = TempoAnchor {
                    position: object.position,
                    time: last.time + last.tempo.duration(object.position - last.position),
                    tempo,
                };
                // a later change at the same position overrides the earlier one
                if last.position == object.position {
                    let index = anchors.len() - 1;
                    anchors[index] = anchor;
                } else {
                    anchors.push(anchor);
                }
            }
        }
        Self { anchors }
    }

    fn anchor_for_position(&self, position: Position) -> &TempoAnchor {
        let index = self
            .anchors
            .partition_point(|a| a.position <= position)
            .saturating_sub(1);
        &self.anchors[index]
    }

    fn anchor_for_time(&self, time: RationalTime) -> &TempoAnchor {
        let index = self
            .anchors
            .partition_point(|a| a.time <= time)
            .saturating_sub(1);
        &self.anchors[index]
    }

    pub fn time_at(&self, position: Position) -> RationalTime {
        let anchor = self.anchor_for_position(position);
        anchor.time + anchor.tempo.duration(position - anchor.position)
    }

    pub fn position_at(&self, time: RationalTime) -> Position {
        let anchor = self.anchor_for_time(time);
        anchor.position + anchor.tempo.span(time - anchor.time)
    }

    pub fn tempo_at(&self, position: Position) -> Tempo {
        self.anchor_for_position(position).tempo
    }
}

/// Sustain pedal intervals of every channel.
#[derive(Debug, Clone, Default)]
pub struct HoldMap {
    /// Per channel, the non-overlapping intervals in which the pedal is down.
    /// An interval without end lasts until the end of the song.
    intervals: Vec<(Channel, Vec<(Position, Option<Position>)>)>,
}

impl HoldMap {
    pub fn build(timeline: &Timeline) -> Self {
        let mut intervals: Vec<(Channel, Vec<(Position, Option<Position>)>)> = Vec::new();
        let mut pressed: Vec<(Channel, Position)> = Vec::new();

        for object in timeline.objects() {
            if let ObjectKind::Controller {
                channel,
                controller: controller::HOLD,
                value,
            } = object.kind
            {
                let down = value >= 64;
                let since = pressed.iter().position(|(c, _)| *c == channel);
                match (down, since) {
                    (true, None) => pressed.push((channel, object.position)),
                    (false, Some(index)) => {
                        let (_, on) = pressed.swap_remove(index);
                        Self::channel_intervals(&mut intervals, channel)
                            .push((on, Some(object.position)));
                    }
                    _ => {}
                }
            }
        }
        for (channel, on) in pressed {
            Self::channel_intervals(&mut intervals, channel).push((on, None));
        }
        Self { intervals }
    }

    fn channel_intervals(
        intervals: &mut Vec<(Channel, Vec<(Position, Option<Position>)>)>,
        channel: Channel,
    ) -> &mut Vec<(Position, Option<Position>)> {
        let index = match intervals.iter().position(|(c, _)| *c == channel) {
            Some(index) => index,
            None => {
                intervals.push((channel, Vec::new()));
                intervals.len() - 1
            }
        };
        &mut intervals[index].1
    }

    /// Where a note on `channel` whose nominal end is `stop` really ends.
    ///
    /// If the pedal is down at `stop`, the note lasts until the pedal is released,
    /// or until `song_end` if that never happens.
    pub fn extend(&self, channel: Channel, stop: Position, song_end: Position) -> Position {
        let intervals = match self.intervals.iter().find(|(c, _)| *c == channel) {
            Some((_, intervals)) => intervals,
            None => return stop,
        };
        // the last interval that started strictly before the nominal end
        let index = intervals.partition_point(|(on, _)| *on < stop);
        if index == 0 {
            return stop;
        }
        match intervals[index - 1].1 {
            Some(off) if off > stop => off,
            Some(_) => stop,
            None => stop.max(song_end),
        }
    }
}

/// Answers position and time queries about a timeline.
pub struct Resolver<'a> {
    timeline: &'a Timeline,
    tempo_map: TempoMap,
    holds: Option<HoldMap>,
    end: Position,
}

impl<'a> Resolver<'a> {
    pub fn new(timeline: &'a Timeline, initial_tempo: Tempo, disable_hold: bool) -> Self {
        Self {
            timeline,
            tempo_map: TempoMap::build(timeline, initial_tempo),
            holds: if disable_hold {
                None
            } else {
                Some(HoldMap::build(timeline))
            },
            end: timeline.end_position(),
        }
    }

    pub fn tempo_map(&self) -> &TempoMap {
        &self.tempo_map
    }

    pub fn time_at(&self, position: Position) -> RationalTime {
        self.tempo_map.time_at(position)
    }

    pub fn position_at(&self, time: RationalTime) -> Position {
        self.tempo_map.position_at(time)
    }

    fn anchor_at_position(&self, position: Position) -> Anchor {
        Anchor {
            position,
            time: self.time_at(position),
        }
    }

    fn anchor_at_time(&self, time: RationalTime) -> Anchor {
        Anchor {
            position: self.position_at(time),
            time,
        }
    }

    /// Effective end of the note at `index`, including the sustain pedal.
    pub fn note_stop(&self, index: usize) -> Option<Position> {
        let object = self.timeline.get(index)?;
        let stop = object.nominal_stop()?;
        let channel = object.kind.channel()?;
        Some(match &self.holds {
            Some(holds) => holds.extend(channel, stop, self.end),
            None => stop,
        })
    }

    /// How long the note at `index` sounds, including the sustain pedal.
    /// `None` if there is no note at that index.
    pub fn calculate_hold_time(&self, index: usize) -> Option<RationalTime> {
        let start = self.timeline.get(index)?.position;
        let stop = self.note_stop(index)?;
        Some(self.time_at(stop) - self.time_at(start))
    }

    /// The point where the last sound of the song ends.
    ///
    /// This is the later of the last object and the (hold extended) end of every note,
    /// which need not be the last note in canonical order.
    pub fn finish(&self) -> Anchor {
        let mut finish = self
            .timeline
            .objects()
            .last()
            .map_or(Position::ZERO, |o| o.position);
        for (index, object) in self.timeline.objects().iter().enumerate() {
            if object.kind.is_note() {
                if let Some(stop) = self.note_stop(index) {
                    finish = finish.max(stop);
                }
            }
        }
        self.anchor_at_position(finish)
    }

    pub fn total_duration(&self) -> RationalTime {
        self.finish().time
    }

    /// Resolve the time range `[from, to]`, or `[from, end of song]` if `to` is absent.
    ///
    /// Returns `Ok(None)` if no point of the song matches.
    pub fn resolve_time(
        &self,
        from: RationalTime,
        to: Option<RationalTime>,
        snap: Snap,
    ) -> Result<Option<Resolution>, ResolveError> {
        if let Some(to) = to {
            if from > to {
                return Err(ResolveError::InvertedTimeRange { from, to });
            }
        }
        let finish = self.finish();
        if self.timeline.is_empty() || from > finish.time {
            return Ok(None);
        }

        let first = self.first_event_at_time(from);
        let start = match (snap, first) {
            (Snap::Exact, _) => self.anchor_at_time(from),
            (Snap::NextEvent, Some(event)) => event,
            (Snap::NextEvent, None) => return Ok(None),
        };
        let end = match to {
            None => finish,
            Some(to) => match snap {
                Snap::NextEvent => self
                    .first_event_at_time(to)
                    .unwrap_or_else(|| self.anchor_at_time(to)),
                Snap::Exact => self.anchor_at_time(to),
            },
        };

        Ok(Some(Resolution {
            start,
            end,
            time_start_offset: first.map_or(RationalTime::ZERO, |event| event.time - from),
            duration: end.time - start.time,
        }))
    }

    /// Resolve the position range `[from, to]`, or `[from, end of song]` if `to` is absent.
    ///
    /// Returns `Ok(None)` if no point of the song matches.
    pub fn resolve_position(
        &self,
        from: Position,
        to: Option<Position>,
        snap: Snap,
    ) -> Result<Option<Resolution>, ResolveError> {
        if let Some(to) = to {
            if from > to {
                return Err(ResolveError::InvertedPositionRange { from, to });
            }
        }
        let finish = self.finish();
        if self.timeline.is_empty() || from > finish.position {
            return Ok(None);
        }

        let first = self.first_event_at_position(from);
        let exact_start = self.anchor_at_position(from);
        let start = match (snap, first) {
            (Snap::Exact, _) => exact_start,
            (Snap::NextEvent, Some(event)) => event,
            (Snap::NextEvent, None) => return Ok(None),
        };
        let end = match to {
            None => finish,
            Some(to) => match snap {
                Snap::NextEvent => self
                    .first_event_at_position(to)
                    .unwrap_or_else(|| self.anchor_at_position(to)),
                Snap::Exact => self.anchor_at_position(to),
            },
        };

        Ok(Some(Resolution {
            start,
            end,
            time_start_offset: first
                .map_or(RationalTime::ZERO, |event| event.time - exact_start.time),
            duration: end.time - start.time,
        }))
    }

    fn first_event_at_position(&self, position: Position) -> Option<Anchor> {
        let index = self.timeline.first_index_at(position);
        self.timeline
            .get(index)
            .map(|o| self.anchor_at_position(o.position))
    }

    fn first_event_at_time(&self, time: RationalTime) -> Option<Anchor> {
        let objects = self.timeline.objects();
        let index = objects.partition_point(|o| self.time_at(o.position) < time);
        objects.get(index).map(|o| self.anchor_at_position(o.position))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use synseq_core::rational::Rational;

    fn note(channel: Channel, pitch: u8, length: Position) -> ObjectKind {
        ObjectKind::Note {
            channel,
            pitch,
            velocity: 100,
            length,
        }
    }

    fn hold(channel: Channel, down: bool) -> ObjectKind {
        ObjectKind::Controller {
            channel,
            controller: controller::HOLD,
            value: if down { 127 } else { 0 },
        }
    }

    fn bpm(bpm: i128) -> ObjectKind {
        ObjectKind::Tempo(Tempo::from_bpm(Rational::int(bpm)))
    }

    fn q(num: i128, den: i128) -> Position {
        Position::new(num, den)
    }

    #[test]
    fn two_notes_at_120_bpm() {
        let timeline = Timeline::from_kinds(vec![
            (Position::ZERO, bpm(120)),
            (Position::ZERO, note(0, 60, q(1, 1))),
            (q(1, 1), note(0, 64, q(1, 1))),
        ])
        .unwrap();
        let resolver = Resolver::new(&timeline, Tempo::default(), false);
        // two quarters at half a second each
        assert_eq!(resolver.total_duration(), RationalTime::new(1, 1));
    }

    #[test]
    fn tempo_changes_are_integrated() {
        let timeline = Timeline::from_kinds(vec![
            (Position::ZERO, bpm(120)),
            (q(2, 1), bpm(60)),
            (q(2, 1), note(0, 60, q(1, 1))),
            (q(3, 1), bpm(180)),
            (q(3, 1), note(0, 62, q(3, 2))),
        ])
        .unwrap();
        let resolver = Resolver::new(&timeline, Tempo::default(), false);
        assert_eq!(resolver.time_at(q(2, 1)), RationalTime::new(1, 1));
        assert_eq!(resolver.time_at(q(3, 1)), RationalTime::new(2, 1));
        assert_eq!(resolver.total_duration(), RationalTime::new(5, 2));
        assert_eq!(resolver.position_at(RationalTime::new(5, 2)), q(9, 2));
        assert_eq!(resolver.position_at(RationalTime::new(3, 2)), q(5, 2));
    }

    #[test]
    fn hold_extends_note() {
        let timeline = Timeline::from_kinds(vec![
            (Position::ZERO, note(0, 60, q(1, 1))),
            (q(1, 2), hold(0, true)),
            (q(3, 1), hold(0, false)),
        ])
        .unwrap();
        let resolver = Resolver::new(&timeline, Tempo::default(), false);
        assert_eq!(
            resolver.calculate_hold_time(0),
            Some(resolver.time_at(q(3, 1)) - resolver.time_at(Position::ZERO))
        );
        assert_eq!(resolver.calculate_hold_time(0), Some(RationalTime::new(3, 2)));

        let unheld = Resolver::new(&timeline, Tempo::default(), true);
        assert_eq!(unheld.calculate_hold_time(0), Some(RationalTime::new(1, 2)));
        assert_eq!(resolver.calculate_hold_time(1), None);
    }

    #[test]
    fn hold_across_tempo_change() {
        let timeline = Timeline::from_kinds(vec![
            (Position::ZERO, note(2, 60, q(1, 1))),
            (q(1, 2), hold(2, true)),
            (q(2, 1), bpm(60)),
            (q(3, 1), hold(2, false)),
        ])
        .unwrap();
        let resolver = Resolver::new(&timeline, Tempo::default(), false);
        // 2 quarters at 120 bpm, 1 quarter at 60 bpm
        assert_eq!(resolver.calculate_hold_time(0), Some(RationalTime::new(2, 1)));
    }

    #[test]
    fn hold_on_other_channel_or_released_early_is_ignored() {
        let timeline = Timeline::from_kinds(vec![
            (Position::ZERO, note(0, 60, q(1, 1))),
            (Position::ZERO, note(1, 60, q(1, 1))),
            (q(1, 4), hold(1, true)),
            (q(1, 2), hold(0, true)),
            (q(3, 4), hold(0, false)),
            (q(2, 1), hold(1, false)),
        ])
        .unwrap();
        let resolver = Resolver::new(&timeline, Tempo::default(), false);
        assert_eq!(resolver.note_stop(0), Some(q(1, 1)));
        assert_eq!(resolver.note_stop(1), Some(q(2, 1)));
    }

    #[test]
    fn pedal_never_released_lasts_until_song_end() {
        let timeline = Timeline::from_kinds(vec![
            (Position::ZERO, hold(0, true)),
            (Position::ZERO, note(0, 60, q(1, 1))),
            (q(4, 1), ObjectKind::End),
        ])
        .unwrap();
        let resolver = Resolver::new(&timeline, Tempo::default(), false);
        assert_eq!(resolver.note_stop(1), Some(q(4, 1)));
        assert_eq!(resolver.total_duration(), RationalTime::new(2, 1));
    }

    fn sparse() -> Timeline {
        Timeline::from_kinds(vec![
            (Position::ZERO, note(0, 60, q(1, 1))),
            (q(2, 1), note(0, 62, q(1, 1))),
            (q(4, 1), note(0, 64, q(2, 1))),
        ])
        .unwrap()
    }

    #[test]
    fn resolve_time_snapping() {
        let timeline = sparse();
        let resolver = Resolver::new(&timeline, Tempo::default(), false);

        let exact = resolver
            .resolve_time(RationalTime::new(1, 2), None, Snap::Exact)
            .unwrap()
            .unwrap();
        assert_eq!(exact.start.position, q(1, 1));
        assert_eq!(exact.time_start_offset, RationalTime::new(1, 2));
        assert_eq!(exact.end.time, RationalTime::new(3, 1));
        assert_eq!(exact.duration, RationalTime::new(5, 2));

        let snapped = resolver
            .resolve_time(
                RationalTime::new(1, 2),
                Some(RationalTime::new(3, 2)),
                Snap::NextEvent,
            )
            .unwrap()
            .unwrap();
        assert_eq!(snapped.start.position, q(2, 1));
        assert_eq!(snapped.end.position, q(4, 1));
        assert_eq!(snapped.time_start_offset, RationalTime::new(1, 2));
        assert_eq!(snapped.duration, RationalTime::new(1, 1));
    }

    #[test]
    fn resolve_position_range() {
        let timeline = sparse();
        let resolver = Resolver::new(&timeline, Tempo::default(), false);
        let resolved = resolver
            .resolve_position(q(3, 1), Some(q(5, 1)), Snap::Exact)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.start.time, RationalTime::new(3, 2));
        assert_eq!(resolved.time_start_offset, RationalTime::new(1, 2));
        assert_eq!(resolved.duration, RationalTime::new(1, 1));
    }

    #[test]
    fn out_of_range_and_inverted_queries() {
        let timeline = sparse();
        let resolver = Resolver::new(&timeline, Tempo::default(), false);
        assert_eq!(
            resolver.resolve_time(RationalTime::new(10, 1), None, Snap::Exact),
            Ok(None)
        );
        // after the last note on, but while it still sounds
        assert_eq!(
            resolver.resolve_time(RationalTime::new(5, 2), None, Snap::NextEvent),
            Ok(None)
        );
        assert_eq!(
            resolver.resolve_time(RationalTime::new(2, 1), Some(RationalTime::new(1, 1)), Snap::Exact),
            Err(ResolveError::InvertedTimeRange {
                from: RationalTime::new(2, 1),
                to: RationalTime::new(1, 1)
            })
        );
        assert!(resolver
            .resolve_position(q(2, 1), Some(q(1, 1)), Snap::Exact)
            .is_err());

        let empty = Timeline::new();
        let resolver = Resolver::new(&empty, Tempo::default(), false);
        assert_eq!(
            resolver.resolve_position(Position::ZERO, None, Snap::Exact),
            Ok(None)
        );
        assert_eq!(resolver.total_duration(), RationalTime::ZERO);
    }
}
