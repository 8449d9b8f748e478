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

//! Turns a timeline into timed events for an [`EventSink`], a little ahead of real time.
//!
//! The scheduler is driven by an external clock: every call to [`Scheduler::tick`] dispatches
//! the events that fall within the lookahead window, at most a fixed number per call.
//! Besides plain dispatch it takes care of
//!
//! - releasing every started note exactly once, honoring the sustain pedal,
//! - jumping back at the end of a loop region, restoring the controller state of the loop start,
//! - fading the volume out in steps and stopping once it reached zero.

mod channel;
mod cursor;
mod looping;
mod playing;

pub use self::cursor::Cursor;
pub use self::looping::{Fadeout, FadeoutStatus, LoopRegion, LoopStatus};

use std::sync::Arc;

use log::{debug, trace, warn};
use snafu::Snafu;

use synseq_core::rational::Rational;
use synseq_core::time::{Position, RationalTime, Tempo};
use synseq_core::timeline::{controller, ObjectKind, SeqObject, Timeline};

use self::channel::Channels;
use self::playing::PlayingNotes;
use crate::sink::{EventSink, SinkEvent};

/// Name of the marker dispatched after the last sound of the song.
pub const FINISH_MARKER: &str = "finish";

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound of events dispatched by a single tick.
    pub events_per_tick: usize,
    /// How far ahead of the current time events are dispatched.
    pub lookahead: RationalTime,
    /// Tempo until the first tempo change.
    pub initial_tempo: Tempo,
    /// Ignore the sustain pedal when deciding where notes stop.
    pub disable_hold: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            events_per_tick: 50,
            lookahead: RationalTime::new(1, 5),
            initial_tempo: Tempo::from_bpm(Rational::int(120)),
            disable_hold: false,
        }
    }
}

/// Where and how to play.
#[derive(Debug, Clone, Default)]
pub struct PlayOptions {
    /// Start position, defaults to the beginning of the song.
    pub from: Option<Position>,
    pub looping: Option<LoopRegion>,
    /// Fade-out, applied to the extra pass after a finite loop, otherwise from the start.
    pub fadeout: Option<Fadeout>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PlayState {
    Idle,
    /// Restoring the controller state before the start position.
    Preparing,
    Running,
    /// Releasing notes and restoring the controller state of the loop start.
    LoopBoundary,
    /// Everything was dispatched, waiting for the output to play it.
    Draining,
    Stopped,
}

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum ScheduleError {
    #[snafu(display("Cannot start playback while {:?}", state))]
    AlreadyPlaying { state: PlayState },
    #[snafu(display("Cannot start playback before the song at {}", from))]
    NegativeStart { from: Position },
    #[snafu(display("Loop region from {} to {} is empty", start, end))]
    EmptyLoop { start: Position, end: Position },
    #[snafu(display("Playback starts at {}, after the loop end at {}", from, end))]
    StartAfterLoop { from: Position, end: Position },
    #[snafu(display("A fade-out needs at least one step and a positive duration"))]
    InvalidFadeout,
}

/// What a single tick did.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub dispatched: usize,
    /// The tick ended because it reached the event limit, there may be more work due.
    pub cap_reached: bool,
}

/// Result of a single unit of work.
enum Step {
    /// Something was sent to the sink.
    Sent,
    /// Internal bookkeeping only.
    Silent,
    /// The next thing to do lies beyond the lookahead window.
    NotDue,
    /// Nothing to do in the current state.
    Idle,
}

/// The next thing to happen while running.
enum Action<'a> {
    Release(Position),
    Event(&'a SeqObject),
    Boundary(Position),
    Finish(Position),
}

impl<'a> Action<'a> {
    fn position(&self) -> Position {
        match self {
            Action::Release(position) | Action::Boundary(position) | Action::Finish(position) => {
                *position
            }
            Action::Event(object) => object.position,
        }
    }
}

/// Progress of restoring controller state up to a target position.
#[derive(Debug, Copy, Clone)]
struct Replay {
    target: Position,
    /// Next timeline index to replay.
    index: usize,
    /// Time at which the replayed events are dispatched.
    at: RationalTime,
}

/// The event a non-note timeline object turns into, if any.
pub fn sink_event(kind: &ObjectKind) -> Option<SinkEvent> {
    match *kind {
        ObjectKind::Controller {
            channel,
            controller,
            value,
        } => Some(SinkEvent::ControlChange {
            channel,
            controller,
            value,
        }),
        ObjectKind::Program { channel, program } => Some(SinkEvent::ProgramChange {
            channel,
            preset: program,
            bank: 0,
        }),
        ObjectKind::PitchBend { channel, value } => Some(SinkEvent::PitchBend { channel, value }),
        ObjectKind::ChannelPressure { channel, value } => {
            Some(SinkEvent::ChannelPressure { channel, value })
        }
        ObjectKind::KeyPressure {
            channel,
            pitch,
            value,
        } => Some(SinkEvent::KeyPressure {
            channel,
            pitch,
            value,
        }),
        ObjectKind::SysEx(ref data) => Some(SinkEvent::SysEx(data.clone())),
        ObjectKind::Note { .. }
        | ObjectKind::Tempo(_)
        | ObjectKind::TimeSignature { .. }
        | ObjectKind::KeySignature { .. }
        | ObjectKind::RawMeta { .. }
        | ObjectKind::End => None,
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    state: PlayState,
    timeline: Arc<Timeline>,
    end_position: Position,
    cursor: Cursor,
    /// Next timeline index to dispatch.
    index: usize,
    playing: PlayingNotes,
    channels: Channels,
    looping: Option<LoopStatus>,
    /// Jumps back to the loop start since playback started.
    loop_jumps: u32,
    fadeout_request: Option<Fadeout>,
    fadeout: Option<FadeoutStatus>,
    replay: Replay,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let cursor = Cursor::new(Position::ZERO, RationalTime::ZERO, config.initial_tempo);
        Self {
            config,
            state: PlayState::Idle,
            timeline: Arc::new(Timeline::new()),
            end_position: Position::ZERO,
            cursor,
            index: 0,
            playing: PlayingNotes::new(),
            channels: Channels::new(),
            looping: None,
            loop_jumps: 0,
            fadeout_request: None,
            fadeout: None,
            replay: Replay {
                target: Position::ZERO,
                index: 0,
                at: RationalTime::ZERO,
            },
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn loop_status(&self) -> Option<LoopStatus> {
        self.looping
    }

    /// Loop boundary crossings of the current playback, including those after the loop ended.
    pub fn loop_jumps(&self) -> u32 {
        self.loop_jumps
    }

    pub fn fadeout_status(&self) -> Option<FadeoutStatus> {
        self.fadeout
    }

    /// Number of notes that were started and not yet released.
    pub fn sounding_notes(&self) -> usize {
        self.playing.len()
            + self
                .channels
                .iter()
                .map(|(_, state)| state.sustained.len())
                .sum::<usize>()
    }

    /// Begin playing `timeline`, with its start position sounding at session time `now`.
    pub fn start(
        &mut self,
        timeline: Arc<Timeline>,
        now: RationalTime,
        options: PlayOptions,
    ) -> Result<(), ScheduleError> {
        match self.state {
            PlayState::Idle | PlayState::Stopped => {}
            state => return Err(ScheduleError::AlreadyPlaying { state }),
        }
        let from = options.from.unwrap_or(Position::ZERO);
        if from.is_negative() {
            return Err(ScheduleError::NegativeStart { from });
        }
        let end_position = timeline.end_position();

        let looping = match options.looping {
            Some(region) => {
                let end = region.end.unwrap_or(end_position);
                if region.start.is_negative() || end <= region.start {
                    return Err(ScheduleError::EmptyLoop {
                        start: region.start,
                        end,
                    });
                }
                if from >= end {
                    return Err(ScheduleError::StartAfterLoop { from, end });
                }
                Some(LoopStatus {
                    start: region.start,
                    end,
                    count: region.count,
                    index: 0,
                })
            }
            None => None,
        };

        if let Some(fadeout) = options.fadeout {
            if fadeout.steps == 0
                || fadeout.duration <= RationalTime::ZERO
                || fadeout.start_offset < RationalTime::ZERO
            {
                return Err(ScheduleError::InvalidFadeout);
            }
        }
        // without a finite loop there is no extra pass to wait for
        let fade_now = looping.map_or(true, |status| status.count.is_none());
        self.fadeout = options
            .fadeout
            .filter(|_| fade_now)
            .map(|fadeout| FadeoutStatus::arm(&fadeout, now));
        self.fadeout_request = options.fadeout;

        debug!(
            "starting playback of {} objects at {} (session time {}), loop {:?}",
            timeline.len(),
            from,
            now,
            looping
        );

        self.timeline = timeline;
        self.end_position = end_position;
        self.looping = looping;
        self.loop_jumps = 0;
        self.index = 0;
        self.playing.clear();
        self.channels.clear();
        self.cursor = Cursor::new(from, now, self.config.initial_tempo);
        self.replay = Replay {
            target: from,
            index: 0,
            at: now,
        };
        self.state = PlayState::Preparing;
        Ok(())
    }

    /// Dispatch everything due until `now` plus the lookahead, up to the per tick limit.
    pub fn tick(&mut self, sink: &mut dyn EventSink, now: RationalTime) -> TickReport {
        let horizon = now + self.config.lookahead;
        let mut report = TickReport::default();
        loop {
            if report.dispatched >= self.config.events_per_tick {
                report.cap_reached = true;
                break;
            }
            let step = match self.state {
                PlayState::Idle | PlayState::Draining | PlayState::Stopped => Step::Idle,
                PlayState::Preparing => self.replay_step(sink, horizon),
                PlayState::LoopBoundary => self.boundary_step(sink, horizon),
                PlayState::Running => self.running_step(sink, horizon),
            };
            match step {
                Step::Sent => report.dispatched += 1,
                Step::Silent => {}
                Step::NotDue | Step::Idle => break,
            }
        }
        report
    }

    /// The output played everything up to the finish marker.
    pub fn confirm_drained(&mut self) {
        if self.state == PlayState::Draining {
            debug!("playback drained");
            self.state = PlayState::Stopped;
        }
    }

    /// Stop immediately, releasing all sounding notes. Does nothing when idle.
    pub fn stop(&mut self, sink: &mut dyn EventSink) {
        if self.state == PlayState::Idle {
            return;
        }
        debug!("stopping playback in state {:?}", self.state);
        self.release_all(sink, None);
        self.looping = None;
        self.fadeout = None;
        self.fadeout_request = None;
        self.index = self.timeline.len();
        self.state = PlayState::Idle;
    }

    fn gain(&self) -> Option<(u32, u32)> {
        self.fadeout.map(|fadeout| fadeout.gain())
    }

    fn dispatch(&mut self, sink: &mut dyn EventSink, event: SinkEvent, at: RationalTime) -> Step {
        let event = self.channels.pre_send(event, self.gain());
        trace!("{}: {:?}", at, event);
        if let Err(err) = sink.send(&event, Some(at)) {
            warn!("{} at {}, stopping", err, at);
            self.force_stop(sink, at);
        }
        Step::Sent
    }

    fn replay_step(&mut self, sink: &mut dyn EventSink, horizon: RationalTime) -> Step {
        let at = self.replay.at;
        if at > horizon {
            return Step::NotDue;
        }
        let timeline = Arc::clone(&self.timeline);
        while let Some(object) = timeline.get(self.replay.index) {
            if object.position >= self.replay.target {
                break;
            }
            self.replay.index += 1;
            match object.kind {
                ObjectKind::Tempo(tempo) => self.cursor.set_tempo(tempo),
                ref kind => {
                    if let Some(event) = sink_event(kind) {
                        return self.dispatch(sink, event, at);
                    }
                }
            }
        }
        debug!("resuming at {} ({})", self.replay.target, at);
        self.index = self.replay.index;
        self.state = PlayState::Running;
        Step::Silent
    }

    fn boundary_step(&mut self, sink: &mut dyn EventSink, horizon: RationalTime) -> Step {
        let at = self.replay.at;
        if at > horizon {
            return Step::NotDue;
        }
        if let Some(note) = self.playing.pop() {
            let off = SinkEvent::NoteOff {
                channel: note.channel,
                pitch: note.pitch,
            };
            return self.dispatch(sink, off, at);
        }
        let sustained = self.channels.take_sustained();
        if !sustained.is_empty() {
            for note in sustained {
                self.playing.restart(note, self.replay.target);
            }
            return Step::Silent;
        }
        if let Some(&channel) = self.channels.holding_channels().first() {
            let hold_off = SinkEvent::ControlChange {
                channel,
                controller: controller::HOLD,
                value: 0,
            };
            return self.dispatch(sink, hold_off, at);
        }
        self.replay_step(sink, horizon)
    }

    fn running_step(&mut self, sink: &mut dyn EventSink, horizon: RationalTime) -> Step {
        let timeline = Arc::clone(&self.timeline);
        let pass_end = self.looping.map(|status| status.end);
        let next_event = timeline
            .get(self.index)
            .filter(|object| pass_end.map_or(true, |end| object.position < end));
        let exhausted = next_event.is_none() && pass_end.is_none();

        let action = match (self.playing.next_stop(), next_event) {
            (Some(stop), Some(event)) if stop <= event.position => Action::Release(stop),
            (Some(stop), None) if pass_end.map_or(true, |end| stop <= end) => {
                Action::Release(stop)
            }
            (_, Some(event)) => Action::Event(event),
            (_, None) => match pass_end {
                Some(end) => Action::Boundary(end),
                None => {
                    // only notes held by the pedal can be left, they last until the song ends
                    let sustained = self.channels.take_sustained();
                    if !sustained.is_empty() {
                        let stop = self.song_end();
                        for note in sustained {
                            self.playing.restart(note, stop);
                        }
                        return Step::Silent;
                    }
                    Action::Finish(self.song_end())
                }
            },
        };

        let at = self.cursor.time_at(action.position());
        if let Some(fadeout) = self.fadeout {
            // fade steps go before anything else at the same time
            if fadeout.next_step_time <= at {
                if fadeout.next_step_time > horizon {
                    return Step::NotDue;
                }
                return self.fade_step(sink);
            }
        }
        if at > horizon {
            return Step::NotDue;
        }

        match action {
            Action::Release(_) => self.release_step(sink, exhausted),
            Action::Event(object) => self.event_step(sink, object),
            Action::Boundary(end) => self.loop_boundary(end),
            Action::Finish(end) => {
                self.cursor.advance(end);
                let at = self.cursor.time();
                self.finish(sink, at)
            }
        }
    }

    fn song_end(&self) -> Position {
        self.cursor.position().max(self.end_position)
    }

    fn release_step(&mut self, sink: &mut dyn EventSink, exhausted: bool) -> Step {
        let note = match self.playing.pop() {
            Some(note) => note,
            None => return Step::Silent,
        };
        self.cursor.advance(note.stop);
        if !self.config.disable_hold && self.channels.is_holding(note.channel) {
            if !exhausted {
                trace!("{}: holding {:?}", self.cursor.time(), note);
                self.channels.get(note.channel).sustained.push(note);
                return Step::Silent;
            }
            if note.stop < self.end_position {
                self.playing.restart(note, self.end_position);
                return Step::Silent;
            }
        }
        let at = self.cursor.time();
        let off = SinkEvent::NoteOff {
            channel: note.channel,
            pitch: note.pitch,
        };
        self.dispatch(sink, off, at)
    }

    fn event_step(&mut self, sink: &mut dyn EventSink, object: &SeqObject) -> Step {
        self.index += 1;
        self.cursor.advance(object.position);
        let at = self.cursor.time();
        match object.kind {
            ObjectKind::Note {
                channel,
                pitch,
                velocity,
                length,
            } => {
                let on = SinkEvent::NoteOn {
                    channel,
                    pitch,
                    velocity,
                };
                let step = self.dispatch(sink, on, at);
                // a rejected note on has stopped playback
                if self.state == PlayState::Running {
                    self.playing.start(channel, pitch, object.position + length);
                }
                step
            }
            ObjectKind::Tempo(tempo) => {
                debug!("{}: tempo {} at {}", at, tempo, object.position);
                self.cursor.change_tempo(object.position, tempo);
                Step::Silent
            }
            ObjectKind::Controller {
                channel,
                controller: controller::HOLD,
                value,
            } if value < 64 => {
                let position = self.cursor.position();
                for note in std::mem::take(&mut self.channels.get(channel).sustained) {
                    self.playing.restart(note, position);
                }
                let hold_off = SinkEvent::ControlChange {
                    channel,
                    controller: controller::HOLD,
                    value,
                };
                self.dispatch(sink, hold_off, at)
            }
            ref kind => match sink_event(kind) {
                Some(event) => self.dispatch(sink, event, at),
                None => Step::Silent,
            },
        }
    }

    fn loop_boundary(&mut self, end: Position) -> Step {
        let mut status = match self.looping {
            Some(status) => status,
            None => return Step::Silent,
        };
        self.cursor.advance(end);
        let at = self.cursor.time();

        let jump = if !status.exhausted() {
            true
        } else if let Some(request) = self.fadeout_request {
            // one more pass to fade out in, and as many as the fade-out needs
            if self.fadeout.is_none() {
                debug!("{}: arming fade-out after {} loops", at, status.index);
                self.fadeout = Some(FadeoutStatus::arm(&request, at));
            }
            true
        } else {
            false
        };

        if !jump {
            debug!("{}: loop done after {} jumps, continuing", at, status.index);
            self.looping = None;
            return Step::Silent;
        }

        status.index += 1;
        self.loop_jumps += 1;
        debug!(
            "{}: loop boundary at {}, jumping back to {} ({}/{:?})",
            at, end, status.start, status.index, status.count
        );
        self.looping = Some(status);
        self.cursor = Cursor::new(status.start, at, self.config.initial_tempo);
        self.replay = Replay {
            target: status.start,
            index: 0,
            at,
        };
        self.state = PlayState::LoopBoundary;
        Step::Silent
    }

    fn fade_step(&mut self, sink: &mut dyn EventSink) -> Step {
        let mut fadeout = match self.fadeout {
            Some(fadeout) => fadeout,
            None => return Step::Silent,
        };
        let at = fadeout.next_step_time;
        let silent = fadeout.step();
        self.fadeout = Some(fadeout);
        debug!(
            "{}: fade-out step {}/{}",
            at, fadeout.current_step, fadeout.step_count
        );

        for channel in self.channels.channels() {
            for event in self.channels.volume_events(channel).iter() {
                let event = self.channels.pre_send(event.clone(), Some(fadeout.gain()));
                trace!("{}: {:?}", at, event);
                if let Err(err) = sink.send(&event, Some(at)) {
                    warn!("{} at {}, stopping", err, at);
                    self.force_stop(sink, at);
                    return Step::Sent;
                }
            }
        }
        if silent {
            debug!("{}: fade-out complete", at);
            self.force_stop(sink, at);
        }
        Step::Sent
    }

    /// Send note offs for every sounding note, ignoring rejections.
    fn release_all(&mut self, sink: &mut dyn EventSink, at: Option<RationalTime>) {
        let sustained = self.channels.take_sustained();
        let notes = std::iter::from_fn(|| self.playing.pop()).collect::<Vec<_>>();
        for note in notes.into_iter().chain(sustained) {
            let off = SinkEvent::NoteOff {
                channel: note.channel,
                pitch: note.pitch,
            };
            trace!("{:?}: {:?}", at, off);
            if let Err(err) = sink.send(&off, at) {
                debug!("note off rejected while stopping: {}", err);
            }
        }
    }

    /// End playback at `at`: release everything, give up the loop and the fade-out, finish.
    fn force_stop(&mut self, sink: &mut dyn EventSink, at: RationalTime) {
        self.release_all(sink, Some(at));
        self.looping = None;
        self.fadeout = None;
        self.fadeout_request = None;
        self.index = self.timeline.len();
        self.finish(sink, at);
    }

    fn finish(&mut self, sink: &mut dyn EventSink, at: RationalTime) -> Step {
        debug!("{}: finished, draining", at);
        self.state = PlayState::Draining;
        let marker = SinkEvent::Marker(FINISH_MARKER.into());
        if let Err(err) = sink.send(&marker, Some(at)) {
            warn!("finish marker rejected: {}", err);
        }
        Step::Sent
    }
}
