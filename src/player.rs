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

//! The control side of playback: scheduler, renderer and the channel to the output.
//!
//! A [`Player`] is created together with the [`OutputStage`] it feeds. The output stage goes to
//! the audio callback, the player stays with whoever drives it by calling [`Player::step`]
//! repeatedly. Each step handles the messages sent back by the output, dispatches the events
//! that are due and renders at most one block.

use std::sync::Arc;

use log::{debug, warn};
use ringbuf::traits::{Consumer, Producer};

use synseq_core::time::RationalTime;
use synseq_core::timeline::Timeline;

use crate::message::{self, ControlEnd, FromOutput, ToOutput};
use crate::output::OutputStage;
use crate::queue::{FrameBlock, QueueConfig, Watermarks};
use crate::render::Renderer;
use crate::scheduler::{PlayOptions, PlayState, ScheduleError, Scheduler, SchedulerConfig};
use crate::sink::SinkEvent;
use crate::synth::Synthesizer;

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub sample_rate: u32,
    /// Frames per rendered block.
    pub block_frames: usize,
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
    /// How long to wait for sounding voices before the synthesizer is reset.
    pub voice_stop_timeout: RationalTime,
    /// Messages each direction of the output channel can hold.
    pub channel_capacity: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            block_frames: 441,
            queue: QueueConfig::default(),
            scheduler: SchedulerConfig::default(),
            voice_stop_timeout: RationalTime::new(1, 1),
            channel_capacity: 256,
        }
    }
}

/// Things the driver of a player may want to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// The output played a marker.
    MarkerReached {
        name: Arc<str>,
        frames_into_call: usize,
    },
    /// Everything was played, the scheduler stopped.
    Finished,
    /// The output queue is full, rendering is paused.
    QueueFull,
    /// The output queue drained, rendering resumes.
    QueueReady,
    Status {
        consumed_frames: u64,
        sample_rate: u32,
        queue_empty: bool,
    },
}

pub struct Player<S> {
    config: PlayerConfig,
    scheduler: Scheduler,
    renderer: Renderer<S>,
    channel: ControlEnd,
    /// Blocks returned by the output, ready to be rendered into.
    spare: Vec<FrameBlock>,
    /// A rendered block the channel had no room for.
    stalled: Option<FrameBlock>,
    queue_full: bool,
    /// Release tail after an explicit stop.
    tail: bool,
    /// Frames spent waiting for voices after everything else was rendered.
    tail_frames: u64,
    end_sent: bool,
}

impl<S: Synthesizer> Player<S> {
    /// Create a player and the output stage it talks to.
    pub fn new(synth: S, config: PlayerConfig) -> (Self, OutputStage) {
        let (control, output) = message::channel(config.channel_capacity);
        let watermarks = Watermarks::new(&config.queue, config.sample_rate);
        let block_capacity = watermarks.high / config.block_frames.max(1) + 2;
        let stage = OutputStage::new(
            output,
            config.queue.clone(),
            config.sample_rate,
            block_capacity,
        );
        let spare = (0..block_capacity)
            .map(|_| FrameBlock::with_capacity(config.block_frames))
            .collect();
        let player = Self {
            scheduler: Scheduler::new(config.scheduler.clone()),
            renderer: Renderer::new(synth, config.sample_rate),
            channel: control,
            spare,
            stalled: None,
            queue_full: false,
            tail: false,
            tail_frames: 0,
            end_sent: false,
            config,
        };
        (player, stage)
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn state(&self) -> PlayState {
        self.scheduler.state()
    }

    pub fn synth(&self) -> &S {
        self.renderer.synth()
    }

    /// Session time of the next frame to be rendered.
    pub fn now(&self) -> RationalTime {
        self.renderer.now()
    }

    /// Rendering waits for the output to make room.
    pub fn is_throttled(&self) -> bool {
        self.queue_full || self.stalled.is_some()
    }

    /// There is still something to render or to wait for.
    pub fn is_busy(&self) -> bool {
        match self.scheduler.state() {
            PlayState::Idle => self.tail,
            PlayState::Stopped => false,
            _ => true,
        }
    }

    /// Start playing `timeline` right after what was rendered so far.
    pub fn play(&mut self, timeline: Arc<Timeline>, options: PlayOptions) -> Result<(), ScheduleError> {
        let now = self.renderer.now();
        self.scheduler.start(timeline, now, options)?;
        self.renderer.cancel_stop();
        if self.end_sent {
            // reopen the prerender gate of the output
            self.send(ToOutput::Stop);
        }
        self.end_sent = false;
        self.tail = false;
        self.tail_frames = 0;
        Ok(())
    }

    /// Stop playback, dropping queued audio. The release of the sounding notes is still rendered.
    pub fn stop(&mut self) {
        if !self.is_busy() {
            return;
        }
        self.renderer.clear_pending();
        self.renderer.cancel_stop();
        self.scheduler.stop(&mut self.renderer);
        if let Some(block) = self.stalled.take() {
            self.spare.push(block);
        }
        self.send(ToOutput::Stop);
        self.end_sent = false;
        self.tail = true;
        self.tail_frames = 0;
    }

    pub fn pause(&mut self, paused: bool) {
        self.send(ToOutput::Pause(paused));
    }

    /// Place a marker at the next frame to be rendered.
    pub fn user_marker(&mut self, name: &str) {
        self.renderer.enqueue(SinkEvent::Marker(name.into()), None);
    }

    /// Wind playback down at the next scheduled event instead of dropping the queued audio.
    ///
    /// Sounding notes are released and the finish marker is played, so the driver sees
    /// [`PlayerEvent::Finished`] as if the song had ended there.
    pub fn request_stop(&mut self) {
        match self.scheduler.state() {
            PlayState::Preparing | PlayState::Running | PlayState::LoopBoundary => {
                debug!("stop requested at {}", self.renderer.now());
                self.renderer.request_stop();
            }
            PlayState::Idle | PlayState::Draining | PlayState::Stopped => {}
        }
    }

    /// Switch to a new sample rate, stopping playback.
    ///
    /// The synthesizer gets the configured timeout to let its voices decay, afterwards it is
    /// reset.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.renderer.clear_pending();
        self.renderer.cancel_stop();
        self.scheduler.stop(&mut self.renderer);

        let frames = self.config.block_frames;
        let limit = self
            .config
            .voice_stop_timeout
            .frames(self.renderer.sample_rate())
            .max(0) as u64;
        let mut scratch = self
            .spare
            .pop()
            .unwrap_or_else(|| FrameBlock::with_capacity(frames));
        let mut waited = 0;
        while self.renderer.has_pending() || self.renderer.synth().active_voices() > 0 {
            if waited >= limit {
                warn!(
                    "{} voices still sounding after {}, resetting the synthesizer",
                    self.renderer.synth().active_voices(),
                    self.config.voice_stop_timeout
                );
                self.renderer.synth_mut().reset();
                break;
            }
            self.renderer.render_block(&mut scratch, frames);
            waited += frames as u64;
        }
        self.spare.push(scratch);
        if let Some(block) = self.stalled.take() {
            self.spare.push(block);
        }

        debug!(
            "changing sample rate from {} to {}",
            self.config.sample_rate, sample_rate
        );
        self.renderer.set_sample_rate(sample_rate);
        self.config.sample_rate = sample_rate;
        self.send(ToOutput::Stop);
        self.send(ToOutput::Reconfigure { sample_rate });
        self.end_sent = false;
        self.tail = false;
    }

    /// Stop everything and tell the output to shut down.
    pub fn release(mut self) {
        self.renderer.clear_pending();
        self.scheduler.stop(&mut self.renderer);
        self.send(ToOutput::Release);
    }

    /// Do one unit of work, returning what happened on the output since the last step.
    pub fn step(&mut self) -> Vec<PlayerEvent> {
        let mut events = Vec::new();
        self.handle_messages(&mut events);
        if !self.flush_stalled() || self.queue_full {
            return events;
        }
        match self.scheduler.state() {
            PlayState::Preparing | PlayState::Running | PlayState::LoopBoundary => {
                self.schedule();
                self.render_next();
            }
            PlayState::Draining => self.render_tail(),
            PlayState::Idle if self.tail => self.render_tail(),
            PlayState::Idle | PlayState::Stopped => {}
        }
        events
    }

    fn handle_messages(&mut self, events: &mut Vec<PlayerEvent>) {
        while let Some(message) = self.channel.from_output.try_pop() {
            match message {
                FromOutput::Status {
                    consumed_frames,
                    sample_rate,
                    queue_empty,
                    input_finished,
                } => {
                    events.push(PlayerEvent::Status {
                        consumed_frames,
                        sample_rate,
                        queue_empty,
                    });
                    if queue_empty
                        && input_finished
                        && self.end_sent
                        && self.scheduler.state() == PlayState::Draining
                    {
                        self.scheduler.confirm_drained();
                        events.push(PlayerEvent::Finished);
                    }
                }
                FromOutput::PauseQueue(paused) => {
                    debug!("output queue {}", if paused { "full" } else { "ready" });
                    self.queue_full = paused;
                    events.push(if paused {
                        PlayerEvent::QueueFull
                    } else {
                        PlayerEvent::QueueReady
                    });
                }
                FromOutput::Marker {
                    name,
                    frames_into_call,
                } => events.push(PlayerEvent::MarkerReached {
                    name,
                    frames_into_call,
                }),
                FromOutput::Recycle(block) => self.spare.push(block),
            }
        }
    }

    /// Tick until the scheduler caught up with the render head.
    fn schedule(&mut self) {
        let now = self.renderer.now();
        while self.scheduler.tick(&mut self.renderer, now).cap_reached {}
    }

    /// Keep rendering until the last events and voices are done, then end the stream.
    fn render_tail(&mut self) {
        if self.end_sent {
            return;
        }
        let pending = self.renderer.has_pending();
        if pending || self.renderer.synth().active_voices() > 0 {
            let limit = self
                .config
                .voice_stop_timeout
                .frames(self.renderer.sample_rate())
                .max(0) as u64;
            if pending || self.tail_frames < limit {
                if !pending {
                    self.tail_frames += self.config.block_frames as u64;
                }
                self.render_next();
                return;
            }
            warn!(
                "{} voices still sounding after {}, resetting the synthesizer",
                self.renderer.synth().active_voices(),
                self.config.voice_stop_timeout
            );
            self.renderer.synth_mut().reset();
        }
        debug!("end of stream at {}", self.renderer.now());
        self.send(ToOutput::EndOfStream);
        self.end_sent = true;
        self.tail = false;
    }

    fn render_next(&mut self) {
        let frames = self.config.block_frames;
        let mut block = self
            .spare
            .pop()
            .unwrap_or_else(|| FrameBlock::with_capacity(frames));
        self.renderer.render_block(&mut block, frames);
        self.push_block(block);
    }

    /// Hand a block to the output, keeping it as stalled if there is no room.
    fn push_block(&mut self, block: FrameBlock) -> bool {
        match self.channel.to_output.try_push(ToOutput::Render(block)) {
            Ok(()) => true,
            Err(message) => {
                if let ToOutput::Render(block) = message {
                    self.stalled = Some(block);
                }
                false
            }
        }
    }

    fn flush_stalled(&mut self) -> bool {
        match self.stalled.take() {
            Some(block) => self.push_block(block),
            None => true,
        }
    }

    fn send(&mut self, message: ToOutput) {
        if let Err(message) = self.channel.to_output.try_push(message) {
            warn!("output channel full, dropping {:?}", message);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use synseq_core::rational::Rational;
    use synseq_core::time::Position;
    use synseq_core::timeline::ObjectKind;

    /// Voices that never stop on their own.
    #[derive(Default)]
    struct DroneSynth {
        voices: usize,
        resets: usize,
    }

    impl Synthesizer for DroneSynth {
        fn set_sample_rate(&mut self, _sample_rate: u32) {}
        fn handle(&mut self, event: &SinkEvent) {
            if let SinkEvent::NoteOn { .. } = event {
                self.voices += 1;
            }
        }
        fn render(&mut self, _left: &mut [f32], _right: &mut [f32]) {}
        fn active_voices(&self) -> usize {
            self.voices
        }
        fn reset(&mut self) {
            self.voices = 0;
            self.resets += 1;
        }
    }

    fn config() -> PlayerConfig {
        PlayerConfig {
            sample_rate: 1000,
            block_frames: 10,
            voice_stop_timeout: RationalTime::new(1, 10),
            ..PlayerConfig::default()
        }
    }

    fn song() -> Arc<Timeline> {
        let timeline = Timeline::from_kinds(vec![(
            Position::ZERO,
            ObjectKind::Note {
                channel: 0,
                pitch: 60,
                velocity: 100,
                length: Position::quarters(Rational::int(1)),
            },
        )])
        .unwrap();
        Arc::new(timeline)
    }

    #[test]
    fn sample_rate_change_resets_stuck_voices() {
        let (mut player, _stage) = Player::new(DroneSynth::default(), config());
        player.play(song(), PlayOptions::default()).unwrap();
        player.step();
        assert_eq!(player.synth().active_voices(), 1);

        player.set_sample_rate(2000);
        assert_eq!(player.synth().resets, 1);
        assert_eq!(player.state(), PlayState::Idle);
        assert_eq!(player.config().sample_rate, 2000);
        assert!(!player.is_busy());
    }

    #[test]
    fn stuck_voices_end_the_stream_after_the_timeout() {
        let (mut player, _stage) = Player::new(DroneSynth::default(), config());
        player.play(song(), PlayOptions::default()).unwrap();
        player.step();
        player.stop();
        assert!(player.is_busy());
        // the queue is never consumed, so keep below its capacity
        for _ in 0..20 {
            player.step();
        }
        assert_eq!(player.synth().resets, 1);
        assert!(!player.is_busy());
        assert!(player.play(song(), PlayOptions::default()).is_ok());
    }

    #[test]
    fn play_while_playing_is_rejected() {
        let (mut player, _stage) = Player::new(DroneSynth::default(), config());
        player.play(song(), PlayOptions::default()).unwrap();
        assert_eq!(
            player.play(song(), PlayOptions::default()),
            Err(ScheduleError::AlreadyPlaying {
                state: PlayState::Preparing
            })
        );
    }

    #[test]
    fn resume_is_not_lost_when_status_floods_the_channel() {
        let config = PlayerConfig {
            channel_capacity: 8,
            ..config()
        };
        let timeline = Timeline::from_kinds(vec![(
            Position::ZERO,
            ObjectKind::Note {
                channel: 0,
                pitch: 60,
                velocity: 100,
                length: Position::quarters(Rational::int(20)),
            },
        )])
        .unwrap();
        let (mut player, mut stage) = Player::new(DroneSynth::default(), config);
        player.play(Arc::new(timeline), PlayOptions::default()).unwrap();

        let mut none_l: [f32; 0] = [];
        let mut none_r: [f32; 0] = [];
        let mut full = false;
        for _ in 0..200 {
            full |= player.step().contains(&PlayerEvent::QueueFull);
            stage.process(&mut none_l, &mut none_r);
            if full {
                break;
            }
        }
        assert!(full);

        // nobody reads status reports for a while, then the queue drains below the low watermark
        for _ in 0..10 {
            stage.process(&mut none_l, &mut none_r);
        }
        let mut left = [0.0; 100];
        let mut right = [0.0; 100];
        for _ in 0..3 {
            stage.process(&mut left, &mut right);
        }
        assert_eq!(stage.backlog_len(), 1);

        let mut ready = false;
        let mut finished = false;
        for _ in 0..3000 {
            for event in player.step() {
                ready |= event == PlayerEvent::QueueReady;
                finished |= event == PlayerEvent::Finished;
            }
            if finished {
                break;
            }
            stage.process(&mut left, &mut right);
        }
        assert!(ready);
        assert!(finished);
        assert!(stage.consumed_frames() >= 10_000);
    }
}
