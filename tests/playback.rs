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

//! Playing listings through the player and output stage, the way the binary does, but on a
//! single thread with the output driven by hand.

use std::sync::Arc;

use syn_seq::listing;
use syn_seq::output::OutputStage;
use syn_seq::player::{Player, PlayerConfig, PlayerEvent};
use syn_seq::scheduler::{Fadeout, LoopRegion, PlayOptions, PlayState, FINISH_MARKER};
use syn_seq::synth::tone::ToneSynth;
use syn_seq::synth::Synthesizer;
use syn_seq::time::{Position, RationalTime};
use syn_seq::timeline::Timeline;

const RATE: u32 = 8000;
/// Frames per simulated audio callback.
const CALLBACK: usize = 256;

const TWO_NOTES: &str = "
0 tempo 120
0 note 0 60 100 1
1 note 0 64 100 1
";

fn player() -> (Player<ToneSynth>, OutputStage) {
    let config = PlayerConfig {
        sample_rate: RATE,
        block_frames: 80,
        ..PlayerConfig::default()
    };
    Player::new(ToneSynth::new(RATE), config)
}

fn timeline(source: &str) -> Arc<Timeline> {
    Arc::new(listing::parse(source).unwrap())
}

#[derive(Default)]
struct Run {
    events: Vec<PlayerEvent>,
    audio: Vec<f32>,
}

impl Run {
    /// Markers with the absolute output frame they were played at.
    fn markers(&self) -> Vec<(String, u64)> {
        let mut consumed = 0;
        let mut markers = Vec::new();
        for event in self.events.iter() {
            match event {
                PlayerEvent::Status {
                    consumed_frames, ..
                } => consumed = *consumed_frames,
                PlayerEvent::MarkerReached {
                    name,
                    frames_into_call,
                } => markers.push((name.to_string(), consumed + *frames_into_call as u64)),
                _ => {}
            }
        }
        markers
    }

    fn finished(&self) -> usize {
        self.events
            .iter()
            .filter(|event| **event == PlayerEvent::Finished)
            .count()
    }
}

/// Alternate between the player and the output for at most `callbacks` output buffers.
fn drive(player: &mut Player<ToneSynth>, stage: &mut OutputStage, callbacks: usize, run: &mut Run) {
    let mut left = [0.0; CALLBACK];
    let mut right = [0.0; CALLBACK];
    for _ in 0..callbacks {
        for _ in 0..16 {
            run.events.extend(player.step());
            if player.is_throttled() || !player.is_busy() {
                break;
            }
        }
        if run.events.contains(&PlayerEvent::Finished) {
            return;
        }
        let frames = stage.process(&mut left, &mut right);
        run.audio.extend_from_slice(&left[..frames]);
    }
}

fn play_to_end(source: &str, options: PlayOptions) -> (Player<ToneSynth>, Run) {
    let (mut player, mut stage) = player();
    player.play(timeline(source), options).unwrap();
    let mut run = Run::default();
    drive(&mut player, &mut stage, 1000, &mut run);
    assert_eq!(run.finished(), 1, "playback did not finish");
    (player, run)
}

#[test]
fn plays_a_song_to_the_end() {
    let (player, run) = play_to_end(TWO_NOTES, PlayOptions::default());

    assert_eq!(player.state(), PlayState::Stopped);
    assert_eq!(player.scheduler().sounding_notes(), 0);
    assert_eq!(run.markers(), vec![(FINISH_MARKER.to_string(), 8000)]);

    // the last note ends after exactly one second, its release follows
    assert!(run.audio[..8000].iter().any(|sample| sample.abs() > 0.01));
    assert!(run.audio.len() >= 8000 + 400);
    assert!(run.audio.len() <= 8000 + 400 + 2 * 80);
    assert!(run.audio[run.audio.len() - 1].abs() < 1e-2);
}

#[test]
fn user_markers_are_placed_at_the_render_head() {
    let (mut player, mut stage) = player();
    player.play(timeline(TWO_NOTES), PlayOptions::default()).unwrap();
    player.user_marker("start");
    let mut run = Run::default();
    drive(&mut player, &mut stage, 1000, &mut run);
    assert_eq!(
        run.markers(),
        vec![
            ("start".to_string(), 0),
            (FINISH_MARKER.to_string(), 8000)
        ]
    );
}

#[test]
fn finite_loop_then_continue() {
    let options = PlayOptions {
        looping: Some(LoopRegion {
            start: Position::ZERO,
            end: None,
            count: Some(1),
        }),
        ..PlayOptions::default()
    };
    let (_, run) = play_to_end(TWO_NOTES, options);
    assert_eq!(run.markers(), vec![(FINISH_MARKER.to_string(), 2 * 8000)]);
}

#[test]
fn fadeout_takes_one_extra_pass() {
    let options = PlayOptions {
        looping: Some(LoopRegion {
            start: Position::ZERO,
            end: None,
            count: Some(2),
        }),
        fadeout: Some(Fadeout {
            steps: 4,
            start_offset: RationalTime::ZERO,
            duration: RationalTime::new(1, 2),
        }),
        ..PlayOptions::default()
    };
    let (_, run) = play_to_end(TWO_NOTES, options);
    // two jumps back, then half of the extra pass until the volume reached zero
    assert_eq!(run.markers(), vec![(FINISH_MARKER.to_string(), 3 * 8000 + 4000)]);
    let fading = &run.audio[3 * 8000 + 3000..3 * 8000 + 4000];
    let loud = &run.audio[8000 + 1000..8000 + 2000];
    let peak = |samples: &[f32]| samples.iter().fold(0.0f32, |max, s| max.max(s.abs()));
    assert!(peak(fading) < peak(loud));
}

#[test]
fn stop_and_play_again() {
    let (mut player, mut stage) = player();
    player.play(timeline(TWO_NOTES), PlayOptions::default()).unwrap();
    let mut run = Run::default();
    drive(&mut player, &mut stage, 10, &mut run);
    assert_eq!(player.state(), PlayState::Running);

    player.stop();
    assert_eq!(player.state(), PlayState::Idle);
    assert_eq!(player.scheduler().sounding_notes(), 0);
    drive(&mut player, &mut stage, 100, &mut run);
    assert!(!player.is_busy());
    assert_eq!(run.finished(), 0);
    assert_eq!(player.synth().active_voices(), 0);

    player.play(timeline(TWO_NOTES), PlayOptions::default()).unwrap();
    let mut run = Run::default();
    drive(&mut player, &mut stage, 1000, &mut run);
    assert_eq!(run.finished(), 1);
}

#[test]
fn requested_stop_ends_an_endless_loop() {
    let (mut player, mut stage) = player();
    let options = PlayOptions {
        looping: Some(LoopRegion {
            start: Position::ZERO,
            end: None,
            count: None,
        }),
        ..PlayOptions::default()
    };
    player.play(timeline(TWO_NOTES), options).unwrap();
    let mut run = Run::default();
    drive(&mut player, &mut stage, 10, &mut run);
    assert_eq!(run.finished(), 0);

    player.request_stop();
    drive(&mut player, &mut stage, 1000, &mut run);
    assert_eq!(run.finished(), 1);
    assert_eq!(player.state(), PlayState::Stopped);
    assert_eq!(player.scheduler().sounding_notes(), 0);

    let markers = run.markers();
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].0, FINISH_MARKER);
    assert!(markers[0].1 < 2 * 8000);
}
