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

//! A polyphonic sine synthesizer, enough to hear what the scheduler does.

use super::envelope::*;
use super::oscillator::*;
use super::Synthesizer;

use synseq_core::timeline::controller;

use crate::sink::SinkEvent;

const CHANNELS: usize = 16;
const EXPRESSION: u8 = 11;
/// Pitch bend range in semitones.
const BEND_RANGE: f64 = 2.0;

#[derive(Debug, Clone, Copy)]
struct ChannelParams {
    /// 14 bit volume
    volume: u16,
    expression: u8,
    /// Pitch bend in semitones.
    bend: f64,
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self {
            volume: 100 << 7,
            expression: 127,
            bend: 0.0,
        }
    }
}

impl ChannelParams {
    fn gain(&self) -> f64 {
        let volume = f64::from(self.volume) / f64::from(0x3FFF);
        let expression = f64::from(self.expression) / 127.0;
        volume * expression
    }
}

pub struct ToneSynth {
    /// Samples per second rate of the generated audio signal.
    sample_rate: f64,
    envelope: AR,
    /// Output gain of the synthesizer
    gain: f64,
    /// Voices beyond this number steal the oldest one.
    max_voices: usize,
    channels: [ChannelParams; CHANNELS],
    voices: Vec<ToneVoice>,
}

struct ToneVoice {
    channel: u8,
    pitch: u8,
    amplitude: f64,
    sine: Oscillator,
    envelope: EvalAR,
}

impl ToneSynth {
    pub fn new(sample_rate: u32) -> Self {
        let max_voices = 64;
        ToneSynth {
            sample_rate: f64::from(sample_rate),
            envelope: AR {
                attack: 0.005,
                release: 0.05,
            },
            gain: 0.25,
            max_voices,
            channels: [ChannelParams::default(); CHANNELS],
            voices: Vec::with_capacity(max_voices),
        }
    }

    fn params(&mut self, channel: u8) -> &mut ChannelParams {
        &mut self.channels[usize::from(channel) % CHANNELS]
    }

    fn release(&mut self, channel: u8, pitch: Option<u8>) {
        for voice in self.voices.iter_mut() {
            if voice.channel == channel && pitch.map_or(true, |p| p == voice.pitch) {
                voice.envelope.release();
            }
        }
    }

    fn retune(&mut self, channel: u8) {
        let bend = self.params(channel).bend;
        for voice in self.voices.iter_mut().filter(|v| v.channel == channel) {
            voice.sine.set_frequency(frequency(voice.pitch, bend));
        }
    }
}

impl Synthesizer for ToneSynth {
    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = f64::from(sample_rate);
        self.voices.clear();
    }

    fn handle(&mut self, event: &SinkEvent) {
        match *event {
            SinkEvent::NoteOn {
                channel,
                pitch,
                velocity,
            } if velocity > 0 => {
                if self.voices.len() >= self.max_voices {
                    self.voices.remove(0);
                }
                let bend = self.params(channel).bend;
                self.voices.push(ToneVoice {
                    channel,
                    pitch,
                    amplitude: f64::from(velocity) / 127.0,
                    sine: Oscillator::new(self.sample_rate, frequency(pitch, bend)),
                    envelope: self.envelope.instantiate(self.sample_rate),
                });
            }
            SinkEvent::NoteOn { channel, pitch, .. } | SinkEvent::NoteOff { channel, pitch } => {
                self.release(channel, Some(pitch))
            }
            SinkEvent::ControlChange {
                channel,
                controller,
                value,
            } => match controller {
                controller::VOLUME_MSB => {
                    let params = self.params(channel);
                    params.volume = (u16::from(value) << 7) | (params.volume & 0x7F);
                }
                controller::VOLUME_LSB => {
                    let params = self.params(channel);
                    params.volume = (params.volume & !0x7F) | u16::from(value);
                }
                EXPRESSION => self.params(channel).expression = value,
                controller::ALL_NOTES_OFF => self.release(channel, None),
                controller::ALL_SOUND_OFF => self.voices.retain(|v| v.channel != channel),
                _ => {}
            },
            SinkEvent::PitchBend { channel, value } => {
                self.params(channel).bend = f64::from(value) / 8192.0 * BEND_RANGE;
                self.retune(channel);
            }
            // no presets, pressure or system messages for a sine
            SinkEvent::ProgramChange { .. }
            | SinkEvent::ChannelPressure { .. }
            | SinkEvent::KeyPressure { .. }
            | SinkEvent::SysEx(_)
            | SinkEvent::Marker(_) => {}
        }
    }

    fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        let channels = self.channels;
        for (out_left, out_right) in left.iter_mut().zip(right.iter_mut()) {
            let mut wave = 0.0;
            for voice in self.voices.iter_mut() {
                let gain = channels[usize::from(voice.channel) % CHANNELS].gain();
                wave += voice.sine.next_sample() * voice.envelope.step() * voice.amplitude * gain;
            }
            let sample = (wave * self.gain) as f32;
            *out_left += sample;
            *out_right += sample;
        }
        self.voices.retain(|voice| !voice.envelope.faded());
    }

    fn active_voices(&self) -> usize {
        self.voices.len()
    }

    fn reset(&mut self) {
        self.voices.clear();
        self.channels = [ChannelParams::default(); CHANNELS];
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn render(synth: &mut ToneSynth, frames: usize) -> Vec<f32> {
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        synth.render(&mut left, &mut right);
        assert_eq!(left, right);
        left
    }

    #[test]
    fn notes_sound_and_fade() {
        let mut synth = ToneSynth::new(1000);
        assert!(render(&mut synth, 10).iter().all(|&s| s == 0.0));
        synth.handle(&SinkEvent::NoteOn {
            channel: 0,
            pitch: 69,
            velocity: 127,
        });
        assert_eq!(synth.active_voices(), 1);
        assert!(render(&mut synth, 20).iter().any(|&s| s != 0.0));

        synth.handle(&SinkEvent::NoteOff {
            channel: 0,
            pitch: 69,
        });
        // release takes 50 samples at this rate
        render(&mut synth, 100);
        assert_eq!(synth.active_voices(), 0);
    }

    #[test]
    fn volume_zero_is_silent() {
        let mut synth = ToneSynth::new(1000);
        for controller in &[controller::VOLUME_MSB, controller::VOLUME_LSB] {
            synth.handle(&SinkEvent::ControlChange {
                channel: 2,
                controller: *controller,
                value: 0,
            });
        }
        synth.handle(&SinkEvent::NoteOn {
            channel: 2,
            pitch: 60,
            velocity: 100,
        });
        assert!(render(&mut synth, 50).iter().all(|&s| s == 0.0));
        synth.reset();
        assert_eq!(synth.active_voices(), 0);
    }
}
