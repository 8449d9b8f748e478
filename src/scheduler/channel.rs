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

//! Per channel state the scheduler needs to keep playback consistent.

use std::collections::BTreeMap;

use synseq_core::timeline::{controller, Channel};

use super::playing::PlayingNote;
use crate::sink::SinkEvent;

/// Volume a channel is assumed to have before any volume controller was seen.
pub const DEFAULT_VOLUME: u16 = 100 << 7;

#[derive(Debug, Clone)]
pub struct ChannelState {
    /// Sustain pedal is down.
    pub holding: bool,
    /// Notes that reached their stop while the pedal was down.
    pub sustained: Vec<PlayingNote>,
    /// 14 bit volume requested by the song, before any fade-out.
    pub volume: u16,
    pub bank_msb: u8,
    pub bank_lsb: u8,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            holding: false,
            sustained: Vec::new(),
            volume: DEFAULT_VOLUME,
            bank_msb: 0,
            bank_lsb: 0,
        }
    }
}

impl ChannelState {
    pub fn bank(&self) -> u16 {
        (u16::from(self.bank_msb) << 7) | u16::from(self.bank_lsb)
    }
}

/// State of all channels that have been used so far.
#[derive(Debug, Default)]
pub struct Channels {
    channels: BTreeMap<Channel, ChannelState>,
}

/// Scale a 14 bit volume by `numerator / denominator`.
pub fn scale_volume(volume: u16, numerator: u32, denominator: u32) -> u16 {
    (u32::from(volume) * numerator / denominator) as u16
}

impl Channels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, channel: Channel) -> &mut ChannelState {
        self.channels.entry(channel).or_default()
    }

    pub fn is_holding(&self, channel: Channel) -> bool {
        self.channels.get(&channel).map_or(false, |c| c.holding)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, &ChannelState)> {
        self.channels.iter().map(|(c, s)| (*c, s))
    }

    /// Take every note parked by the sustain pedal, on all channels.
    pub fn take_sustained(&mut self) -> Vec<PlayingNote> {
        let mut notes = Vec::new();
        for state in self.channels.values_mut() {
            notes.append(&mut state.sustained);
        }
        notes
    }

    /// Channels whose pedal is currently down.
    pub fn holding_channels(&self) -> Vec<Channel> {
        self.channels
            .iter()
            .filter(|(_, s)| s.holding)
            .map(|(c, _)| *c)
            .collect()
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// Record what `event` changes and return the event as it must be sent.
    ///
    /// Volume controllers update the song volume of the channel and are then scaled by
    /// `gain`, the current fade-out factor as `(numerator, denominator)`.
    /// Program changes pick up the currently selected bank.
    pub fn pre_send(&mut self, event: SinkEvent, gain: Option<(u32, u32)>) -> SinkEvent {
        match event {
            SinkEvent::ControlChange {
                channel,
                controller,
                value,
            } => {
                let state = self.get(channel);
                match controller {
                    controller::VOLUME_MSB | controller::VOLUME_LSB => {
                        if controller == controller::VOLUME_MSB {
                            state.volume = (u16::from(value) << 7) | (state.volume & 0x7F);
                        } else {
                            state.volume = (state.volume & !0x7F) | u16::from(value);
                        }
                        let volume = match gain {
                            Some((numerator, denominator)) => {
                                scale_volume(state.volume, numerator, denominator)
                            }
                            None => state.volume,
                        };
                        let value = if controller == controller::VOLUME_MSB {
                            (volume >> 7) as u8
                        } else {
                            (volume & 0x7F) as u8
                        };
                        return SinkEvent::ControlChange {
                            channel,
                            controller,
                            value,
                        };
                    }
                    controller::BANK_SELECT_MSB => state.bank_msb = value,
                    controller::BANK_SELECT_LSB => state.bank_lsb = value,
                    controller::HOLD => state.holding = value >= 64,
                    _ => {}
                }
                event
            }
            SinkEvent::ProgramChange {
                channel, preset, ..
            } => SinkEvent::ProgramChange {
                channel,
                preset,
                bank: self.get(channel).bank(),
            },
            other => {
                if let Some(channel) = other.channel() {
                    self.get(channel);
                }
                other
            }
        }
    }

    /// The volume controller pair restating the song volume of `channel`.
    ///
    /// Sent through [`Channels::pre_send`] with a fade-out gain, they set the faded volume.
    pub fn volume_events(&mut self, channel: Channel) -> [SinkEvent; 2] {
        let volume = self.get(channel).volume;
        [
            SinkEvent::ControlChange {
                channel,
                controller: controller::VOLUME_MSB,
                value: (volume >> 7) as u8,
            },
            SinkEvent::ControlChange {
                channel,
                controller: controller::VOLUME_LSB,
                value: (volume & 0x7F) as u8,
            },
        ]
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.channels.keys().copied().collect()
    }
}
