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

//! Tempo-aware sequencing: exact timing of timelines, playback scheduling and the queue that
//! carries rendered audio to a real-time output.

pub mod listing;
pub mod message;
pub mod output;
pub mod player;
pub mod queue;
pub mod render;
pub mod resolver;
pub mod scheduler;
pub mod sink;
pub mod synth;

pub use synseq_core::{rational, time, timeline};
