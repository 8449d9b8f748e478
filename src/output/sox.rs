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

//! Getting sound out of the output stage using a sox subprocess.

use std::io;
use std::io::Write;
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};

use log::{debug, error};

pub enum SoxTarget<'a> {
    /// Play on the default audio device.
    Play,
    /// Write to a file in any format sox supports.
    File(&'a Path),
}

/// Feeds stereo `f32` frames to sox.
pub struct SoxSink {
    child: Child,
    audio_stream: Option<ChildStdin>,
    buffer: Vec<u8>,
    error: bool,
}

impl SoxSink {
    pub fn new(sample_rate: u32, target: SoxTarget) -> io::Result<Self> {
        let sample_rate_str = format!("{}", sample_rate);
        let input_args = &[
            "-R", // make the output reproducible
            "--channels",
            "2",
            "--rate",
            &sample_rate_str,
            "--type",
            "f32",
            "/dev/stdin",
        ];

        let mut child = match target {
            SoxTarget::Play => Command::new("play")
                .args(input_args)
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()?,
            SoxTarget::File(outfile) => {
                debug!("writing audio to {}", outfile.display());
                Command::new("sox")
                    .args(input_args)
                    .arg(outfile)
                    .stdin(Stdio::piped())
                    .spawn()?
            }
        };

        let audio_stream = child.stdin.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "sox was started without stdin")
        })?;

        Ok(Self {
            child,
            audio_stream: Some(audio_stream),
            buffer: Vec::new(),
            error: false,
        })
    }

    /// Write the frames, interleaving left and right samples.
    ///
    /// After the first failure, all further audio is dropped.
    pub fn write(&mut self, left: &[f32], right: &[f32]) {
        if self.error {
            return;
        }
        let stream = match self.audio_stream.as_mut() {
            Some(stream) => stream,
            None => return,
        };
        self.buffer.clear();
        interleave_bytes(left, right, &mut self.buffer);

        let status = stream.write_all(&self.buffer).and_then(|_| stream.flush());
        if let Err(err) = status {
            error!("Failed to write audio to sox stream: {}", err);
            self.error = true;
        }
    }

    /// Close the stream and wait for sox to exit.
    pub fn finish(mut self) -> io::Result<()> {
        // sox exits once its input is closed
        drop(self.audio_stream.take());
        let status = self.child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::Other,
                format!("sox exited with {}", status),
            ))
        }
    }
}

/// Append the little endian bytes of the interleaved frames to `bytes`.
pub fn interleave_bytes(left: &[f32], right: &[f32], bytes: &mut Vec<u8>) {
    bytes.reserve(left.len().min(right.len()) * 8);
    for (l, r) in left.iter().zip(right.iter()) {
        bytes.extend_from_slice(&l.to_le_bytes());
        bytes.extend_from_slice(&r.to_le_bytes());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interleaves_left_then_right() {
        let mut bytes = Vec::new();
        interleave_bytes(&[1.0, 2.0], &[-1.0, -2.0, -3.0], &mut bytes);
        let samples: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        assert_eq!(samples, vec![1.0, -1.0, 2.0, -2.0]);
    }
}
