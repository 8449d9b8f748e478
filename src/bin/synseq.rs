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

//! `synseq` plays timeline listings through the sequencer, or tells how long they take.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info};
use snafu::{ResultExt, Snafu};
use structopt::StructOpt;

use synseq_core::rational::Rational;
use synseq_core::time::{Position, RationalTime, Tempo};
use synseq_core::timeline::{ObjectKind, Timeline};

use syn_seq::listing::{self, ListingError};
use syn_seq::output::sox::{SoxSink, SoxTarget};
use syn_seq::output::OutputStage;
use syn_seq::player::{Player, PlayerConfig, PlayerEvent};
use syn_seq::resolver::Resolver;
use syn_seq::scheduler::{Fadeout, LoopRegion, PlayOptions, ScheduleError, SchedulerConfig};
use syn_seq::synth::tone::ToneSynth;

#[derive(Debug, StructOpt)]
#[structopt(name = "synseq", about = "Playing timelines with exact timing")]
struct Opt {
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: usize,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Print the duration and contents of a listing.
    Info {
        /// The timeline listing.
        #[structopt(parse(from_os_str))]
        source: PathBuf,

        /// Ignore the sustain pedal when computing where notes end.
        #[structopt(long)]
        disable_hold: bool,

        /// Positions (in quarter notes) to convert to seconds.
        #[structopt(long = "at")]
        positions: Vec<Rational>,

        /// Times (in seconds) to convert to positions.
        #[structopt(long = "time")]
        times: Vec<Rational>,
    },
    /// Play a listing on the speakers or render it to a file.
    Play {
        /// The timeline listing.
        #[structopt(parse(from_os_str))]
        source: PathBuf,

        /// Output file (any sox-supported format). Music is played directly if not given.
        #[structopt(short, long, parse(from_os_str))]
        output: Option<PathBuf>,

        #[structopt(long, default_value = "44100")]
        sample_rate: u32,

        /// Start position in quarter notes.
        #[structopt(long)]
        from: Option<Rational>,

        /// Loop back to this position, in quarter notes.
        #[structopt(long)]
        loop_start: Option<Rational>,

        /// End of the loop, the end of the song if not given.
        #[structopt(long)]
        loop_end: Option<Rational>,

        /// Number of passes through the loop, endless if not given.
        #[structopt(long)]
        loop_count: Option<u32>,

        /// Fade out over this many seconds.
        #[structopt(long)]
        fadeout: Option<Rational>,

        #[structopt(long, default_value = "10")]
        fadeout_steps: u32,

        /// Ignore the sustain pedal when computing where notes end.
        #[structopt(long)]
        disable_hold: bool,
    },
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Could not read {}: {}", path.display(), source))]
    Read { path: PathBuf, source: io::Error },
    #[snafu(display("{}: {}", path.display(), source))]
    Listing { path: PathBuf, source: ListingError },
    #[snafu(display("Cannot play: {}", source))]
    Schedule { source: ScheduleError },
    #[snafu(display("Audio output failed: {}", source))]
    Output { source: io::Error },
}

fn main() {
    let opt = Opt::from_args();

    let level = match opt.verbose {
        0 => log::Level::Info,
        1 => log::Level::Debug,
        _ => log::Level::Trace,
    };
    simple_logger::init_with_level(level).unwrap();

    let result = match opt.command {
        Command::Info {
            source,
            disable_hold,
            positions,
            times,
        } => print_info(&source, disable_hold, &positions, &times),
        Command::Play {
            source,
            output,
            sample_rate,
            from,
            loop_start,
            loop_end,
            loop_count,
            fadeout,
            fadeout_steps,
            disable_hold,
        } => {
            let looping = if loop_start.is_some() || loop_end.is_some() || loop_count.is_some() {
                Some(LoopRegion {
                    start: Position::quarters(loop_start.unwrap_or_else(Rational::zero)),
                    end: loop_end.map(Position::quarters),
                    count: loop_count,
                })
            } else {
                None
            };
            let options = PlayOptions {
                from: from.map(Position::quarters),
                looping,
                fadeout: fadeout.map(|seconds| Fadeout {
                    steps: fadeout_steps,
                    start_offset: RationalTime::ZERO,
                    duration: RationalTime::seconds(seconds),
                }),
            };
            let config = PlayerConfig {
                sample_rate,
                scheduler: SchedulerConfig {
                    disable_hold,
                    ..SchedulerConfig::default()
                },
                ..PlayerConfig::default()
            };
            play(&source, output.as_deref(), config, options)
        }
    };
    if let Err(err) = result {
        error!("{}", err);
        std::process::exit(1);
    }
}

fn load(path: &Path) -> Result<Timeline, Error> {
    let source = std::fs::read_to_string(path).context(Read { path })?;
    listing::parse(&source).context(Listing { path })
}

fn print_info(
    path: &Path,
    disable_hold: bool,
    positions: &[Rational],
    times: &[Rational],
) -> Result<(), Error> {
    let timeline = load(path)?;
    let resolver = Resolver::new(&timeline, Tempo::default(), disable_hold);

    let count = |predicate: fn(&ObjectKind) -> bool| {
        timeline
            .objects()
            .iter()
            .filter(|object| predicate(&object.kind))
            .count()
    };
    info!(
        "{} objects: {} notes, {} tempo changes, {} controller changes",
        timeline.len(),
        count(ObjectKind::is_note),
        count(|kind| matches!(kind, ObjectKind::Tempo(_))),
        count(|kind| matches!(kind, ObjectKind::Controller { .. })),
    );
    let finish = resolver.finish();
    info!(
        "last sound ends at {} after {} ({:.3} seconds)",
        finish.position,
        finish.time,
        finish.time.to_f64()
    );
    for position in positions {
        let position = Position::quarters(*position);
        info!("{} is played at {}", position, resolver.time_at(position));
    }
    for time in times {
        let time = RationalTime::seconds(*time);
        info!("{} is at {}", time, resolver.position_at(time));
    }
    Ok(())
}

fn play(
    path: &Path,
    outfile: Option<&Path>,
    config: PlayerConfig,
    options: PlayOptions,
) -> Result<(), Error> {
    let timeline = Arc::new(load(path)?);
    let sample_rate = config.sample_rate;
    let target = match outfile {
        Some(outfile) => SoxTarget::File(outfile),
        None => SoxTarget::Play,
    };
    let sox = SoxSink::new(sample_rate, target).context(Output)?;

    let (mut player, stage) = Player::new(ToneSynth::new(sample_rate), config);
    player.play(timeline, options).context(Schedule)?;

    let realtime = outfile.is_none();
    let output = thread::spawn(move || run_output(stage, sox, realtime));

    let mut finished = false;
    while !finished {
        for event in player.step() {
            match event {
                PlayerEvent::MarkerReached { name, .. } => info!("reached marker {}", name),
                PlayerEvent::Finished => finished = true,
                PlayerEvent::QueueFull | PlayerEvent::QueueReady | PlayerEvent::Status { .. } => {}
            }
        }
        if player.is_throttled() || !player.is_busy() {
            thread::sleep(Duration::from_millis(2));
        }
    }
    info!("finished after {}", player.now());
    player.release();

    output
        .join()
        .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "output thread panicked")))
        .context(Output)
}

/// Drives the output stage the way an audio callback would, writing to sox.
///
/// When rendering to a file only the frames taken from the queue are written, so the file does
/// not contain the silence of buffer underruns.
fn run_output(mut stage: OutputStage, mut sox: SoxSink, realtime: bool) -> io::Result<()> {
    let mut left = vec![0.0; 1024];
    let mut right = vec![0.0; 1024];
    while !stage.is_released() {
        let frames = stage.process(&mut left, &mut right);
        if realtime {
            sox.write(&left, &right);
        } else if frames > 0 {
            sox.write(&left[..frames], &right[..frames]);
        } else {
            thread::sleep(Duration::from_millis(1));
        }
    }
    debug!("output released after {} frames", stage.consumed_frames());
    sox.finish()
}
