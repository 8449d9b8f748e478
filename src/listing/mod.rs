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

//! A plain text form of timelines, one object per line.
//!
//! ```text
//! # position kind arguments...
//! 0    tempo 120
//! 0    cc 0 64 127
//! 0    note 0 60 100 1/2
//! 3/2  bend 0 -2048
//! 2.5  sysex 0xF07E7F0901F7
//! 4    end
//! ```
//!
//! Positions and lengths are quarter notes, written as integers, fractions or decimals. The
//! objects may appear in any order, they are sorted canonically when the timeline is built.
//!
//! | kind          | arguments                               |
//! |---------------|-----------------------------------------|
//! | `tempo`       | beats per minute                        |
//! | `note`        | channel, pitch, velocity, length        |
//! | `cc`          | channel, controller, value              |
//! | `program`     | channel, program                        |
//! | `bend`        | channel, value in `-8192..=8191`        |
//! | `pressure`    | channel, value                          |
//! | `keypressure` | channel, pitch, value                   |
//! | `timesig`     | numerator, denominator                  |
//! | `keysig`      | sharps (negative for flats), `major` or `minor` |
//! | `sysex`       | hex bytes                               |
//! | `meta`        | type, hex bytes                         |
//! | `end`         |                                         |

pub mod lexer;

use logos::Logos;
use snafu::Snafu;

use synseq_core::rational::{Int, ParseRationalError, Rational};
use synseq_core::time::{Position, Tempo};
use synseq_core::timeline::{ObjectKind, Timeline, TimelineError};

use self::lexer::Token;

#[derive(Debug, PartialEq, Snafu)]
pub enum ListingError {
    #[snafu(display("line {}: cannot read {:?}", line, text))]
    Unreadable { line: usize, text: String },
    #[snafu(display("line {}: expected {}, found {:?}", line, expected, found))]
    Unexpected {
        line: usize,
        expected: &'static str,
        found: String,
    },
    #[snafu(display("line {}: invalid number {}: {}", line, text, source))]
    InvalidNumber {
        line: usize,
        text: String,
        source: ParseRationalError,
    },
    #[snafu(display("line {}: {} must be {}, got {}", line, what, expected, value))]
    InvalidValue {
        line: usize,
        what: &'static str,
        expected: &'static str,
        value: Rational,
    },
    #[snafu(display(
        "line {}: {} must be an integer in {}..={}, got {}",
        line,
        what,
        min,
        max,
        value
    ))]
    OutOfRange {
        line: usize,
        what: &'static str,
        min: Int,
        max: Int,
        value: Rational,
    },
    #[snafu(display("line {}: odd number of hex digits in {}", line, text))]
    OddBytes { line: usize, text: String },
    #[snafu(display("line {}: unknown object kind {:?}", line, kind))]
    UnknownKind { line: usize, kind: String },
    #[snafu(display("line {}: missing {} for {}", line, what, kind))]
    MissingArgument {
        line: usize,
        what: &'static str,
        kind: String,
    },
    #[snafu(display("line {}: unexpected {:?} after {}", line, found, kind))]
    TrailingInput {
        line: usize,
        kind: String,
        found: String,
    },
    #[snafu(display("{}", source))]
    InvalidTimeline { source: TimelineError },
}

/// Read a timeline from its listing.
pub fn parse(source: &str) -> Result<Timeline, ListingError> {
    let mut objects = Vec::new();
    let mut lexer = Token::lexer(source);
    let mut line = 1;
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next();
        match token {
            Some(Token::Error) => {
                return Err(ListingError::Unreadable {
                    line,
                    text: lexer.slice().to_string(),
                })
            }
            Some(Token::Newline) | None => {
                if !tokens.is_empty() {
                    objects.push(parse_line(line, &tokens)?);
                    tokens.clear();
                }
                if token.is_none() {
                    break;
                }
                line += 1;
            }
            Some(token) => tokens.push((token, lexer.slice())),
        }
    }
    Timeline::from_kinds(objects).map_err(|source| ListingError::InvalidTimeline { source })
}

fn parse_line(line: usize, tokens: &[(Token, &str)]) -> Result<(Position, ObjectKind), ListingError> {
    let mut args = Args {
        line,
        kind: "position",
        tokens: tokens.iter(),
    };
    let position = args.number("a position")?;
    if position < Rational::zero() {
        return Err(ListingError::InvalidValue {
            line,
            what: "position",
            expected: "non-negative",
            value: position,
        });
    }
    let kind = args.word("an object kind")?;
    args.kind = kind;

    let object = match kind {
        "tempo" => {
            let bpm = args.number("beats per minute")?;
            if bpm <= Rational::zero() {
                return Err(ListingError::InvalidValue {
                    line,
                    what: "tempo",
                    expected: "positive",
                    value: bpm,
                });
            }
            ObjectKind::Tempo(Tempo::from_bpm(bpm))
        }
        "note" => ObjectKind::Note {
            channel: args.channel()?,
            pitch: args.seven_bit("pitch")?,
            velocity: args.seven_bit("velocity")?,
            length: args.length()?,
        },
        "cc" => ObjectKind::Controller {
            channel: args.channel()?,
            controller: args.seven_bit("controller")?,
            value: args.seven_bit("value")?,
        },
        "program" => ObjectKind::Program {
            channel: args.channel()?,
            program: args.seven_bit("program")?,
        },
        "bend" => ObjectKind::PitchBend {
            channel: args.channel()?,
            value: args.int("bend", -8192, 8191)? as i16,
        },
        "pressure" => ObjectKind::ChannelPressure {
            channel: args.channel()?,
            value: args.seven_bit("pressure")?,
        },
        "keypressure" => ObjectKind::KeyPressure {
            channel: args.channel()?,
            pitch: args.seven_bit("pitch")?,
            value: args.seven_bit("pressure")?,
        },
        "timesig" => ObjectKind::TimeSignature {
            numerator: args.int("numerator", 1, 255)? as u8,
            denominator: args.int("denominator", 1, 255)? as u8,
        },
        "keysig" => {
            let sharps = args.int("sharps", -7, 7)? as i8;
            let minor = match args.word("major or minor")? {
                "major" => false,
                "minor" => true,
                other => {
                    return Err(ListingError::Unexpected {
                        line,
                        expected: "major or minor",
                        found: other.to_string(),
                    })
                }
            };
            ObjectKind::KeySignature { sharps, minor }
        }
        "sysex" => ObjectKind::SysEx(args.bytes("sysex data")?),
        "meta" => ObjectKind::RawMeta {
            meta_type: args.int("meta type", 0, 255)? as u8,
            data: args.bytes("meta data")?,
        },
        "end" => ObjectKind::End,
        other => {
            return Err(ListingError::UnknownKind {
                line,
                kind: other.to_string(),
            })
        }
    };
    args.finish()?;
    Ok((Position::quarters(position), object))
}

/// The arguments of one line.
struct Args<'s, 't> {
    line: usize,
    kind: &'s str,
    tokens: std::slice::Iter<'t, (Token, &'s str)>,
}

impl<'s, 't> Args<'s, 't> {
    fn next(&mut self, what: &'static str) -> Result<(Token, &'s str), ListingError> {
        self.tokens
            .next()
            .copied()
            .ok_or_else(|| ListingError::MissingArgument {
                line: self.line,
                what,
                kind: self.kind.to_string(),
            })
    }

    fn expect(&mut self, token: Token, what: &'static str) -> Result<&'s str, ListingError> {
        match self.next(what)? {
            (found, text) if found == token => Ok(text),
            (_, text) => Err(ListingError::Unexpected {
                line: self.line,
                expected: what,
                found: text.to_string(),
            }),
        }
    }

    fn number(&mut self, what: &'static str) -> Result<Rational, ListingError> {
        let text = self.expect(Token::Number, what)?;
        text.parse().map_err(|source| ListingError::InvalidNumber {
            line: self.line,
            text: text.to_string(),
            source,
        })
    }

    fn int(&mut self, what: &'static str, min: Int, max: Int) -> Result<Int, ListingError> {
        let value = self.number(what)?;
        if value.denominator() != 1 || value.numerator() < min || value.numerator() > max {
            return Err(ListingError::OutOfRange {
                line: self.line,
                what,
                min,
                max,
                value,
            });
        }
        Ok(value.numerator())
    }

    fn seven_bit(&mut self, what: &'static str) -> Result<u8, ListingError> {
        Ok(self.int(what, 0, 127)? as u8)
    }

    fn channel(&mut self) -> Result<u8, ListingError> {
        Ok(self.int("channel", 0, 15)? as u8)
    }

    fn length(&mut self) -> Result<Position, ListingError> {
        let length = self.number("length")?;
        if length < Rational::zero() {
            return Err(ListingError::InvalidValue {
                line: self.line,
                what: "length",
                expected: "non-negative",
                value: length,
            });
        }
        Ok(Position::quarters(length))
    }

    fn word(&mut self, what: &'static str) -> Result<&'s str, ListingError> {
        self.expect(Token::Word, what)
    }

    fn bytes(&mut self, what: &'static str) -> Result<Vec<u8>, ListingError> {
        let text = self.expect(Token::Bytes, what)?;
        let digits = &text[2..];
        if digits.len() % 2 != 0 {
            return Err(ListingError::OddBytes {
                line: self.line,
                text: text.to_string(),
            });
        }
        Ok(digits
            .as_bytes()
            .chunks(2)
            .map(|pair| (hex_value(pair[0]) << 4) | hex_value(pair[1]))
            .collect())
    }

    fn finish(mut self) -> Result<(), ListingError> {
        match self.tokens.next() {
            Some((_, text)) => Err(ListingError::TrailingInput {
                line: self.line,
                kind: self.kind.to_string(),
                found: text.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Only called on digits the lexer accepted as hex.
fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use expect_test::{expect, Expect};

    fn check(input: &str, output: Expect) {
        let dump = match parse(input) {
            Ok(timeline) => timeline
                .objects()
                .iter()
                .map(|object| format!("{} {:?}\n", object.position, object.kind))
                .collect::<String>(),
            Err(err) => format!("{}\n", err),
        };
        output.assert_eq(&dump);
    }

    #[test]
    fn parses_all_kinds() {
        check(
            "# a short tune
3 end
0 tempo 90
0 timesig 3 4
0 keysig -2 minor
0 program 0 5
0 cc 0 7 100
0 note 0 60 100 1

1/2 bend 0 -512
1 note 0 64 90 0.5
1 sysex 0xF07E7F0901F7
1 meta 1 0x6869
",
            expect![[r#"
0q Tempo(Tempo { seconds_per_quarter: Rational { num: 2, denom: 3 } })
0q TimeSignature { numerator: 3, denominator: 4 }
0q KeySignature { sharps: -2, minor: true }
0q Program { channel: 0, program: 5 }
0q Controller { channel: 0, controller: 7, value: 100 }
0q Note { channel: 0, pitch: 60, velocity: 100, length: Position(Rational { num: 1, denom: 1 }) }
1/2q PitchBend { channel: 0, value: -512 }
1q Note { channel: 0, pitch: 64, velocity: 90, length: Position(Rational { num: 1, denom: 2 }) }
1q SysEx([240, 126, 127, 9, 1, 247])
1q RawMeta { meta_type: 1, data: [104, 105] }
3q End
"#]],
        );
    }

    #[test]
    fn data_entry_sorts_last() {
        check(
            "0 cc 0 6 12\n0 cc 0 101 0\n0 cc 0 100 0\n",
            expect![[r#"
0q Controller { channel: 0, controller: 101, value: 0 }
0q Controller { channel: 0, controller: 100, value: 0 }
0q Controller { channel: 0, controller: 6, value: 12 }
"#]],
        );
    }

    #[test]
    fn reports_line_numbers() {
        check(
            "0 tempo 120\n\n0 note 0 60\n",
            expect![[r#"
line 3: missing velocity for note
"#]],
        );
        check(
            "0 cc 0 7 200",
            expect![[r#"
line 1: value must be an integer in 0..=127, got 200
"#]],
        );
        check(
            "0 bend 0 1/2",
            expect![[r#"
line 1: bend must be an integer in -8192..=8191, got 1/2
"#]],
        );
        check(
            "0 chord 1",
            expect![[r#"
line 1: unknown object kind "chord"
"#]],
        );
        check(
            "0 end 5",
            expect![[r#"
line 1: unexpected "5" after end
"#]],
        );
        check(
            "end",
            expect![[r#"
line 1: expected a position, found "end"
"#]],
        );
        check(
            "0 cc ; 1",
            expect![[r#"
line 1: cannot read ";"
"#]],
        );
        check(
            "1/0 end",
            expect![[r#"
line 1: invalid number 1/0: denominator is zero
"#]],
        );
        check(
            "-1 end",
            expect![[r#"
line 1: position must be non-negative, got -1
"#]],
        );
        check(
            "0 tempo 0",
            expect![[r#"
line 1: tempo must be positive, got 0
"#]],
        );
        check(
            "0 sysex 0xF07",
            expect![[r#"
line 1: odd number of hex digits in 0xF07
"#]],
        );
    }
}
