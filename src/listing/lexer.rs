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

use logos::Logos;

pub use logos::Span;

#[derive(Logos, Debug, PartialEq, Clone, Copy)]
#[logos(subpattern digits = r"[0-9]+")]
pub enum Token {
    /// Integers, fractions and decimals, all read exactly.
    #[regex(r"[+-]?(?&digits)/(?&digits)")]
    #[regex(r"[+-]?(?&digits)(\.(?&digits))?([eE][+-]?(?&digits))?")]
    Number,
    /// Hex encoded bytes.
    #[regex("0x[0-9a-fA-F]*")]
    Bytes,
    #[regex("[a-zA-Z_][a-zA-Z0-9_]*")]
    Word,
    #[token("\n")]
    Newline,

    #[error]
    #[regex(r"[ \t\r\f]+", logos::skip)]
    #[regex(r"#[^\n]*", logos::skip)]
    Error,
}

#[cfg(test)]
mod tests {
    use super::Token;
    use expect_test::{expect, Expect};
    use logos::Logos;

    fn check(input: &str, output: Expect) {
        let lexer = Token::lexer(input);
        let tokens = lexer.spanned().collect::<Vec<_>>();
        let token_str = format!("{:?}", tokens);
        output.assert_eq(&token_str);
    }

    #[test]
    fn note_line() {
        check(
            "0 note 0 60 100 1/2\n",
            expect![[
                r#"[(Number, 0..1), (Word, 2..6), (Number, 7..8), (Number, 9..11), (Number, 12..15), (Number, 16..19), (Newline, 19..20)]"#
            ]],
        );
    }

    #[test]
    fn numbers() {
        check(
            "-3 +1/4 2.5e-2 1e3",
            expect![[r#"[(Number, 0..2), (Number, 3..7), (Number, 8..14), (Number, 15..18)]"#]],
        );
    }

    #[test]
    fn bytes_and_comments() {
        check(
            "1.5 sysex 0xF07E # comment",
            expect![[r#"[(Number, 0..3), (Word, 4..9), (Bytes, 10..16)]"#]],
        );
    }

    #[test]
    fn garbage() {
        check(
            "0 cc ; 1",
            expect![[r#"[(Number, 0..1), (Word, 2..4), (Error, 5..6), (Number, 7..8)]"#]],
        );
    }
}
