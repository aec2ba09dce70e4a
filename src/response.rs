//! SMTP response, containing a three digit return code and the reply text
//!
//! A reply may span several lines; every line but the last carries a `-` right
//! after the code.

use std::fmt::{self, Display, Formatter};

use nom::{
    bytes::complete::take_while_m_n,
    character::complete::one_of,
    combinator::{map_res, opt, rest},
    sequence::tuple,
    IResult,
};

/// First digit of the reply code
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Severity {
    /// 2yz
    PositiveCompletion,
    /// 3yz
    PositiveIntermediate,
    /// 4yz
    TransientNegativeCompletion,
    /// 5yz
    PermanentNegativeCompletion,
    /// Anything else, including replies that could not be parsed
    Unknown,
}

impl Severity {
    fn from_code(code: u16) -> Severity {
        match code / 100 {
            2 => Severity::PositiveCompletion,
            3 => Severity::PositiveIntermediate,
            4 => Severity::TransientNegativeCompletion,
            5 => Severity::PermanentNegativeCompletion,
            _ => Severity::Unknown,
        }
    }
}

/// Whether `line` announces that more lines of the same reply follow
pub fn is_continuation(line: &str) -> bool {
    line.len() >= 4 && line.as_bytes()[3] == b'-'
}

/// Splits one reply line into code, separator and text
fn reply_line(input: &str) -> IResult<&str, (u16, Option<char>, &str)> {
    tuple((
        map_res(take_while_m_n(3, 3, |c: char| c.is_ascii_digit()), str::parse),
        opt(one_of(" -")),
        rest,
    ))(input)
}

/// Contains an SMTP reply, with separated code and message
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Response {
    /// Reply code of the final line, `0` when it could not be read
    pub code: u16,
    /// Raw reply lines, terminators stripped
    pub lines: Vec<String>,
    malformed: bool,
}

impl Response {
    /// Builds a reply from the lines read off the wire.
    ///
    /// The code and status come from the final line. A final line shorter than
    /// four characters, or without a numeric code, marks the whole reply as
    /// malformed; malformed replies are never positive.
    pub fn from_lines(lines: Vec<String>) -> Response {
        let last = lines.last().map(String::as_str).unwrap_or("");
        let (code, malformed) = match reply_line(last) {
            Ok((_, (code, Some(_), _))) if last.len() >= 4 => (code, false),
            Ok((_, (code, _, _))) => (code, true),
            Err(_) => (0, true),
        };
        Response {
            code,
            lines,
            malformed,
        }
    }

    /// Severity derived from the code
    pub fn severity(&self) -> Severity {
        if self.malformed {
            Severity::Unknown
        } else {
            Severity::from_code(self.code)
        }
    }

    /// Tells if the reply is a 2yz completion
    pub fn is_positive(&self) -> bool {
        self.severity() == Severity::PositiveCompletion
    }

    /// Tells if the reply is a 3yz request for more input
    pub fn is_intermediate(&self) -> bool {
        self.severity() == Severity::PositiveIntermediate
    }

    /// Tells if the response has the given code
    pub fn has_code(&self, code: u16) -> bool {
        self.code == code
    }

    /// Tells if the reply violated the line format
    pub fn is_malformed(&self) -> bool {
        self.malformed
    }

    /// Returns only the first raw line of the reply
    pub fn first_line(&self) -> Option<&str> {
        self.lines.first().map(String::as_str)
    }

    /// Returns the last raw line of the reply, the one carrying the status
    pub fn last_line(&self) -> &str {
        self.lines.last().map(String::as_str).unwrap_or("")
    }

    /// Text of the last line, after the code and separator
    pub fn text(&self) -> &str {
        let last = self.last_line();
        match reply_line(last) {
            Ok((_, (_, Some(_), text))) => text,
            _ => last,
        }
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.last_line())
    }
}
