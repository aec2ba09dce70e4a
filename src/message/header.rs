//! Header block of the submitted message

use std::borrow::Cow;
use std::fmt::{self, Display, Formatter};

/// Headers the relay looks at
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum HeaderKind {
    From,
    To,
    Cc,
    Bcc,
    Date,
    Other,
}

impl HeaderKind {
    const PREFIXES: [(&'static [u8], HeaderKind); 5] = [
        (b"From:", HeaderKind::From),
        (b"To:", HeaderKind::To),
        (b"Cc:", HeaderKind::Cc),
        (b"Bcc:", HeaderKind::Bcc),
        (b"Date:", HeaderKind::Date),
    ];

    /// Tags a header line by its case-insensitive field name
    pub fn classify(line: &[u8]) -> HeaderKind {
        HeaderKind::PREFIXES
            .iter()
            .find(|(prefix, _)| {
                line.get(..prefix.len())
                    .map_or(false, |head| head.eq_ignore_ascii_case(prefix))
            })
            .map_or(HeaderKind::Other, |&(_, kind)| kind)
    }
}

/// One header, continuation lines included, kept byte for byte
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct HeaderLine {
    kind: HeaderKind,
    text: Vec<u8>,
}

impl HeaderLine {
    /// Wraps the raw header text
    pub fn new<T: Into<Vec<u8>>>(text: T) -> HeaderLine {
        let text = text.into();
        HeaderLine {
            kind: HeaderKind::classify(&text),
            text,
        }
    }

    pub fn kind(&self) -> HeaderKind {
        self.kind
    }

    /// Full text, continuations joined with CRLF
    pub fn text(&self) -> &[u8] {
        &self.text
    }

    /// Everything after the first colon, decoded for address parsing
    pub fn value(&self) -> Cow<'_, str> {
        match self.text.iter().position(|&b| b == b':') {
            Some(colon) => String::from_utf8_lossy(&self.text[colon + 1..]),
            None => Cow::Borrowed(""),
        }
    }
}

impl Display for HeaderLine {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.text))
    }
}

/// Inserts a CR before every LF that introduces a folded continuation
pub fn fold_crlf(block: &[u8]) -> Vec<u8> {
    let mut folded = Vec::with_capacity(block.len() + 16);
    for (i, &b) in block.iter().enumerate() {
        if b == b'\n'
            && matches!(block.get(i + 1), Some(b' ') | Some(b'\t'))
            && folded.last() != Some(&b'\r')
        {
            folded.push(b'\r');
        }
        folded.push(b);
    }
    folded
}

/// Breaks a folded header block into individual headers
fn split_headers(folded: &[u8]) -> Vec<HeaderLine> {
    let mut headers: Vec<Vec<u8>> = Vec::new();
    for line in folded.split(|&b| b == b'\n') {
        if let Some(b' ') | Some(b'\t') = line.first() {
            if let Some(last) = headers.last_mut() {
                last.push(b'\n');
                last.extend_from_slice(line);
                continue;
            }
        }
        headers.push(line.to_vec());
    }
    headers.into_iter().map(HeaderLine::new).collect()
}

/// Input lines with LF or CRLF terminators removed
fn input_lines(input: &[u8]) -> impl Iterator<Item = &[u8]> {
    let input = input.strip_suffix(b"\n").unwrap_or(input);
    input
        .split(|&b| b == b'\n')
        .filter(move |_| !input.is_empty())
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}

/// Message as read from the input: headers, then raw body lines
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct RawMessage {
    pub headers: Vec<HeaderLine>,
    pub body: Vec<Vec<u8>>,
}

impl RawMessage {
    /// Splits the input at the first empty line.
    ///
    /// Input without an empty line is all headers.
    pub fn parse(input: &[u8]) -> RawMessage {
        let mut lines = input_lines(input);
        let mut block: Vec<&[u8]> = Vec::new();
        for line in lines.by_ref() {
            if line.is_empty() {
                break;
            }
            block.push(line);
        }

        let headers = if block.is_empty() {
            Vec::new()
        } else {
            split_headers(&fold_crlf(&block.join(&b'\n')))
        };
        RawMessage {
            headers,
            body: lines.map(<[u8]>::to_vec).collect(),
        }
    }
}
