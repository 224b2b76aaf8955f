//! Character-at-a-time UTF-8 reading over an arbitrary byte source.

use std::io::{self, BufRead, BufReader, ErrorKind, Read};

/// Sequential character reader used by the lexer.
///
/// Decodes UTF-8 incrementally so arbitrarily large inputs (files, stdin)
/// are scanned without being loaded into memory first.
pub struct CharSource {
    inner: BufReader<Box<dyn Read + Send>>,
}

impl CharSource {
    pub fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Reads the next character, or `None` at end of stream.
    pub fn next_char(&mut self) -> io::Result<Option<char>> {
        let lead = loop {
            let buf = match self.inner.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            match buf.first() {
                Some(&byte) => break byte,
                None => return Ok(None),
            }
        };
        self.inner.consume(1);

        let width = utf8_width(lead).ok_or_else(|| invalid_utf8(lead))?;
        let mut bytes = [lead, 0, 0, 0];
        if width > 1 {
            self.inner.read_exact(&mut bytes[1..width])?;
        }

        std::str::from_utf8(&bytes[..width])
            .map(|s| s.chars().next())
            .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))
    }

    /// Reads everything that remains in the source.
    pub fn read_remaining(&mut self) -> io::Result<String> {
        let mut text = String::new();
        self.inner.read_to_string(&mut text)?;
        Ok(text)
    }
}

/// Returns the encoded length of a UTF-8 sequence given its lead byte.
fn utf8_width(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7F => Some(1),
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        _ => None,
    }
}

fn invalid_utf8(lead: u8) -> io::Error {
    io::Error::new(
        ErrorKind::InvalidData,
        format!("stream did not contain valid UTF-8 (unexpected byte 0x{lead:02x})"),
    )
}
