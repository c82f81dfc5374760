//! Splitting of a concatenated PGN stream into single-game records.
//!
//! Lichess-style exports separate the tag section from the movetext with one
//! blank line and games from each other with another, so a record ends at the
//! second blank line since it started. Text after the last complete record is
//! dropped.

use std::io::{self, BufRead};

/// Marker line of a game that ended without being played out.
pub const ABANDONED_MARKER: &str = "[Termination \"Abandoned\"]";

/// Lazy iterator over the game records of a PGN stream.
pub struct RecordSplitter<R> {
    reader: R,
    ignore_abandoned: bool,
    line: Vec<u8>,
    record: String,
    blank_lines: u32,
    invalid: bool,
}

impl<R: BufRead> RecordSplitter<R> {
    pub fn new(reader: R, ignore_abandoned: bool) -> Self {
        RecordSplitter {
            reader,
            ignore_abandoned,
            line: Vec::with_capacity(256),
            record: String::new(),
            blank_lines: 0,
            invalid: false,
        }
    }

    fn reset(&mut self) {
        self.record.clear();
        self.blank_lines = 0;
        self.invalid = false;
    }
}

impl<R: BufRead> Iterator for RecordSplitter<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Some(Err(e)),
            }
            let (is_marker, is_blank) = {
                let line = String::from_utf8_lossy(&self.line);
                let content = line.trim_end_matches(['\n', '\r']);
                (content == ABANDONED_MARKER, content.trim().is_empty())
            };

            if is_marker {
                self.invalid = true;
                continue;
            }
            if is_blank {
                self.blank_lines += 1;
                if self.blank_lines == 2 {
                    let keep = !(self.invalid && self.ignore_abandoned);
                    let record = std::mem::take(&mut self.record);
                    self.reset();
                    if keep {
                        return Some(Ok(record));
                    }
                    continue;
                }
            }
            self.record.push_str(&String::from_utf8_lossy(&self.line));
        }
    }
}
