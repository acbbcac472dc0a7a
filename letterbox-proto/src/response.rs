use std::collections::BTreeMap;

use bytes::BytesMut;
use tracing::warn;

use crate::parser;
use crate::tag::Tag;
use crate::types::{Fetch, ResponseCode};

/// Outcome of feeding bytes to an [`Accumulator`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Digest {
    /// The terminating tagged line (or greeting line) has been consumed.
    Complete,
    /// The input ended mid-line or mid-literal.
    NeedMore,
    /// The response did not match any expected form. Sticky: later input is
    /// not consumed.
    Failed,
}

/// Per-command incremental parse state.
///
/// One accumulator exists per in-flight command; bytes are appended with
/// [`digest`](Self::digest) in whatever chunks the transport produces. The
/// parse survives splits at any point, including inside a CRLF or a FETCH
/// literal. A response is complete when the line bearing the awaited tag
/// has been consumed; for the CONNECT sentinel, when the first untagged
/// line has.
#[derive(Debug)]
pub struct Accumulator {
    tag: Tag,
    greeting: bool,
    buffer: BytesMut,
    done: bool,
    error: bool,
    // FETCH block state: inside the parenthesized list, and the literal
    // currently being read by byte count.
    in_fetch: bool,
    raw_mode: bool,
    bytes_to_read: u64,
    current_id: u64,
    current_field: String,
    tagged: Vec<(ResponseCode, String)>,
    untagged: Vec<(ResponseCode, String)>,
    untagged_trailing: Vec<(ResponseCode, String)>,
    literals: Fetch,
}

impl Accumulator {
    pub fn new(tag: Tag) -> Self {
        let greeting = tag.as_str() == "CONNECT";
        Accumulator {
            tag,
            greeting,
            buffer: BytesMut::new(),
            done: false,
            error: false,
            in_fetch: false,
            raw_mode: false,
            bytes_to_read: 0,
            current_id: 0,
            current_field: String::new(),
            tagged: Vec::new(),
            untagged: Vec::new(),
            untagged_trailing: Vec::new(),
            literals: BTreeMap::new(),
        }
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    pub fn error(&self) -> bool {
        self.error
    }

    /// Tagged lines, in arrival order. Exactly one for a completed normal
    /// command, none for the connect greeting.
    pub fn tagged(&self) -> &[(ResponseCode, String)] {
        &self.tagged
    }

    /// Untagged lines whose keyword follows the `*`, in arrival order.
    pub fn untagged(&self) -> &[(ResponseCode, String)] {
        &self.untagged
    }

    /// Untagged lines whose keyword ends the line (`* 12 EXISTS`), in
    /// arrival order, with the numeric prefix as the data.
    pub fn untagged_trailing(&self) -> &[(ResponseCode, String)] {
        &self.untagged_trailing
    }

    /// Fetched literal bodies: message id to section label to raw bytes.
    pub fn literals(&self) -> &Fetch {
        &self.literals
    }

    pub fn into_literals(self) -> Fetch {
        self.literals
    }

    /// Bytes that arrived after the terminating line. Under pipelining they
    /// belong to the next in-flight command.
    pub fn take_remaining(&mut self) -> BytesMut {
        self.buffer.split()
    }

    /// Appends newly arrived bytes and advances the parse as far as they
    /// allow. Empty reads after completion do not reopen the accumulator.
    pub fn digest(&mut self, data: &[u8]) -> Digest {
        if self.error {
            return Digest::Failed;
        }
        if self.done {
            return Digest::Complete;
        }
        self.buffer.extend_from_slice(data);
        self.advance()
    }

    fn advance(&mut self) -> Digest {
        loop {
            if self.raw_mode {
                if let Some(digest) = self.read_literal() {
                    return digest;
                }
            }

            let line = match self.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => return Digest::NeedMore,
                Err(()) => {
                    self.error = true;
                    return Digest::Failed;
                }
            };

            if self.in_fetch {
                if line.starts_with(')') {
                    self.in_fetch = false;
                    continue;
                }
                match self.scan_fetch_pairs(&line) {
                    Ok(closed) => {
                        if closed {
                            self.in_fetch = false;
                        }
                    }
                    Err(()) => return self.fail(&line),
                }
                continue;
            }

            if line.starts_with('*') {
                if let Ok((_, (id, pairs))) = parser::fetch_start(&line) {
                    self.current_id = id;
                    self.in_fetch = true;
                    match self.scan_fetch_pairs(pairs) {
                        Ok(closed) => {
                            if closed {
                                self.in_fetch = false;
                            }
                        }
                        Err(()) => return self.fail(&line),
                    }
                } else if let Ok((_, (code, data))) = parser::untagged_leading(&line) {
                    self.untagged.push((code, data.to_string()));
                } else if let Some((code, data)) = parser::untagged_trailing(&line) {
                    self.untagged_trailing.push((code, data.to_string()));
                } else {
                    return self.fail(&line);
                }

                // The greeting carries no tagged line; its first untagged
                // line is the terminator.
                if self.greeting {
                    self.done = true;
                    return Digest::Complete;
                }
                continue;
            }

            if line.starts_with(self.tag.as_str()) {
                return match parser::tagged_line(&line, self.tag.as_str()) {
                    Ok((_, (code, data))) => {
                        self.tagged.push((code, data.to_string()));
                        self.done = true;
                        Digest::Complete
                    }
                    Err(_) => self.fail(&line),
                };
            }

            return self.fail(&line);
        }
    }

    // Consume literal bytes by count, across any number of chunks and
    // regardless of embedded CRLFs. Returns None once the literal is done.
    fn read_literal(&mut self) -> Option<Digest> {
        if self.buffer.is_empty() {
            return Some(Digest::NeedMore);
        }
        let want = usize::try_from(self.bytes_to_read).unwrap_or(usize::MAX);
        let take = want.min(self.buffer.len());
        let chunk = self.buffer.split_to(take);
        let field = self.current_field.clone();
        self.store(&field, &chunk);
        self.bytes_to_read -= take as u64;
        if self.bytes_to_read > 0 {
            return Some(Digest::NeedMore);
        }
        self.raw_mode = false;
        None
    }

    // Walk the inline portion of a FETCH block: `field NIL`, `field {N}`
    // introducing a literal, or `field {N} <data>` with the bytes inline.
    // Returns whether the closing `)` was seen on this line; a pending
    // literal switches the accumulator into raw mode.
    fn scan_fetch_pairs(&mut self, text: &str) -> Result<bool, ()> {
        let mut rest = text.trim_start();
        loop {
            if rest.is_empty() {
                return Ok(false);
            }
            if rest.starts_with(')') {
                return Ok(true);
            }

            let (after, field) = match parser::fetch_field(rest) {
                Ok(parsed) => parsed,
                Err(_) => {
                    warn!(item = rest.split(' ').next().unwrap_or(rest),
                          "skipping unrecognized fetch item");
                    match rest.split_once(' ') {
                        Some((_, tail)) => {
                            rest = tail.trim_start();
                            continue;
                        }
                        None => return Ok(false),
                    }
                }
            };
            let value = after.strip_prefix(' ').unwrap_or(after);

            if let Some(tail) = value.strip_prefix("NIL") {
                rest = tail.trim_start();
                continue;
            }

            if let Some(tail) = value.strip_prefix('{') {
                let Some((size, tail)) = tail.split_once('}') else {
                    warn!("failed to parse fetch response: unterminated literal size");
                    return Err(());
                };
                let Ok(size) = size.parse::<u64>() else {
                    warn!(size, "failed to parse fetch literal size: not a number");
                    return Err(());
                };
                match tail.strip_prefix(' ') {
                    // content fits on the current line
                    Some(data) if !data.is_empty() => {
                        let bytes = data.as_bytes();
                        let take = usize::try_from(size).unwrap_or(usize::MAX).min(bytes.len());
                        self.store(field, &bytes[..take]);
                        match std::str::from_utf8(&bytes[take..]) {
                            Ok(tail) => rest = tail.trim_start(),
                            Err(_) => return Err(()),
                        }
                    }
                    // literal body follows after the CRLF
                    _ => {
                        if size > 0 {
                            self.current_field = field.to_string();
                            self.bytes_to_read = size;
                            self.raw_mode = true;
                        }
                        return Ok(false);
                    }
                }
                continue;
            }

            // value form not recognized; skip it
            warn!(field, "skipping fetch item without NIL or literal value");
            match value.split_once(' ') {
                Some((_, tail)) => rest = tail.trim_start(),
                None => return Ok(false),
            }
        }
    }

    fn store(&mut self, field: &str, data: &[u8]) {
        self.literals
            .entry(self.current_id)
            .or_default()
            .entry(field.to_string())
            .or_default()
            .extend_from_slice(data);
    }

    // Pop one CRLF-terminated line off the buffer, without the CRLF.
    fn next_line(&mut self) -> Result<Option<String>, ()> {
        let Some(pos) = self.buffer.windows(2).position(|w| w == b"\r\n") else {
            return Ok(None);
        };
        let line = self.buffer.split_to(pos + 2);
        match std::str::from_utf8(&line[..pos]) {
            Ok(line) => Ok(Some(line.to_string())),
            Err(_) => {
                warn!("response line is not valid UTF-8");
                Err(())
            }
        }
    }

    fn fail(&mut self, line: &str) -> Digest {
        warn!(line, "unhandled response line");
        self.error = true;
        Digest::Failed
    }
}
