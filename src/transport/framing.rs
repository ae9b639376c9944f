/*
 * SHM RELAY - COMMAND FRAMING
 * =================================================================
 * Component Name: src/transport/framing.rs
 * Core Responsibility: Turn a byte stream of client commands into complete frames, however the network chunks it.
 * Design Pattern: State Machine (AwaitingHeader -> AwaitingBody -> Complete)
 * =================================================================
 */

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{RelayError, RelayResult};

/// Ceiling on a declared WRITE body. Bodies above the buffer capacity but
/// below this are still read in full and answered with an error.
pub const MAX_FRAME_BODY: usize = 64 * 1024;

/// A header line longer than this without a newline cannot be valid.
pub const MAX_HEADER_LEN: usize = 64;

pub const SYNC_UPDATE_CMD: &str = "SYNC_UPDATE";

/// Client -> host commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Read,
    Write(Bytes),
    /// Legacy marker: the client finished writing, refresh your view.
    Done,
    /// Legacy marker: refresh your view.
    SyncUpdate,
}

impl Command {
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Read => "READ",
            Command::Write(_) => "WRITE",
            Command::Done => "DONE",
            Command::SyncUpdate => SYNC_UPDATE_CMD,
        }
    }

    /// Full wire form of the frame.
    pub fn encode(&self) -> Bytes {
        match self {
            Command::Write(payload) => {
                let header = format!("WRITE {}\n", payload.len());
                let mut out = BytesMut::with_capacity(header.len() + payload.len() + 1);
                out.put_slice(header.as_bytes());
                out.put_slice(payload);
                out.put_u8(b'\n');
                out.freeze()
            }
            other => Bytes::from(format!("{}\n", other.verb())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    AwaitingHeader,
    /// Header parsed; `len` payload bytes plus the trailing newline to go.
    AwaitingBody { len: usize },
}

/// Incremental decoder. Bytes go in through [`FrameDecoder::buffer_mut`] or
/// [`FrameDecoder::extend`], complete commands come out of [`FrameDecoder::decode`].
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    state: DecodeState,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            state: DecodeState::AwaitingHeader,
        }
    }

    /// Receive buffer, for `AsyncReadExt::read_buf`.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// True when no partial frame is pending.
    pub fn is_idle(&self) -> bool {
        self.state == DecodeState::AwaitingHeader && self.buf.is_empty()
    }

    /// Body bytes still missing for the WRITE in progress (newline included).
    pub fn body_remaining(&self) -> Option<usize> {
        match self.state {
            DecodeState::AwaitingBody { len } => Some((len + 1).saturating_sub(self.buf.len())),
            DecodeState::AwaitingHeader => None,
        }
    }

    /// Next complete command, `Ok(None)` if more bytes are needed.
    /// An error means the stream can no longer be trusted.
    pub fn decode(&mut self) -> RelayResult<Option<Command>> {
        loop {
            match self.state {
                DecodeState::AwaitingHeader => {
                    let Some(pos) = self.buf.iter().position(|b| *b == b'\n') else {
                        if self.buf.len() > MAX_HEADER_LEN {
                            return Err(RelayError::ProtocolViolation(format!(
                                "no command terminator within {} bytes",
                                MAX_HEADER_LEN
                            )));
                        }
                        return Ok(None);
                    };

                    let line = self.buf.split_to(pos + 1);
                    let header = std::str::from_utf8(&line[..pos])
                        .map_err(|_| RelayError::ProtocolViolation("command line is not UTF-8".into()))?
                        .trim();

                    if header.is_empty() {
                        continue;
                    }

                    match parse_header(header)? {
                        Header::Complete(cmd) => return Ok(Some(cmd)),
                        Header::Write { len } => self.state = DecodeState::AwaitingBody { len },
                    }
                }
                DecodeState::AwaitingBody { len } => {
                    if self.buf.len() < len + 1 {
                        return Ok(None);
                    }

                    let body = self.buf.split_to(len).freeze();
                    let terminator = self.buf.split_to(1);
                    if terminator[0] != b'\n' {
                        return Err(RelayError::ProtocolViolation(format!(
                            "WRITE body of {} bytes not followed by newline",
                            len
                        )));
                    }

                    self.state = DecodeState::AwaitingHeader;
                    return Ok(Some(Command::Write(body)));
                }
            }
        }
    }
}

enum Header {
    Complete(Command),
    Write { len: usize },
}

fn parse_header(header: &str) -> RelayResult<Header> {
    match header {
        "READ" => return Ok(Header::Complete(Command::Read)),
        "DONE" => return Ok(Header::Complete(Command::Done)),
        SYNC_UPDATE_CMD => return Ok(Header::Complete(Command::SyncUpdate)),
        _ => {}
    }

    let Some(raw_len) = header.strip_prefix("WRITE ") else {
        return Err(RelayError::ProtocolViolation(format!("unknown command: {:?}", header)));
    };

    let len = raw_len
        .trim()
        .parse::<usize>()
        .map_err(|_| RelayError::ProtocolViolation(format!("bad WRITE length: {:?}", raw_len)))?;

    if len > MAX_FRAME_BODY {
        return Err(RelayError::ProtocolViolation(format!(
            "WRITE length {} exceeds frame ceiling {}",
            len, MAX_FRAME_BODY
        )));
    }
    Ok(Header::Write { len })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut FrameDecoder) -> Vec<Command> {
        let mut out = Vec::new();
        while let Some(cmd) = decoder.decode().unwrap() {
            out.push(cmd);
        }
        out
    }

    #[test]
    fn simple_commands() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"READ\nDONE\nSYNC_UPDATE\n");
        assert_eq!(drain(&mut decoder), vec![Command::Read, Command::Done, Command::SyncUpdate]);
        assert!(decoder.is_idle());
    }

    #[test]
    fn write_waits_for_body_and_terminator() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"WRITE 11\nhello");
        assert_eq!(decoder.decode().unwrap(), None);
        assert_eq!(decoder.body_remaining(), Some(7));

        decoder.extend(b"\nworld");
        // 11 payload bytes are in, the terminator is not.
        assert_eq!(decoder.decode().unwrap(), None);
        assert_eq!(decoder.body_remaining(), Some(1));

        decoder.extend(b"\n");
        assert_eq!(
            decoder.decode().unwrap(),
            Some(Command::Write(Bytes::from_static(b"hello\nworld")))
        );
        assert!(decoder.is_idle());
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let wire = Command::Write(Bytes::from_static("héllo".as_bytes())).encode();
        let mut decoder = FrameDecoder::new();
        let mut seen = Vec::new();
        for byte in wire.iter() {
            decoder.extend(&[*byte]);
            seen.extend(drain(&mut decoder));
        }
        assert_eq!(seen, vec![Command::Write(Bytes::from_static("héllo".as_bytes()))]);
    }

    #[test]
    fn header_and_body_in_one_chunk_followed_by_read() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"WRITE 2\nhi\nREAD\n");
        assert_eq!(
            drain(&mut decoder),
            vec![Command::Write(Bytes::from_static(b"hi")), Command::Read]
        );
    }

    #[test]
    fn empty_write_and_blank_lines() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"\r\n\nWRITE 0\n\nREAD\r\n");
        assert_eq!(
            drain(&mut decoder),
            vec![Command::Write(Bytes::new()), Command::Read]
        );
    }

    #[test]
    fn malformed_frames_are_violations() {
        let cases: [&[u8]; 5] = [
            b"DELETE\n",
            b"WRITE abc\n",
            b"WRITE 99999999\n",
            b"WRITE 2\nhiX",
            &[b'R'; MAX_HEADER_LEN + 1],
        ];
        for wire in cases {
            let mut decoder = FrameDecoder::new();
            decoder.extend(wire);
            assert!(
                matches!(decoder.decode(), Err(RelayError::ProtocolViolation(_))),
                "{:?} should be rejected",
                String::from_utf8_lossy(wire)
            );
        }
    }
}
