/*
 * SHM RELAY - TRANSPORT LAYER ABSTRACTION
 * =================================================================
 * Component Name: src/transport/mod.rs
 * Core Responsibility: Wire messages of the relay (handshake, responses) and the common read/write seam.
 * Design Pattern: Adapter
 * =================================================================
 */

use std::fmt;
use std::sync::Arc;

use crate::buffer::{LocalBuffer, BUF_SIZE, DATA_OFFSET, LOCK_OFFSET};
use crate::error::{RelayError, RelayResult};

pub mod framing;
pub mod relay_client;
pub mod tcp_server;

pub use framing::{Command, FrameDecoder};
pub use relay_client::{RelayState, RelayTimeouts, RemoteBuffer};
pub use tcp_server::{ConnectionManager, HostEvent, HostEventKind, ServerHandle};

// =================================================================
// Handshake (host -> client, once per connection)
// =================================================================

/// `<name> <size> <rangeStart> <rangeEnd> <lockOffset> <dataOffset>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub name: String,
    pub buffer_size: usize,
    pub range_start: usize,
    pub range_end: usize,
    pub lock_offset: usize,
    pub data_offset: usize,
}

impl Handshake {
    pub fn for_buffer(name: &str) -> Self {
        Self {
            name: name.to_string(),
            buffer_size: BUF_SIZE,
            range_start: 0,
            range_end: BUF_SIZE - 1,
            lock_offset: LOCK_OFFSET,
            data_offset: DATA_OFFSET,
        }
    }

    /// Wire form, newline included.
    pub fn encode(&self) -> String {
        format!("{}\n", self)
    }

    pub fn parse(line: &str) -> RelayResult<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(RelayError::ProtocolMismatch(format!(
                "expected 6 handshake fields, got {}: {:?}",
                fields.len(),
                line.trim_end()
            )));
        }

        let number = |idx: usize| -> RelayResult<usize> {
            fields[idx].parse::<usize>().map_err(|_| {
                RelayError::ProtocolMismatch(format!("handshake field {} is not a number: {:?}", idx + 1, fields[idx]))
            })
        };

        Ok(Self {
            name: fields[0].to_string(),
            buffer_size: number(1)?,
            range_start: number(2)?,
            range_end: number(3)?,
            lock_offset: number(4)?,
            data_offset: number(5)?,
        })
    }
}

impl fmt::Display for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.name, self.buffer_size, self.range_start, self.range_end, self.lock_offset, self.data_offset
        )
    }
}

// =================================================================
// Responses (host -> client)
// =================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `OK\n`
    Done,
    /// `OK <content>\n` (content may be empty)
    Content(String),
    /// `ERROR <message>\n`
    Error(String),
}

impl Response {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Response::Done => b"OK\n".to_vec(),
            Response::Content(text) => format!("OK {}\n", text).into_bytes(),
            Response::Error(message) => format!("ERROR {}\n", single_line(message)).into_bytes(),
        }
    }

    /// Parse one response with its terminating newline already removed.
    pub fn parse(body: &[u8]) -> RelayResult<Self> {
        let decoded = String::from_utf8_lossy(body);
        let text = decoded.strip_suffix('\r').unwrap_or(decoded.as_ref());

        if text == "OK" {
            Ok(Response::Done)
        } else if let Some(content) = text.strip_prefix("OK ") {
            Ok(Response::Content(content.to_string()))
        } else if text == "ERROR" {
            Ok(Response::Error(String::new()))
        } else if let Some(message) = text.strip_prefix("ERROR ") {
            Ok(Response::Error(message.to_string()))
        } else {
            Err(RelayError::ProtocolViolation(format!("unexpected response: {:?}", text)))
        }
    }
}

/// Error messages must fit on the response line.
fn single_line(message: &str) -> String {
    message.replace(['\r', '\n'], " ")
}

// =================================================================
// Common access seam (local mapping or remote relay)
// =================================================================

/// Anything that can read and replace the shared text.
#[async_trait::async_trait]
pub trait BufferAccess: Send {
    /// Buffer name (for logging)
    fn name(&self) -> &str;

    async fn read_text(&mut self) -> RelayResult<String>;

    async fn write_text(&mut self, text: &str) -> RelayResult<()>;
}

#[async_trait::async_trait]
impl BufferAccess for Arc<LocalBuffer> {
    fn name(&self) -> &str {
        LocalBuffer::name(self)
    }

    async fn read_text(&mut self) -> RelayResult<String> {
        let buffer = Arc::clone(self);
        run_blocking(move || buffer.read()).await
    }

    async fn write_text(&mut self, text: &str) -> RelayResult<()> {
        let buffer = Arc::clone(self);
        let text = text.to_string();
        run_blocking(move || buffer.write(&text)).await
    }
}

/// Lock acquisition sleeps between polls, so buffer calls leave the async workers.
pub(crate) async fn run_blocking<T, F>(f: F) -> RelayResult<T>
where
    F: FnOnce() -> RelayResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RelayError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_wire_form_matches_layout() {
        let hs = Handshake::for_buffer("psm_1234abcd");
        assert_eq!(hs.encode(), "psm_1234abcd 4096 0 4095 0 5\n");
        assert_eq!(Handshake::parse(&hs.encode()).unwrap(), hs);
    }

    #[test]
    fn handshake_with_wrong_field_count_is_a_mismatch() {
        for line in ["", "psm_x 4096 0 4095 0", "psm_x 4096 0 4095 0 5 extra"] {
            assert!(matches!(Handshake::parse(line), Err(RelayError::ProtocolMismatch(_))));
        }
        assert!(matches!(
            Handshake::parse("psm_x 4096 zero 4095 0 5"),
            Err(RelayError::ProtocolMismatch(_))
        ));
    }

    #[test]
    fn response_shapes() {
        assert_eq!(Response::parse(b"OK").unwrap(), Response::Done);
        assert_eq!(Response::parse(b"OK ").unwrap(), Response::Content(String::new()));
        assert_eq!(
            Response::parse(b"OK hello\nworld").unwrap(),
            Response::Content("hello\nworld".into())
        );
        assert_eq!(Response::parse(b"ERROR boom").unwrap(), Response::Error("boom".into()));
        assert!(matches!(Response::parse(b"NOPE"), Err(RelayError::ProtocolViolation(_))));
    }

    #[test]
    fn error_responses_stay_on_one_line() {
        let wire = Response::Error("line one\nline two".into()).encode();
        assert_eq!(wire, b"ERROR line one line two\n".to_vec());
        assert_eq!(Response::Content(String::new()).encode(), b"OK \n".to_vec());
    }
}
