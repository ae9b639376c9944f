/*
 * SHM RELAY - LOCAL BUFFER PROTOCOL
 * =================================================================
 * Component Name: src/buffer/protocol.rs
 * Core Responsibility: Atomic text write/read over the shared region, with recovery from a corrupted length field.
 * Design Pattern: Scoped Lock / Snapshot-then-Decode
 * =================================================================
 */

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::lock::ShmLock;
use super::region::SharedBuffer;
use super::MAX_DATA_SIZE;
use crate::error::{RelayError, RelayResult};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Owned handle to a shared region plus the lock that guards it.
pub struct LocalBuffer {
    buffer: Arc<SharedBuffer>,
    lock: ShmLock,
    lock_timeout: Duration,
}

impl LocalBuffer {
    pub fn new(buffer: SharedBuffer, lock_timeout: Duration) -> Self {
        Self::from_shared(Arc::new(buffer), lock_timeout)
    }

    pub fn from_shared(buffer: Arc<SharedBuffer>, lock_timeout: Duration) -> Self {
        Self {
            lock: ShmLock::new(Arc::clone(&buffer)),
            buffer,
            lock_timeout,
        }
    }

    pub fn name(&self) -> &str {
        self.buffer.name()
    }

    pub fn region(&self) -> &SharedBuffer {
        &self.buffer
    }

    pub fn lock(&self) -> &ShmLock {
        &self.lock
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Replace the buffer content with `text` (trailing whitespace removed).
    /// The region is untouched when the payload does not fit.
    pub fn write(&self, text: &str) -> RelayResult<()> {
        let data = text.trim_end().as_bytes();
        if data.len() > MAX_DATA_SIZE {
            return Err(RelayError::PayloadTooLarge {
                size: data.len(),
                max: MAX_DATA_SIZE,
            });
        }

        let guard = self.lock.acquire(self.lock_timeout)?;
        self.buffer.write_len(data.len() as u32);
        self.buffer.write_payload(data);
        guard.release()?;

        debug!("SHM_WRITE: {} bytes into '{}'", data.len(), self.name());
        Ok(())
    }

    /// Current content, decoded as UTF-8 with replacement characters.
    pub fn read(&self) -> RelayResult<String> {
        let guard = self.lock.acquire(self.lock_timeout)?;
        let declared = self.buffer.read_len();
        let payload = self.buffer.payload();
        guard.release()?;

        let (data, recovered) = select_payload(declared, &payload);
        if recovered {
            warn!(
                "SHM_READ: corrupted length field {} on '{}', recovered {} bytes",
                declared,
                self.name(),
                data.len()
            );
        }
        Ok(String::from_utf8_lossy(data).into_owned())
    }
}

/// Pick the meaningful bytes of a payload snapshot. The flag is `true` when
/// the declared length was out of range and had to be inferred.
pub fn select_payload(declared: u32, payload: &[u8]) -> (&[u8], bool) {
    let region = &payload[..payload.len().min(MAX_DATA_SIZE)];
    let declared = declared as usize;

    let (len, recovered) = if declared <= MAX_DATA_SIZE {
        (declared.min(region.len()), false)
    } else {
        // First NUL marks the end; with none, take everything up to the last non-zero byte.
        let implied = match region.iter().position(|b| *b == 0) {
            Some(pos) => pos,
            None => trim_trailing_zeros(region).len().min(MAX_DATA_SIZE),
        };
        (implied, true)
    };

    (trim_trailing_zeros(&region[..len]), recovered)
}

fn trim_trailing_zeros(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_range_length_is_trusted() {
        let mut payload = vec![0u8; MAX_DATA_SIZE];
        payload[..5].copy_from_slice(b"hello");
        assert_eq!(select_payload(5, &payload), (&b"hello"[..], false));
        assert_eq!(select_payload(3, &payload), (&b"hel"[..], false));
    }

    #[test]
    fn out_of_range_length_stops_at_first_nul() {
        let mut payload = vec![b'x'; MAX_DATA_SIZE];
        payload[7] = 0;
        let (data, recovered) = select_payload(u32::MAX, &payload);
        assert!(recovered);
        assert_eq!(data, &b"xxxxxxx"[..]);
    }

    #[test]
    fn out_of_range_length_with_nul_at_zero_is_empty() {
        let mut payload = vec![b'x'; MAX_DATA_SIZE];
        payload[0] = 0;
        let (data, recovered) = select_payload(MAX_DATA_SIZE as u32 + 1, &payload);
        assert!(recovered);
        assert!(data.is_empty());
    }

    #[test]
    fn out_of_range_length_without_nul_uses_full_region() {
        let payload = vec![b'y'; MAX_DATA_SIZE];
        let (data, recovered) = select_payload(9999, &payload);
        assert!(recovered);
        assert_eq!(data.len(), MAX_DATA_SIZE);
    }

    #[test]
    fn trailing_nuls_inside_declared_length_are_trimmed() {
        let mut payload = vec![0u8; MAX_DATA_SIZE];
        payload[..2].copy_from_slice(b"ok");
        assert_eq!(select_payload(10, &payload).0, &b"ok"[..]);
    }
}
