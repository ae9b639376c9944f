/*
 * SHM RELAY - SHARED BUFFER MODULE INTERFACE
 * =================================================================
 * Component Name: src/buffer/mod.rs
 * Core Responsibility: Fixed layout of the shared text buffer and the names that identify it.
 * Design Pattern: Module Facade
 * =================================================================
 */

use crate::error::{RelayError, RelayResult};

pub mod lock;
pub mod protocol;
pub mod region;

pub use lock::{LockGuard, ShmLock};
pub use protocol::LocalBuffer;
pub use region::SharedBuffer;

// =================================================================
// Buffer layout (must match every participant bit for bit)
// =================================================================

/// Total size of the mapped region.
pub const BUF_SIZE: usize = 4096;
/// Offset of the lock flag byte.
pub const LOCK_OFFSET: usize = 0;
pub const LOCK_SIZE: usize = 1;
/// Offset of the little-endian u32 payload length.
pub const LEN_OFFSET: usize = LOCK_OFFSET + LOCK_SIZE;
pub const LEN_SIZE: usize = 4;
/// Offset of the first payload byte.
pub const DATA_OFFSET: usize = LEN_OFFSET + LEN_SIZE;
/// Largest payload the region can hold (4091 bytes).
pub const MAX_DATA_SIZE: usize = BUF_SIZE - DATA_OFFSET;

pub const LOCK_FREE: u8 = 0;
pub const LOCK_HELD: u8 = 1;

const NAME_PREFIX: &str = "psm_";

/// Generate a fresh buffer name (`psm_` followed by 8 hex chars).
pub fn generate_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", NAME_PREFIX, &id[..8])
}

/// Names travel as one field of the handshake line and double as a file name.
pub fn validate_name(name: &str) -> RelayResult<()> {
    if name.is_empty() {
        return Err(RelayError::InvalidName("name is empty".into()));
    }
    if name.len() > 255 {
        return Err(RelayError::InvalidName(format!("name is {} bytes long", name.len())));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || *c == '/' || *c == '\\')
    {
        return Err(RelayError::InvalidName(format!(
            "'{}' contains forbidden character {:?}",
            name, bad
        )));
    }
    if name == "." || name == ".." {
        return Err(RelayError::InvalidName(format!("'{}' is reserved", name)));
    }
    Ok(())
}
