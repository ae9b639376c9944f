// SHM RELAY - ROOT LIBRARY

// 1. Modules
pub mod error;
pub mod utils;
pub mod buffer;
pub mod transport;
pub mod session;
pub mod cli;
pub mod console;

// 2. Re-exports
pub use buffer::{LocalBuffer, SharedBuffer};
pub use error::{RelayError, RelayResult};
pub use session::{RefreshSession, SessionHandle};
pub use transport::{BufferAccess, ConnectionManager, RemoteBuffer};
pub use utils::logger::init_logger;

pub mod prelude {
    pub use crate::buffer::{generate_name, LocalBuffer, SharedBuffer, MAX_DATA_SIZE};
    pub use crate::session::{RefreshSession, SessionHandle};
    pub use crate::transport::{BufferAccess, ConnectionManager, RelayTimeouts, RemoteBuffer};
    pub use crate::{RelayError, RelayResult};
}
