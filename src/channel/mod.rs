//! Named-pipe channels used by the protocol.
//!
//! ```text
//!  reader                      control (fixed path)                writer
//!  ------                      --------------------                ------
//!  create data FIFO  <id>
//!  probe data (O_RDONLY|O_NONBLOCK)
//!  publish id  ----------------->  4 bytes LE  -------------->  receive id
//!                                                               probe data (O_WRONLY|O_NONBLOCK)
//!  commit_blocking                                              commit_blocking
//!  read  <==================== data FIFO <id> ====================  write
//! ```

pub mod control;
pub mod data;
pub mod fifo;
pub mod guard;

pub use control::{ControlChannel, ControlLock};
pub use data::{ChannelState, DataChannel};
pub use fifo::Access;
pub use guard::FifoGuard;

/// Which side of a session a process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Publishes its identifier and receives the file
    Reader,
    /// Consumes the identifier and sends the file
    Writer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Reader => "reader",
            Role::Writer => "writer",
        }
    }
}
