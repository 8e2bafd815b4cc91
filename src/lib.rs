//! fifoxfer: file transfer between two unrelated local processes over named pipes.
//!
//! A reader creates a private FIFO named after its process id and announces
//! that id on a shared, well-known control FIFO. A writer picks the id up,
//! opens the private FIFO and streams a file through it. No sockets, no
//! shared memory, no inherited descriptors.
//!
//! - [`channel`]: FIFO primitives, the control channel and the data channel state machine
//! - [`rendezvous`]: how the two sides meet without deadlocking on each other's absence
//! - [`transfer`]: the byte pump
//! - [`session`]: per-process drivers with cleanup and signal handling

pub mod channel;
pub mod cli;
pub mod config;
pub mod error;
pub mod identifier;
pub mod rendezvous;
pub mod retry;
pub mod session;
pub mod transfer;

pub use config::Config;
pub use error::{FifoError, Result};
pub use identifier::Identifier;
pub use transfer::{TransferBuffer, TransferStats};
