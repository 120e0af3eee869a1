//! Load 128x64 monochrome bitmaps onto an AVR-SBC.
//!
//! The bitmap is packed to 1024 bytes ([`bitmap`]), poked into device memory
//! one BASIC `XPOKE` line per byte ([`frame`]) in four operator-acknowledged
//! batches ([`session`]), then drawn by a fixed BASIC program.

pub mod ack;
pub mod bitmap;
pub mod error;
pub mod frame;
pub mod link;
pub mod session;
pub mod stage;

pub use ack::{Ack, Acknowledger, Immediate, PromptAcknowledger, TimedAcknowledger};
pub use bitmap::{PackedBlob, decode, decode_strict};
pub use error::{LoadError, Result};
pub use frame::{RemoteCommand, encode};
pub use link::{LinkChannel, SerialLink};
pub use session::{SessionState, TransferReport, TransferSession};
