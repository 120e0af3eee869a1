//! Error types for the loader.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::ack::Ack;

/// Every way a load can fail. None of these are retried; the operator restarts the run.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Container is shorter than its headers promise.
    #[error("truncated bitmap: needed {needed} bytes, only {actual} available")]
    TruncatedInput { needed: usize, actual: usize },

    /// Only 1 bit per pixel containers can be packed.
    #[error("the image is not monochrome ({bits_per_pixel} bits per pixel)")]
    UnsupportedFormat { bits_per_pixel: u16 },

    /// Signature check failed (strict decoding only).
    #[error("not a bitmap: expected signature \"BM\", found {found:?}")]
    BadSignature { found: [u8; 2] },

    #[error("invalid bitmap dimensions {width}x{height}")]
    InvalidDimensions { width: i32, height: i32 },

    /// Blob does not have the size the device macro reads back.
    #[error("blob should be {expected} bytes large, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("could not open serial port {port}")]
    ChannelUnavailable {
        port: String,
        #[source]
        source: io::Error,
    },

    #[error("write to device failed: {0}")]
    TransportWriteFailure(#[source] io::Error),

    #[error("could not get {0} acknowledgment: {1}")]
    AckUnavailable(Ack, String),

    #[error("gave up waiting for {ack} after {waited:?}")]
    AckTimeout { ack: Ack, waited: Duration },
}

pub type Result<T> = std::result::Result<T, LoadError>;
