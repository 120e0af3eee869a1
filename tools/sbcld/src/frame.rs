//! Device command encoding
//!
//! The AVR-SBC runs a line-numbered BASIC. Each blob byte becomes one
//! `XPOKE value, address` line numbered `address * 10`, and a fixed program
//! reads the pokes back with `XPEEK` and draws them.

use std::fmt;
use std::iter::FusedIterator;

/// Bytes per transfer batch.
pub const BATCH_SIZE: usize = 256;

/// Blob size the render macro reads back (128x64 pixels, 1 bit each).
pub const BLOB_SIZE: usize = 1024;

/// Sent after the last line of a batch, and after the macro.
pub const END_OF_BATCH: u8 = 0x00;

/// Reads the 1024 poked bytes back and draws them bit by bit, MSB first,
/// into a 128 pixel wide window at (40, 80).
pub const RENDER_MACRO: [&str; 15] = [
    "5 CLS\r\n",
    "10 X=0\r\n",
    "20 Y=0\r\n",
    "30 FOR I=0 TO 1023\r\n",
    "40 XPEEK N,I\r\n",
    "50 D=128\r\n",
    "60 FOR J=0 TO 7\r\n",
    "70 B=N/D\r\n",
    "80 B=B-(B/2)*2\r\n",
    "90 DRAWPIX X+40,64-Y+80,B\r\n",
    "100 X=X+1\r\n",
    "110 IF X=128 THEN X=0:Y=Y+1\r\n",
    "120 D=D/2\r\n",
    "130 NEXT J\r\n",
    "140 NEXT I\r\n",
];

/// "write `value` to remote address `address`"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteCommand {
    pub address: usize,
    pub value: u8,
}

impl RemoteCommand {
    pub fn new(address: usize, value: u8) -> Self {
        Self { address, value }
    }

    pub fn line_number(&self) -> usize {
        self.address * 10
    }

    pub fn to_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} XPOKE {}, {}\r\n",
            self.line_number(),
            self.value,
            self.address
        )
    }
}

/// Lazily yields one [`RemoteCommand`] per byte. Cloning restarts from the same point.
#[derive(Debug, Clone)]
pub struct Commands<'a> {
    bytes: &'a [u8],
    start: usize,
    pos: usize,
}

impl Iterator for Commands<'_> {
    type Item = RemoteCommand;

    fn next(&mut self) -> Option<RemoteCommand> {
        let value = *self.bytes.get(self.pos)?;
        let command = RemoteCommand::new(self.start + self.pos, value);
        self.pos += 1;
        Some(command)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.bytes.len() - self.pos;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Commands<'_> {}
impl FusedIterator for Commands<'_> {}

/// Commands for a whole blob, starting at address 0.
pub fn encode(blob: &[u8]) -> Commands<'_> {
    encode_at(blob, 0)
}

/// Commands for `bytes`, the first one addressed at `start`.
pub fn encode_at(bytes: &[u8], start: usize) -> Commands<'_> {
    Commands {
        bytes,
        start,
        pos: 0,
    }
}

/// A window of the blob and the absolute address of its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch<'a> {
    pub index: usize,
    pub offset: usize,
    pub bytes: &'a [u8],
}

impl<'a> Batch<'a> {
    pub fn commands(&self) -> Commands<'a> {
        encode_at(self.bytes, self.offset)
    }
}

/// Split `blob` into consecutive batches of at most `batch_size` bytes.
pub fn batches(blob: &[u8], batch_size: usize) -> impl ExactSizeIterator<Item = Batch<'_>> {
    blob.chunks(batch_size)
        .enumerate()
        .map(move |(index, bytes)| Batch {
            index,
            offset: index * batch_size,
            bytes,
        })
}
