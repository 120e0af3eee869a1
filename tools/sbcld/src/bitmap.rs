//! Monochrome .bmp decoding
//!
//! Parses the fixed 14 byte file header and 40 byte info header, then strips the
//! row alignment padding from the 1 bit per pixel payload. Rows are kept in file
//! order (bottom-up for a regular bitmap); the drawing macro on the device is
//! written against that order, so no flip happens here.

use std::ops::Deref;

use tracing::{debug, warn};

use crate::error::{LoadError, Result};

pub const HEADER_SIZE: usize = 14;
pub const INFOHEADER_SIZE: usize = 40;
pub const SIGNATURE: [u8; 2] = *b"BM";

/// The 14 byte file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterHeader {
    pub signature: [u8; 2],
    pub file_size: u32,
    pub reserved: [u16; 2],
    pub pixel_data_offset: u32,
}

/// The 40 byte BITMAPINFOHEADER.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterInfoHeader {
    pub header_size: u32,
    pub width: i32,
    pub height: i32,
    pub planes: u16,
    pub bits_per_pixel: u16,
    pub compression: u32,
    pub image_size: u32,
    pub x_px_per_meter: i32,
    pub y_px_per_meter: i32,
    pub colors_used: u32,
    pub colors_important: u32,
}

fn u16_at(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn i32_at(buf: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn require(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(LoadError::TruncatedInput {
            needed,
            actual: buf.len(),
        });
    }
    Ok(())
}

impl RasterHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        require(buf, HEADER_SIZE)?;
        Ok(Self {
            signature: [buf[0], buf[1]],
            file_size: u32_at(buf, 2),
            reserved: [u16_at(buf, 6), u16_at(buf, 8)],
            pixel_data_offset: u32_at(buf, 10),
        })
    }
}

impl RasterInfoHeader {
    /// `buf` starts at the info header, i.e. right after the file header.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        require(buf, INFOHEADER_SIZE)?;
        Ok(Self {
            header_size: u32_at(buf, 0),
            width: i32_at(buf, 4),
            height: i32_at(buf, 8),
            planes: u16_at(buf, 12),
            bits_per_pixel: u16_at(buf, 14),
            compression: u32_at(buf, 16),
            image_size: u32_at(buf, 20),
            x_px_per_meter: i32_at(buf, 24),
            y_px_per_meter: i32_at(buf, 28),
            colors_used: u32_at(buf, 32),
            colors_important: u32_at(buf, 36),
        })
    }

    /// Bytes of pixel data per row, without padding.
    pub fn row_bytes(&self) -> usize {
        (self.width.unsigned_abs() as usize).div_ceil(8)
    }

    /// Bytes skipped after each row to reach the next 4 byte boundary.
    ///
    /// Deliberately not `row_bytes % 4`, which some loaders skip; the two only
    /// agree when rows are already aligned, as they are for 128 pixel widths.
    pub fn row_padding(&self) -> usize {
        (4 - self.row_bytes() % 4) % 4
    }

    pub fn rows(&self) -> usize {
        self.height.unsigned_abs() as usize
    }
}

/// One bit per pixel, padding removed, rows in file order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackedBlob(Vec<u8>);

impl PackedBlob {
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// CRC-32 of the blob, handy for comparing staged files.
    pub fn checksum(&self) -> u32 {
        crc32fast::hash(&self.0)
    }
}

impl From<Vec<u8>> for PackedBlob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Deref for PackedBlob {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for PackedBlob {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Decode a monochrome bitmap into a packed blob. The signature is not checked.
pub fn decode(container: &[u8]) -> Result<PackedBlob> {
    let header = RasterHeader::parse(container)?;
    debug!(?header, "file header");

    let info = RasterInfoHeader::parse(container.get(HEADER_SIZE..).unwrap_or_default())
        .map_err(|_| LoadError::TruncatedInput {
            needed: HEADER_SIZE + INFOHEADER_SIZE,
            actual: container.len(),
        })?;
    debug!(?info, "info header");

    if info.bits_per_pixel != 1 {
        return Err(LoadError::UnsupportedFormat {
            bits_per_pixel: info.bits_per_pixel,
        });
    }

    if info.width <= 0 {
        return Err(LoadError::InvalidDimensions {
            width: info.width,
            height: info.height,
        });
    }

    if info.compression != 0 {
        warn!(compression = info.compression, "compressed bitmap, reading pixel data as-is");
    }

    let row_bytes = info.row_bytes();
    let stride = row_bytes + info.row_padding();
    let rows = info.rows();
    let offset = header.pixel_data_offset as usize;

    let needed = pixel_extent(offset, rows, row_bytes, stride).unwrap_or(usize::MAX);
    if needed > container.len() {
        return Err(LoadError::TruncatedInput {
            needed,
            actual: container.len(),
        });
    }

    let mut blob = Vec::with_capacity(rows * row_bytes);
    for row in 0..rows {
        let start = offset + row * stride;
        blob.extend_from_slice(&container[start..start + row_bytes]);
    }

    debug!(rows, row_bytes, len = blob.len(), "packed pixel data");
    Ok(PackedBlob(blob))
}

/// End of the last row's pixel bytes; the padding after it may be missing.
/// `None` if the header asks for more than fits in a `usize`.
fn pixel_extent(offset: usize, rows: usize, row_bytes: usize, stride: usize) -> Option<usize> {
    match rows.checked_sub(1) {
        None => Some(offset),
        Some(last) => last
            .checked_mul(stride)?
            .checked_add(offset)?
            .checked_add(row_bytes),
    }
}

/// Like [`decode`], but rejects containers without the `BM` signature.
pub fn decode_strict(container: &[u8]) -> Result<PackedBlob> {
    let header = RasterHeader::parse(container)?;
    if header.signature != SIGNATURE {
        return Err(LoadError::BadSignature {
            found: header.signature,
        });
    }
    decode(container)
}
