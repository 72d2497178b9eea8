//! Fixed-layout binary codec for stored heatmap snapshots.
//!
//! A snapshot is exactly 100 bytes, one byte per grid cell (0-255) in
//! row-major order, transported as a base64 string. The layout is part
//! of the storage contract and must stay bit-exact.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use soundmap_core::GRID_SIZE;
use thiserror::Error;

/// Byte count of one encoded snapshot.
pub const SNAPSHOT_LEN: usize = GRID_SIZE * GRID_SIZE;

/// A stored 10x10 byte-valued heatmap snapshot, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteGrid(pub [[u8; GRID_SIZE]; GRID_SIZE]);

impl ByteGrid {
    pub fn zeroed() -> Self {
        ByteGrid([[0; GRID_SIZE]; GRID_SIZE])
    }

    /// Flatten into the 100-byte wire layout.
    pub fn to_bytes(&self) -> [u8; SNAPSHOT_LEN] {
        let mut bytes = [0; SNAPSHOT_LEN];
        for (row, cells) in self.0.iter().enumerate() {
            bytes[row * GRID_SIZE..(row + 1) * GRID_SIZE].copy_from_slice(cells);
        }
        bytes
    }

    /// Rebuild from the wire layout, slicing 10 rows of 10.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != SNAPSHOT_LEN {
            return Err(CodecError::WrongLength(bytes.len()));
        }
        let mut grid = [[0; GRID_SIZE]; GRID_SIZE];
        for (row, cells) in grid.iter_mut().enumerate() {
            cells.copy_from_slice(&bytes[row * GRID_SIZE..(row + 1) * GRID_SIZE]);
        }
        Ok(ByteGrid(grid))
    }
}

/// A snapshot payload could not be decoded.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64 snapshot payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("snapshot must be exactly {SNAPSHOT_LEN} bytes, got {0}")]
    WrongLength(usize),
    #[error("snapshot record carries no text payload")]
    MissingPayload,
}

/// Encode a snapshot into its base64 transport form.
pub fn encode_snapshot(grid: &ByteGrid) -> String {
    STANDARD.encode(grid.to_bytes())
}

/// Decode a base64 transport string back into a snapshot.
pub fn decode_snapshot(payload: &str) -> Result<ByteGrid, CodecError> {
    let bytes = STANDARD.decode(payload)?;
    ByteGrid::from_bytes(&bytes)
}
