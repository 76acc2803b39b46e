//! Packed write command encoding: header block words and CMD23 argument bits.
//!
//! Header word 0 carries the version (byte 0), the R/W code (byte 1) and the
//! entry count (byte 2). Entry `i` (1-based) then occupies two words: word
//! `2*i` holds that entry's CMD23 argument (block count plus flag bits) and
//! word `2*i + 1` its CMD25 argument (start sector).

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

pub const PACKED_HDR_VERSION: u32 = 0x01;
pub const PACKED_HDR_RW_READ: u32 = 0x01;
pub const PACKED_HDR_RW_WRITE: u32 = 0x02;

pub const PACKED_HDR_VER_MASK: u32 = 0x0000_00FF;
pub const PACKED_HDR_RW_MASK: u32 = 0x0000_FF00;
pub const PACKED_HDR_NUM_REQS_MASK: u32 = 0x00FF_0000;
pub const PACKED_HDR_NUM_REQS_SHIFT: u32 = 16;

pub const CMD23_ARG_REL_WR: u32 = 1 << 31;
pub const CMD23_ARG_PACKED: u32 = 1 << 30;
pub const CMD23_BITS_16_TO_29: u32 = 0x3FFF_0000;
pub const CMD23_BLOCK_COUNT_MASK: u32 = 0x0000_FFFF;

/// Minimum header size in 32-bit words (one 512-byte block).
pub const HEADER_WORDS: usize = 128;

/// Transfer direction of a request or packed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Read,
    Write,
    Flush,
}

/// One sub-request inside a packed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedEntry {
    pub sector: u64,
    pub blocks: u32,
    pub reliable: bool,
}

/// A packed command as handed to the transport: header block plus the
/// CMD23 (set block count) argument that precedes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedCommand {
    pub header: Vec<u32>,
    pub sbc_arg: u32,
    pub direction: Direction,
    /// Data blocks across all entries, header excluded.
    pub data_blocks: u32,
    pub header_blocks: u32,
    /// Start sector of every entry, in batch order.
    pub entry_sectors: Vec<u64>,
}

impl PackedCommand {
    /// Encode a packed command for `entries` in the given direction.
    #[must_use]
    pub fn encode(entries: &[PackedEntry], direction: Direction, header_blocks: u32) -> Self {
        let words = HEADER_WORDS.max(2 * (entries.len() + 1));
        let mut header = vec![0_u32; words];
        let rw = if direction == Direction::Read {
            PACKED_HDR_RW_READ
        } else {
            PACKED_HDR_RW_WRITE
        };
        #[allow(clippy::cast_possible_truncation)]
        let count = (entries.len() as u32) & 0xFF;
        header[0] = PACKED_HDR_VERSION | (rw << 8) | (count << PACKED_HDR_NUM_REQS_SHIFT);

        let mut data_blocks = 0_u32;
        for (idx, entry) in entries.iter().enumerate() {
            let slot = 2 * (idx + 1);
            header[slot] = (entry.blocks & CMD23_BLOCK_COUNT_MASK)
                | if entry.reliable { CMD23_ARG_REL_WR } else { 0 };
            #[allow(clippy::cast_possible_truncation)]
            {
                header[slot + 1] = entry.sector as u32;
            }
            data_blocks = data_blocks.saturating_add(entry.blocks);
        }

        Self {
            header,
            sbc_arg: CMD23_ARG_PACKED | ((data_blocks + header_blocks) & CMD23_BLOCK_COUNT_MASK),
            direction,
            data_blocks,
            header_blocks,
            entry_sectors: entries.iter().map(|e| e.sector).collect(),
        }
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.header[0] & PACKED_HDR_VER_MASK
    }

    #[must_use]
    pub fn rw_code(&self) -> u32 {
        (self.header[0] & PACKED_HDR_RW_MASK) >> 8
    }

    #[must_use]
    pub fn entry_count(&self) -> u32 {
        (self.header[0] & PACKED_HDR_NUM_REQS_MASK) >> PACKED_HDR_NUM_REQS_SHIFT
    }

    /// CMD23 argument stored in the header for 0-based entry `idx`.
    #[must_use]
    pub fn entry_cmd23(&self, idx: usize) -> Option<u32> {
        self.header.get(2 * (idx + 1)).copied()
    }

    /// CMD25 start address stored in the header for 0-based entry `idx`.
    #[must_use]
    pub fn entry_address(&self, idx: usize) -> Option<u32> {
        self.header.get(2 * (idx + 1) + 1).copied()
    }

    #[must_use]
    pub fn sbc_block_count(&self) -> u32 {
        self.sbc_arg & CMD23_BLOCK_COUNT_MASK
    }

    #[must_use]
    pub fn sbc_packed(&self) -> bool {
        self.sbc_arg & CMD23_ARG_PACKED != 0
    }
}
