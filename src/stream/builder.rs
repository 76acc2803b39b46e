//! Synthetic request streams: ordered reads, writes and flushes with
//! controlled sizes, offsets and error expectations.

#![allow(missing_docs)]

use serde::Serialize;

use crate::core::config::StreamConfig;
use crate::core::errors::{HarnessError, Result};
use crate::protocol::packed::Direction;
use crate::stream::rng::Lcg;

/// Sectors the start offset advances per bio already written.
pub const SECTOR_STRIDE_PER_BIO: u64 = 4096;
/// Size of the single read used to close a batch.
pub const READ_REQUEST_BIOS: u32 = 2;
/// Non-random write sizes cycle through `1..=DETERMINISTIC_BIO_CYCLE`.
pub const DETERMINISTIC_BIO_CYCLE: u32 = 5;

/// One synthetic request. Immutable once the stream is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequestDescriptor {
    pub direction: Direction,
    pub start_sector: u64,
    /// Size in bios (4 KiB units); zero for flushes.
    pub bios: u32,
    pub error_expected: bool,
}

/// A fully prepared request stream, ready for submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestStream {
    requests: Vec<RequestDescriptor>,
}

impl RequestStream {
    #[must_use]
    pub fn requests(&self) -> &[RequestDescriptor] {
        &self.requests
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.requests
            .iter()
            .filter(|r| r.direction == Direction::Write)
            .count()
    }
}

/// Incremental builder. Dropping it discards everything appended so far, so a
/// failed preparation can never leak a half-built stream.
#[derive(Debug)]
pub struct StreamBuilder {
    base_sector: u64,
    write_bios: u64,
    limit: usize,
    max_bios: u32,
    max_transfer_bytes: u64,
    requests: Vec<RequestDescriptor>,
}

impl StreamBuilder {
    #[must_use]
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            base_sector: config.base_sector,
            write_bios: 0,
            limit: config.max_stream_requests,
            max_bios: config.max_bios_per_request,
            max_transfer_bytes: config.max_transfer_bytes,
            requests: Vec::new(),
        }
    }

    /// Append one small read at `sector`.
    pub fn add_read(&mut self, sector: u64) -> Result<()> {
        self.reserve(1)?;
        self.requests.push(RequestDescriptor {
            direction: Direction::Read,
            start_sector: sector,
            bios: READ_REQUEST_BIOS,
            error_expected: false,
        });
        Ok(())
    }

    /// Append one read at the stream's base sector.
    pub fn add_base_read(&mut self) -> Result<()> {
        self.add_read(self.base_sector)
    }

    pub fn add_flush(&mut self) -> Result<()> {
        self.reserve(1)?;
        self.requests.push(RequestDescriptor {
            direction: Direction::Flush,
            start_sector: 0,
            bios: 0,
            error_expected: false,
        });
        Ok(())
    }

    /// Append `count` writes with increasing, non-overlapping offsets.
    ///
    /// With an `rng` the bio count of each write is drawn from it; without one
    /// the sizes cycle through `(i mod 5) + 1` for the 1-based index `i`.
    pub fn add_writes(
        &mut self,
        count: usize,
        error_expected: bool,
        mut rng: Option<&mut Lcg>,
    ) -> Result<()> {
        self.reserve(count)?;
        for i in 1..=count {
            let bios = match rng.as_deref_mut() {
                Some(rng) => rng.draw_bio_count(self.max_bios, self.max_transfer_bytes),
                None => deterministic_bios(i),
            };
            self.push_write(bios, error_expected);
        }
        Ok(())
    }

    /// Append `count` writes where every write past the first half
    /// (1-based index `> count / 2`) expects an error.
    pub fn add_mixed_error_writes(&mut self, count: usize) -> Result<()> {
        self.reserve(count)?;
        for i in 1..=count {
            self.push_write(deterministic_bios(i), i > count / 2);
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    #[must_use]
    pub fn finish(self) -> RequestStream {
        RequestStream {
            requests: self.requests,
        }
    }

    fn push_write(&mut self, bios: u32, error_expected: bool) {
        let start_sector = self.base_sector + SECTOR_STRIDE_PER_BIO * self.write_bios;
        self.write_bios += u64::from(bios);
        self.requests.push(RequestDescriptor {
            direction: Direction::Write,
            start_sector,
            bios,
            error_expected,
        });
    }

    fn reserve(&mut self, additional: usize) -> Result<()> {
        let wanted = self.requests.len().saturating_add(additional);
        if wanted > self.limit {
            return Err(HarnessError::Resource {
                details: format!(
                    "stream would hold {wanted} requests, limit is {}",
                    self.limit
                ),
            });
        }
        self.requests
            .try_reserve(additional)
            .map_err(|error| HarnessError::Resource {
                details: format!("cannot allocate {additional} request slots: {error}"),
            })
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn deterministic_bios(index: usize) -> u32 {
    (index % DETERMINISTIC_BIO_CYCLE as usize) as u32 + 1
}
