//! Pre-submission mutator: corrupts one field of an assembled packed command.

#![allow(missing_docs)]

use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::PreSubmissionHook;
use crate::inject::InjectedFault;
use crate::logger::sink::HarnessLoggerHandle;
use crate::protocol::packed::{
    CMD23_ARG_PACKED, CMD23_ARG_REL_WR, CMD23_BITS_16_TO_29, CMD23_BLOCK_COUNT_MASK,
    Direction, PACKED_HDR_NUM_REQS_MASK, PACKED_HDR_NUM_REQS_SHIFT, PACKED_HDR_RW_MASK,
    PACKED_HDR_RW_READ, PACKED_HDR_VER_MASK, PackedCommand,
};
use crate::scenario::catalog::TestCase;
use crate::scenario::session::InjectionContext;

/// R/W code that is neither read nor write.
pub const INVALID_RW_CODE: u32 = 0x04;

/// One structural corruption, each confined to a fixed bit range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMutation {
    InvalidVersion,
    WrongWriteCode,
    InvalidRwCode,
    DifferentAddresses,
    ReqNumSmaller,
    ReqNumLarger,
    EntryPackedBitSet,
    SbcCountOverMax,
    SbcCountZero,
    SbcPackedBitUnset,
    SbcRelWrBitSet,
    SbcBits16To29Set,
    SbcHeaderBlockNotCounted,
}

/// Bits a mutation may touch: per header word, plus the CMD23 argument.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationTarget {
    pub header_words: Vec<(usize, u32)>,
    pub sbc: u32,
}

impl MutationTarget {
    /// Clear the targeted bits so two commands can be compared outside them.
    #[must_use]
    pub fn mask_out(&self, command: &PackedCommand) -> (Vec<u32>, u32) {
        let mut header = command.header.clone();
        for (word, mask) in &self.header_words {
            if let Some(slot) = header.get_mut(*word) {
                *slot &= !mask;
            }
        }
        (header, command.sbc_arg & !self.sbc)
    }
}

impl HeaderMutation {
    /// Mutation armed for `case`, if the case belongs to the invalid-command group.
    #[must_use]
    pub const fn for_case(case: TestCase) -> Option<Self> {
        let mutation = match case {
            TestCase::HdrInvalidVersion => Self::InvalidVersion,
            TestCase::HdrWrongWriteCode => Self::WrongWriteCode,
            TestCase::HdrInvalidRwCode => Self::InvalidRwCode,
            TestCase::HdrDifferentAddresses => Self::DifferentAddresses,
            TestCase::HdrReqNumSmallerThanActual => Self::ReqNumSmaller,
            TestCase::HdrReqNumLargerThanActual => Self::ReqNumLarger,
            TestCase::HdrCmd23PackedBitSet => Self::EntryPackedBitSet,
            TestCase::Cmd23MaxPackedWrites => Self::SbcCountOverMax,
            TestCase::Cmd23ZeroPackedWrites => Self::SbcCountZero,
            TestCase::Cmd23PackedBitUnset => Self::SbcPackedBitUnset,
            TestCase::Cmd23RelWrBitSet => Self::SbcRelWrBitSet,
            TestCase::Cmd23Bits16To29Set => Self::SbcBits16To29Set,
            TestCase::Cmd23HdrBlkNotInCount => Self::SbcHeaderBlockNotCounted,
            _ => return None,
        };
        Some(mutation)
    }

    #[must_use]
    pub fn target(self) -> MutationTarget {
        let words = |list: &[(usize, u32)]| MutationTarget {
            header_words: list.to_vec(),
            sbc: 0,
        };
        let sbc = |mask| MutationTarget {
            header_words: Vec::new(),
            sbc: mask,
        };
        match self {
            Self::InvalidVersion => words(&[(0, PACKED_HDR_VER_MASK)]),
            Self::WrongWriteCode | Self::InvalidRwCode => words(&[(0, PACKED_HDR_RW_MASK)]),
            Self::DifferentAddresses => words(&[(3, u32::MAX)]),
            Self::ReqNumSmaller | Self::ReqNumLarger => words(&[(0, PACKED_HDR_NUM_REQS_MASK)]),
            Self::EntryPackedBitSet => words(&[(2, CMD23_ARG_PACKED), (4, CMD23_ARG_PACKED)]),
            Self::SbcCountOverMax | Self::SbcCountZero | Self::SbcHeaderBlockNotCounted => {
                sbc(CMD23_BLOCK_COUNT_MASK)
            }
            Self::SbcPackedBitUnset => sbc(CMD23_ARG_PACKED),
            Self::SbcRelWrBitSet => sbc(CMD23_ARG_REL_WR),
            Self::SbcBits16To29Set => sbc(CMD23_BITS_16_TO_29),
        }
    }

    /// Apply the corruption in place. `max_packed` is the device's batch limit.
    pub fn apply(self, command: &mut PackedCommand, max_packed: u32) {
        match self {
            Self::InvalidVersion => command.header[0] &= !PACKED_HDR_VER_MASK,
            Self::WrongWriteCode => set_rw_code(command, PACKED_HDR_RW_READ),
            Self::InvalidRwCode => set_rw_code(command, INVALID_RW_CODE),
            Self::DifferentAddresses => {
                if let Some(&second) = command.entry_sectors.get(1) {
                    #[allow(clippy::cast_possible_truncation)]
                    {
                        command.header[3] = second as u32;
                    }
                }
            }
            Self::ReqNumSmaller => {
                set_entry_count(command, command.entry_count().wrapping_sub(1));
            }
            Self::ReqNumLarger => {
                set_entry_count(command, command.entry_count().wrapping_add(1));
            }
            Self::EntryPackedBitSet => {
                command.header[2] |= CMD23_ARG_PACKED;
                command.header[4] |= CMD23_ARG_PACKED;
            }
            Self::SbcCountOverMax => set_sbc_count(command, max_packed.saturating_add(1)),
            Self::SbcCountZero => set_sbc_count(command, 0),
            Self::SbcPackedBitUnset => command.sbc_arg &= !CMD23_ARG_PACKED,
            Self::SbcRelWrBitSet => command.sbc_arg |= CMD23_ARG_REL_WR,
            Self::SbcBits16To29Set => command.sbc_arg |= CMD23_BITS_16_TO_29,
            Self::SbcHeaderBlockNotCounted => {
                let count = if command.direction == Direction::Read {
                    0
                } else {
                    command.data_blocks
                };
                set_sbc_count(command, count);
            }
        }
    }
}

fn set_rw_code(command: &mut PackedCommand, code: u32) {
    command.header[0] = (command.header[0] & !PACKED_HDR_RW_MASK) | ((code << 8) & PACKED_HDR_RW_MASK);
}

fn set_entry_count(command: &mut PackedCommand, count: u32) {
    command.header[0] = (command.header[0] & !PACKED_HDR_NUM_REQS_MASK)
        | ((count << PACKED_HDR_NUM_REQS_SHIFT) & PACKED_HDR_NUM_REQS_MASK);
}

fn set_sbc_count(command: &mut PackedCommand, count: u32) {
    command.sbc_arg = (command.sbc_arg & !CMD23_BLOCK_COUNT_MASK) | (count & CMD23_BLOCK_COUNT_MASK);
}

/// Hook registered with the dispatch engine while the invalid-command group runs.
pub struct HeaderInjector {
    context: Arc<Mutex<InjectionContext>>,
    logger: HarnessLoggerHandle,
}

impl HeaderInjector {
    #[must_use]
    pub const fn new(context: Arc<Mutex<InjectionContext>>, logger: HarnessLoggerHandle) -> Self {
        Self { context, logger }
    }
}

impl PreSubmissionHook for HeaderInjector {
    fn before_submit(&self, command: &mut PackedCommand, max_packed: u32) {
        let case = self.context.lock().test_case;
        let Some(mutation) = case.and_then(HeaderMutation::for_case) else {
            return;
        };
        mutation.apply(command, max_packed);
        let batch_len = u32::try_from(command.entry_sectors.len()).unwrap_or(u32::MAX);
        self.logger
            .injector_fired(case, InjectedFault::Header(mutation), batch_len);
    }
}
