//! Test groups, test cases and their human-readable descriptions.

#![allow(missing_docs)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Scenario group selected for one harness invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestGroup {
    #[default]
    None,
    General,
    PackingBehavior,
    ErrorRecovery,
    InvalidCommand,
}

/// Which fault injector a group arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmedInjector {
    Neither,
    PreSubmission,
    PostCompletion,
}

impl TestGroup {
    /// Groups that own a test-case range.
    pub const RUNNABLE: [Self; 3] = [
        Self::PackingBehavior,
        Self::ErrorRecovery,
        Self::InvalidCommand,
    ];

    /// Test cases belonging to this group, in execution order.
    #[must_use]
    pub fn cases(self) -> &'static [TestCase] {
        let all = &TestCase::ALL;
        match self {
            Self::PackingBehavior => &all[0..7],
            Self::ErrorRecovery => &all[7..15],
            Self::InvalidCommand => &all[15..28],
            Self::None | Self::General => &[],
        }
    }

    #[must_use]
    pub const fn armed_injector(self) -> ArmedInjector {
        match self {
            Self::InvalidCommand => ArmedInjector::PreSubmission,
            Self::ErrorRecovery => ArmedInjector::PostCompletion,
            Self::None | Self::General | Self::PackingBehavior => ArmedInjector::Neither,
        }
    }

    /// Control file name exposed for the group.
    #[must_use]
    pub const fn control_name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::General => "general",
            Self::PackingBehavior => "send_write_packing_test",
            Self::ErrorRecovery => "err_check_test",
            Self::InvalidCommand => "send_invalid_packed_test",
        }
    }

    /// Static description returned when the control file is read.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::PackingBehavior => {
                "\nsend_write_packing_test\n\
                 =========\n\
                 Description:\n\
                 This test checks the following scenarios\n\
                 - Pack due to FLUSH message\n\
                 - Pack due to FLUSH after threshold writes\n\
                 - Pack due to READ message\n\
                 - Pack due to READ after threshold writes\n\
                 - Pack due to empty queue\n\
                 - Pack due to threshold writes\n\
                 - Pack due to one over threshold writes\n"
            }
            Self::ErrorRecovery => {
                "\nerr_check_test\n\
                 =========\n\
                 Description:\n\
                 This test checks the following scenarios\n\
                 - Return ABORT\n\
                 - Return PARTIAL followed by success\n\
                 - Return PARTIAL followed by abort\n\
                 - Return PARTIAL multiple times until success\n\
                 - Return PARTIAL with fail index = threshold\n\
                 - Return RETRY\n\
                 - Return CMD_ERR\n\
                 - Return DATA_ERR\n"
            }
            Self::InvalidCommand => {
                "\nsend_invalid_packed_test\n\
                 =========\n\
                 Description:\n\
                 This test checks the following scenarios\n\
                 - Send an invalid header version\n\
                 - Send the wrong write code\n\
                 - Send an invalid R/W code\n\
                 - Send wrong start address in header\n\
                 - Send header with block_count smaller than actual\n\
                 - Send header with block_count larger than actual\n\
                 - Send header CMD23 packed bit set\n\
                 - Send CMD23 with block count over threshold\n\
                 - Send CMD23 with block_count equals zero\n\
                 - Send CMD23 packed bit unset\n\
                 - Send CMD23 reliable write bit set\n\
                 - Send CMD23 bits [16-29] set\n\
                 - Send CMD23 header block not in block_count\n"
            }
            Self::None | Self::General => "",
        }
    }
}

impl fmt::Display for TestGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::General => "general",
            Self::PackingBehavior => "packing",
            Self::ErrorRecovery => "err-check",
            Self::InvalidCommand => "invalid",
        };
        f.write_str(name)
    }
}

impl FromStr for TestGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "packing" | "send_write_packing_test" | "packing_behavior" => {
                Ok(Self::PackingBehavior)
            }
            "err-check" | "err_check" | "err_check_test" | "error_recovery" => {
                Ok(Self::ErrorRecovery)
            }
            "invalid" | "send_invalid_packed_test" | "invalid_command" => {
                Ok(Self::InvalidCommand)
            }
            other => Err(format!(
                "unknown test group {other:?} (expected packing, err-check or invalid)"
            )),
        }
    }
}

/// Every test case. Each value determines stream shape, expected statistics
/// and injector behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCase {
    // Packing behavior.
    StopDueToRead,
    StopDueToReadAfterMaxReqs,
    StopDueToFlush,
    StopDueToFlushAfterMaxReqs,
    StopDueToEmptyQueue,
    StopDueToMaxReqNum,
    StopDueToThreshold,

    // Error recovery.
    RetAbort,
    RetPartialFollowedBySuccess,
    RetPartialFollowedByAbort,
    RetPartialMultipleUntilSuccess,
    RetPartialMaxFailIdx,
    RetRetry,
    RetCmdErr,
    RetDataErr,

    // Invalid command.
    HdrInvalidVersion,
    HdrWrongWriteCode,
    HdrInvalidRwCode,
    HdrDifferentAddresses,
    HdrReqNumSmallerThanActual,
    HdrReqNumLargerThanActual,
    HdrCmd23PackedBitSet,
    Cmd23MaxPackedWrites,
    Cmd23ZeroPackedWrites,
    Cmd23PackedBitUnset,
    Cmd23RelWrBitSet,
    Cmd23Bits16To29Set,
    Cmd23HdrBlkNotInCount,
}

impl TestCase {
    pub const ALL: [Self; 28] = [
        Self::StopDueToRead,
        Self::StopDueToReadAfterMaxReqs,
        Self::StopDueToFlush,
        Self::StopDueToFlushAfterMaxReqs,
        Self::StopDueToEmptyQueue,
        Self::StopDueToMaxReqNum,
        Self::StopDueToThreshold,
        Self::RetAbort,
        Self::RetPartialFollowedBySuccess,
        Self::RetPartialFollowedByAbort,
        Self::RetPartialMultipleUntilSuccess,
        Self::RetPartialMaxFailIdx,
        Self::RetRetry,
        Self::RetCmdErr,
        Self::RetDataErr,
        Self::HdrInvalidVersion,
        Self::HdrWrongWriteCode,
        Self::HdrInvalidRwCode,
        Self::HdrDifferentAddresses,
        Self::HdrReqNumSmallerThanActual,
        Self::HdrReqNumLargerThanActual,
        Self::HdrCmd23PackedBitSet,
        Self::Cmd23MaxPackedWrites,
        Self::Cmd23ZeroPackedWrites,
        Self::Cmd23PackedBitUnset,
        Self::Cmd23RelWrBitSet,
        Self::Cmd23Bits16To29Set,
        Self::Cmd23HdrBlkNotInCount,
    ];

    /// The group whose range contains this case.
    #[must_use]
    pub const fn group(self) -> TestGroup {
        match self {
            Self::StopDueToRead
            | Self::StopDueToReadAfterMaxReqs
            | Self::StopDueToFlush
            | Self::StopDueToFlushAfterMaxReqs
            | Self::StopDueToEmptyQueue
            | Self::StopDueToMaxReqNum
            | Self::StopDueToThreshold => TestGroup::PackingBehavior,
            Self::RetAbort
            | Self::RetPartialFollowedBySuccess
            | Self::RetPartialFollowedByAbort
            | Self::RetPartialMultipleUntilSuccess
            | Self::RetPartialMaxFailIdx
            | Self::RetRetry
            | Self::RetCmdErr
            | Self::RetDataErr => TestGroup::ErrorRecovery,
            _ => TestGroup::InvalidCommand,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::StopDueToRead => "Test stop due to read",
            Self::StopDueToReadAfterMaxReqs => "Test stop due to read after max-1 reqs",
            Self::StopDueToFlush => "Test stop due to flush",
            Self::StopDueToFlushAfterMaxReqs => "Test stop due to flush after max-1 reqs",
            Self::StopDueToEmptyQueue => "Test stop due to empty queue",
            Self::StopDueToMaxReqNum => "Test stop due to max req num",
            Self::StopDueToThreshold => "Test stop due to exceeding threshold",
            Self::RetAbort => "Test err_check return abort",
            Self::RetPartialFollowedBySuccess => {
                "Test err_check return partial followed by success"
            }
            Self::RetPartialFollowedByAbort => "Test err_check return partial followed by abort",
            Self::RetPartialMultipleUntilSuccess => {
                "Test err_check return partial multiple until success"
            }
            Self::RetPartialMaxFailIdx => "Test err_check return partial max fail index",
            Self::RetRetry => "Test err_check return retry",
            Self::RetCmdErr => "Test err_check return cmd error",
            Self::RetDataErr => "Test err_check return data error",
            Self::HdrInvalidVersion => "Test invalid - wrong header version",
            Self::HdrWrongWriteCode => "Test invalid - wrong write code",
            Self::HdrInvalidRwCode => "Test invalid - wrong R/W code",
            Self::HdrDifferentAddresses => "Test invalid - header different addresses",
            Self::HdrReqNumSmallerThanActual => "Test invalid - header req num smaller than actual",
            Self::HdrReqNumLargerThanActual => "Test invalid - header req num larger than actual",
            Self::HdrCmd23PackedBitSet => "Test invalid - header cmd23 packed bit set",
            Self::Cmd23MaxPackedWrites => "Test invalid - cmd23 max packed writes",
            Self::Cmd23ZeroPackedWrites => "Test invalid - cmd23 zero packed writes",
            Self::Cmd23PackedBitUnset => "Test invalid - cmd23 packed bit unset",
            Self::Cmd23RelWrBitSet => "Test invalid - cmd23 rel wr bit set",
            Self::Cmd23Bits16To29Set => "Test invalid - cmd23 bits [16-29] set",
            Self::Cmd23HdrBlkNotInCount => "Test invalid - cmd23 header block not in count",
        }
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
