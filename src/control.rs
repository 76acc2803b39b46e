//! Triggering surface: one control file per runnable group plus the shared
//! seed attribute.
//!
//! Writing a repeat count to a control file runs that group. Reading it
//! returns the group description once per open, then nothing.

#![allow(missing_docs)]

use std::sync::Arc;

use crate::core::errors::{HarnessError, Result};
use crate::scenario::catalog::TestGroup;
use crate::scenario::runner::HarnessResult;
use crate::scenario::session::HarnessSession;

/// Parse a repeat count the way the control file accepts it: an optional
/// sign and leading digits, anything after ignored. Missing or non-positive
/// values mean one cycle.
#[must_use]
pub fn parse_repeat(input: &str) -> u32 {
    let trimmed = input.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let value = digits[..end].parse::<u64>().unwrap_or(0);
    if negative || value == 0 {
        1
    } else {
        u32::try_from(value).unwrap_or(u32::MAX)
    }
}

/// Control file bound to one group.
#[derive(Debug, Clone)]
pub struct ControlFile {
    group: TestGroup,
    session: Arc<HarnessSession>,
}

impl ControlFile {
    #[must_use]
    pub const fn new(group: TestGroup, session: Arc<HarnessSession>) -> Self {
        Self { group, session }
    }

    #[must_use]
    pub const fn group(&self) -> TestGroup {
        self.group
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.group.control_name()
    }

    #[must_use]
    pub const fn open(&self) -> ControlHandle<'_> {
        ControlHandle {
            file: self,
            description_read: false,
        }
    }
}

/// An open control file.
#[derive(Debug)]
pub struct ControlHandle<'a> {
    file: &'a ControlFile,
    description_read: bool,
}

impl ControlHandle<'_> {
    /// The group description on the first read, empty afterwards.
    pub const fn read(&mut self) -> &'static str {
        if self.description_read {
            return "";
        }
        self.description_read = true;
        self.file.group.description()
    }

    /// Run the group `parse_repeat(input)` times.
    pub fn write(&mut self, input: &str) -> Result<HarnessResult> {
        self.file
            .session
            .run_group(self.file.group, parse_repeat(input))
    }
}

/// Read/write access to the random seed shared by all groups.
#[derive(Debug, Clone)]
pub struct SeedAttribute {
    session: Arc<HarnessSession>,
}

impl SeedAttribute {
    #[must_use]
    pub const fn new(session: Arc<HarnessSession>) -> Self {
        Self { session }
    }

    #[must_use]
    pub fn read(&self) -> String {
        format!("{}\n", self.session.seed())
    }

    pub fn write(&self, input: &str) -> Result<()> {
        let seed = input
            .trim()
            .parse::<u32>()
            .map_err(|e| HarnessError::ConfigParse {
                context: "random_test_seed",
                details: format!("{input:?}: {e}"),
            })?;
        self.session.set_seed(seed);
        Ok(())
    }
}

/// Every control file plus the seed attribute for one session.
#[derive(Debug, Clone)]
pub struct ControlSurface {
    files: Vec<ControlFile>,
    seed: SeedAttribute,
}

impl ControlSurface {
    #[must_use]
    pub fn new(session: &Arc<HarnessSession>) -> Self {
        Self {
            files: TestGroup::RUNNABLE
                .iter()
                .map(|group| ControlFile::new(*group, Arc::clone(session)))
                .collect(),
            seed: SeedAttribute::new(Arc::clone(session)),
        }
    }

    #[must_use]
    pub fn files(&self) -> &[ControlFile] {
        &self.files
    }

    #[must_use]
    pub fn file(&self, group: TestGroup) -> Option<&ControlFile> {
        self.files.iter().find(|f| f.group == group)
    }

    #[must_use]
    pub const fn seed(&self) -> &SeedAttribute {
        &self.seed
    }
}
