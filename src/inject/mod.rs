//! Fault injectors registered with the dispatch engine.

pub mod completion;
pub mod header;

use crate::engine::CompletionVerdict;

use self::header::HeaderMutation;

/// What an injector did to a batch. Plain data, so the hooks can report it
/// from the dispatch thread without allocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    Header(HeaderMutation),
    Completion(CompletionVerdict),
}
