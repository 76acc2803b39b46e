//! Post-completion mutator. Each error-recovery case carries its own small
//! state machine; once a script disarms, completions pass through untouched.

#![allow(missing_docs)]

use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::{CompletionVerdict, PostCompletionHook};
use crate::inject::InjectedFault;
use crate::logger::sink::HarnessLoggerHandle;
use crate::scenario::catalog::TestCase;
use crate::scenario::session::InjectionContext;

/// Per-case completion script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScript {
    /// Fires the same verdict on every completion.
    Always { verdict: CompletionVerdict },
    /// Partial at `num_requests / 2` once.
    PartialThenSuccess { num_requests: u32 },
    /// Partial at `num_requests / 2`, then Abort.
    PartialThenAbort { num_requests: u32, fired: u32 },
    /// Partial at index 1 on each completion, `num_requests` times.
    PartialUntilSuccess { num_requests: u32, fired: u32 },
    /// Partial at `max_packed - 1` once.
    PartialMaxFailIndex { max_packed: u32 },
    Disarmed,
}

impl ErrorScript {
    /// Script armed for `case`. Cases outside the error-recovery group get
    /// [`ErrorScript::Disarmed`].
    #[must_use]
    pub const fn for_case(case: TestCase, num_requests: u32, max_packed: u32) -> Self {
        match case {
            TestCase::RetAbort => Self::Always {
                verdict: CompletionVerdict::Abort,
            },
            TestCase::RetRetry => Self::Always {
                verdict: CompletionVerdict::Retry,
            },
            TestCase::RetCmdErr => Self::Always {
                verdict: CompletionVerdict::CommandError,
            },
            TestCase::RetDataErr => Self::Always {
                verdict: CompletionVerdict::DataError,
            },
            TestCase::RetPartialFollowedBySuccess => Self::PartialThenSuccess { num_requests },
            TestCase::RetPartialFollowedByAbort => Self::PartialThenAbort {
                num_requests,
                fired: 0,
            },
            TestCase::RetPartialMultipleUntilSuccess => Self::PartialUntilSuccess {
                num_requests,
                fired: 0,
            },
            TestCase::RetPartialMaxFailIdx => Self::PartialMaxFailIndex { max_packed },
            _ => Self::Disarmed,
        }
    }

    #[must_use]
    pub const fn is_armed(&self) -> bool {
        !matches!(self, Self::Disarmed)
    }

    /// Advance the script for one completion, returning the substituted verdict.
    pub const fn fire(&mut self) -> Option<CompletionVerdict> {
        match *self {
            Self::Disarmed => None,
            Self::Always { verdict } => Some(verdict),
            Self::PartialThenSuccess { num_requests } => {
                *self = Self::Disarmed;
                Some(CompletionVerdict::Partial {
                    fail_index: num_requests / 2,
                })
            }
            Self::PartialThenAbort {
                num_requests,
                fired,
            } => {
                if fired == 0 {
                    *self = Self::PartialThenAbort {
                        num_requests,
                        fired: 1,
                    };
                    Some(CompletionVerdict::Partial {
                        fail_index: num_requests / 2,
                    })
                } else {
                    *self = Self::Disarmed;
                    Some(CompletionVerdict::Abort)
                }
            }
            Self::PartialUntilSuccess {
                num_requests,
                fired,
            } => {
                let fired = fired + 1;
                *self = if fired >= num_requests {
                    Self::Disarmed
                } else {
                    Self::PartialUntilSuccess {
                        num_requests,
                        fired,
                    }
                };
                Some(CompletionVerdict::Partial { fail_index: 1 })
            }
            Self::PartialMaxFailIndex { max_packed } => {
                *self = Self::Disarmed;
                Some(CompletionVerdict::Partial {
                    fail_index: max_packed.saturating_sub(1),
                })
            }
        }
    }
}

/// Hook registered with the dispatch engine while the error-recovery group runs.
pub struct CompletionInjector {
    context: Arc<Mutex<InjectionContext>>,
    logger: HarnessLoggerHandle,
}

impl CompletionInjector {
    #[must_use]
    pub const fn new(context: Arc<Mutex<InjectionContext>>, logger: HarnessLoggerHandle) -> Self {
        Self { context, logger }
    }
}

impl PostCompletionHook for CompletionInjector {
    fn on_completion(&self, batch_len: u32) -> Option<CompletionVerdict> {
        let (case, verdict) = {
            let mut ctx = self.context.lock();
            let verdict = ctx.script.fire();
            (ctx.test_case, verdict)
        };
        if let Some(verdict) = verdict {
            self.logger
                .injector_fired(case, InjectedFault::Completion(verdict), batch_len);
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::sink::HarnessEvent;

    fn drain(script: &mut ErrorScript, calls: usize) -> Vec<Option<CompletionVerdict>> {
        (0..calls).map(|_| script.fire()).collect()
    }

    #[test]
    fn partial_then_success_fires_once_at_half() {
        let mut script = ErrorScript::for_case(TestCase::RetPartialFollowedBySuccess, 6, 8);
        assert_eq!(
            script.fire(),
            Some(CompletionVerdict::Partial { fail_index: 3 })
        );
        assert!(!script.is_armed());
        assert_eq!(script.fire(), None);
    }

    #[test]
    fn partial_then_abort_sequence() {
        let mut script = ErrorScript::for_case(TestCase::RetPartialFollowedByAbort, 7, 8);
        assert_eq!(
            drain(&mut script, 3),
            vec![
                Some(CompletionVerdict::Partial { fail_index: 3 }),
                Some(CompletionVerdict::Abort),
                None,
            ]
        );
    }

    #[test]
    fn partial_until_success_fires_n_times_at_index_one() {
        let mut script = ErrorScript::for_case(TestCase::RetPartialMultipleUntilSuccess, 4, 8);
        let fired = drain(&mut script, 6);
        let partials = fired
            .iter()
            .filter(|v| **v == Some(CompletionVerdict::Partial { fail_index: 1 }))
            .count();
        assert_eq!(partials, 4);
        assert_eq!(&fired[4..], &[None, None]);
    }

    #[test]
    fn partial_max_fail_index_uses_device_limit() {
        let mut script = ErrorScript::for_case(TestCase::RetPartialMaxFailIdx, 8, 8);
        assert_eq!(
            drain(&mut script, 2),
            vec![Some(CompletionVerdict::Partial { fail_index: 7 }), None]
        );
    }

    #[test]
    fn unconditional_scripts_never_disarm() {
        for (case, verdict) in [
            (TestCase::RetAbort, CompletionVerdict::Abort),
            (TestCase::RetRetry, CompletionVerdict::Retry),
            (TestCase::RetCmdErr, CompletionVerdict::CommandError),
            (TestCase::RetDataErr, CompletionVerdict::DataError),
        ] {
            let mut script = ErrorScript::for_case(case, 5, 8);
            assert!(drain(&mut script, 10).iter().all(|v| *v == Some(verdict)));
        }
    }

    #[test]
    fn non_recovery_cases_are_disarmed() {
        assert_eq!(
            ErrorScript::for_case(TestCase::StopDueToFlush, 6, 8),
            ErrorScript::Disarmed
        );
        assert_eq!(
            ErrorScript::for_case(TestCase::HdrInvalidVersion, 6, 8),
            ErrorScript::Disarmed
        );
    }

    #[test]
    fn hook_reports_the_verdict_as_plain_data() {
        let (logger, rx) = HarnessLoggerHandle::channel(8);
        let mut ctx = InjectionContext::new(1);
        ctx.test_case = Some(TestCase::RetPartialFollowedByAbort);
        ctx.script = ErrorScript::for_case(TestCase::RetPartialFollowedByAbort, 6, 8);
        let hook = CompletionInjector::new(Arc::new(Mutex::new(ctx)), logger);

        assert_eq!(
            hook.on_completion(6),
            Some(CompletionVerdict::Partial { fail_index: 3 })
        );
        assert_eq!(hook.on_completion(3), Some(CompletionVerdict::Abort));
        assert_eq!(hook.on_completion(3), None);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                HarnessEvent::InjectorFired {
                    case: Some(TestCase::RetPartialFollowedByAbort),
                    fault: InjectedFault::Completion(CompletionVerdict::Partial { fail_index: 3 }),
                    batch_len: 6,
                },
                HarnessEvent::InjectorFired {
                    case: Some(TestCase::RetPartialFollowedByAbort),
                    fault: InjectedFault::Completion(CompletionVerdict::Abort),
                    batch_len: 3,
                },
            ]
        );
    }
}
