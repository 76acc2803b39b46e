//! Harness session: the single injection context plus everything a run needs.

#![allow(missing_docs)]

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::config::Config;
use crate::engine::{DispatchEngine, DriverHandle, PostCompletionHook, PreSubmissionHook};
use crate::inject::completion::{CompletionInjector, ErrorScript};
use crate::inject::header::HeaderInjector;
use crate::logger::sink::HarnessLoggerHandle;
use crate::stats::ExpectedStats;

use super::catalog::{ArmedInjector, TestCase, TestGroup};
use super::runner::RunnerState;

/// Mutable per-run state shared with the injector callbacks.
///
/// `test_case` is set before either injector can fire and only changes
/// between dispatches.
#[derive(Debug, Clone)]
pub struct InjectionContext {
    pub test_group: TestGroup,
    pub test_case: Option<TestCase>,
    pub random_seed: u32,
    pub script: ErrorScript,
    pub expected: ExpectedStats,
    pub num_requests: u32,
}

impl InjectionContext {
    #[must_use]
    pub fn new(random_seed: u32) -> Self {
        Self {
            test_group: TestGroup::None,
            test_case: None,
            random_seed,
            script: ErrorScript::Disarmed,
            expected: ExpectedStats::new(0),
            num_requests: 0,
        }
    }
}

/// One harness instance bound to a dispatch engine. Runs are serialized on
/// `run_lock`; the seed is shared by every group.
pub struct HarnessSession {
    pub(crate) engine: Arc<dyn DispatchEngine>,
    pub(crate) config: Config,
    pub(crate) logger: HarnessLoggerHandle,
    pub(crate) context: Arc<Mutex<InjectionContext>>,
    pub(crate) run_lock: Mutex<()>,
    state: Mutex<RunnerState>,
    header_hook: Arc<HeaderInjector>,
    completion_hook: Arc<CompletionInjector>,
}

impl HarnessSession {
    #[must_use]
    pub fn new(
        engine: Arc<dyn DispatchEngine>,
        config: Config,
        logger: HarnessLoggerHandle,
    ) -> Self {
        let context = Arc::new(Mutex::new(InjectionContext::new(config.run.random_seed)));
        let header_hook = Arc::new(HeaderInjector::new(Arc::clone(&context), logger.clone()));
        let completion_hook = Arc::new(CompletionInjector::new(
            Arc::clone(&context),
            logger.clone(),
        ));
        Self {
            engine,
            config,
            logger,
            context,
            run_lock: Mutex::new(()),
            state: Mutex::new(RunnerState::Idle),
            header_hook,
            completion_hook,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn logger(&self) -> &HarnessLoggerHandle {
        &self.logger
    }

    #[must_use]
    pub fn engine(&self) -> Arc<dyn DispatchEngine> {
        Arc::clone(&self.engine)
    }

    /// Snapshot of the injection context.
    #[must_use]
    pub fn context(&self) -> InjectionContext {
        self.context.lock().clone()
    }

    /// Where the runner currently is.
    #[must_use]
    pub fn state(&self) -> RunnerState {
        *self.state.lock()
    }

    pub(crate) fn enter(&self, state: RunnerState) {
        *self.state.lock() = state;
    }

    pub(crate) fn driver(&self) -> Option<Arc<dyn DriverHandle>> {
        self.engine.active_queue()
    }

    /// Current random seed. Zero means one is derived from the clock at the next run.
    #[must_use]
    pub fn seed(&self) -> u32 {
        let _run = self.run_lock.lock();
        self.context.lock().random_seed
    }

    /// Replace the random seed. Waits for an in-flight run to finish.
    pub fn set_seed(&self, seed: u32) {
        let _run = self.run_lock.lock();
        self.context.lock().random_seed = seed;
    }

    /// Register the injector appropriate to `group` with the engine.
    pub(crate) fn arm(&self, group: TestGroup) {
        match group.armed_injector() {
            ArmedInjector::PreSubmission => {
                let hook: Arc<dyn PreSubmissionHook> = self.header_hook.clone();
                self.engine.set_pre_submission_hook(Some(hook));
            }
            ArmedInjector::PostCompletion => {
                let hook: Arc<dyn PostCompletionHook> = self.completion_hook.clone();
                self.engine.set_post_completion_hook(Some(hook));
            }
            ArmedInjector::Neither => {}
        }
    }

    /// Disarm both injectors and clear the armed case. Safe to call repeatedly.
    pub fn cleanup(&self) {
        self.enter(RunnerState::Cleanup);
        self.engine.set_pre_submission_hook(None);
        self.engine.set_post_completion_hook(None);
        let mut ctx = self.context.lock();
        ctx.test_case = None;
        ctx.script = ErrorScript::Disarmed;
    }
}

impl std::fmt::Debug for HarnessSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessSession")
            .field("context", &*self.context.lock())
            .finish_non_exhaustive()
    }
}
