//! Scenario runner: `Idle -> Validating -> Preparing -> Dispatching ->
//! Verifying -> Cleanup`, once per case and randomization mode.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::core::errors::{HarnessError, Result};
use crate::engine::DriverHandle;
use crate::inject::completion::ErrorScript;
use crate::logger::sink::HarnessEvent;
use crate::stream::rng::{Lcg, seed_from_clock};

use super::catalog::{TestCase, TestGroup};
use super::recipe::{PreparedCase, prepare};
use super::session::HarnessSession;
use super::verify::{Verification, verify};

/// Where a run currently is. Every pass walks Preparing through Cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Idle,
    Validating,
    Preparing,
    Dispatching,
    Verifying,
    Cleanup,
}

/// Outcome of one pass of one case.
#[derive(Debug)]
pub enum CaseOutcome {
    Passed,
    Ignored { foreign_writes: u64 },
    Failed(HarnessError),
}

/// Aggregate result of `run_group`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarnessResult {
    pub passed: bool,
    pub failure_count: u32,
    pub ignored_rounds: u32,
    /// Passes executed (two per case per cycle).
    pub passes_run: u32,
    pub seed: u32,
    pub last_error: Option<String>,
}

impl HarnessResult {
    fn record(&mut self, outcome: &CaseOutcome) {
        self.passes_run += 1;
        match outcome {
            CaseOutcome::Passed => {}
            CaseOutcome::Ignored { .. } => self.ignored_rounds += 1,
            CaseOutcome::Failed(error) => {
                self.failure_count += 1;
                self.last_error = Some(error.to_string());
            }
        }
    }
}

impl HarnessSession {
    /// Run every case of `group` `repeat` times, a random pass then a fixed
    /// pass per case. A `repeat` of zero runs once.
    ///
    /// Returns `Err(NotSupported)` without running anything when the device
    /// cannot pack; every other failure is counted in the result.
    pub fn run_group(&self, group: TestGroup, repeat: u32) -> Result<HarnessResult> {
        let _run = self.run_lock.lock();
        let repeat = repeat.max(1);

        self.enter(RunnerState::Validating);
        let driver = match self.validate(group) {
            Ok(driver) => driver,
            Err(error) => {
                self.enter(RunnerState::Idle);
                self.logger.send(HarnessEvent::NotSupported {
                    group,
                    details: error.to_string(),
                });
                return Err(error);
            }
        };
        driver.disable_packing_control();

        let seed = {
            let mut ctx = self.context.lock();
            if ctx.random_seed == 0 {
                ctx.random_seed = seed_from_clock();
            }
            ctx.test_group = group;
            ctx.random_seed
        };
        self.logger.send(HarnessEvent::RunStarted {
            group,
            repeat,
            seed,
            config_hash: self.config.stable_hash().unwrap_or_default(),
        });

        let mut result = HarnessResult {
            seed,
            ..HarnessResult::default()
        };
        for cycle in 1..=repeat {
            self.logger.send(HarnessEvent::CycleStarted { group, cycle });
            for &case in group.cases() {
                for random in [true, false] {
                    let outcome = self.run_case(driver.as_ref(), case, random);
                    result.record(&outcome);
                }
            }
        }

        result.passed = result.failure_count == 0;
        self.enter(RunnerState::Idle);
        self.context.lock().test_group = TestGroup::None;
        self.logger.send(HarnessEvent::RunCompleted {
            group,
            passed: result.passed,
            failures: result.failure_count,
            ignored_rounds: result.ignored_rounds,
        });
        Ok(result)
    }

    fn validate(&self, group: TestGroup) -> Result<Arc<dyn DriverHandle>> {
        if group.cases().is_empty() {
            return Err(HarnessError::NotSupported {
                details: format!("group {group} has no test cases"),
            });
        }
        let driver = self.driver().ok_or_else(|| HarnessError::NotSupported {
            details: "no active request queue".to_string(),
        })?;
        if !driver.packing_capable() || driver.max_packed_writes() == 0 {
            return Err(HarnessError::NotSupported {
                details: format!(
                    "packing_capable={} max_packed_writes={}",
                    driver.packing_capable(),
                    driver.max_packed_writes()
                ),
            });
        }
        Ok(driver)
    }

    /// One pass of one case. Cleanup runs whatever happened before it.
    pub(crate) fn run_case(
        &self,
        driver: &dyn DriverHandle,
        case: TestCase,
        random: bool,
    ) -> CaseOutcome {
        let outcome = self.prepare_dispatch_verify(driver, case, random);
        self.cleanup();

        match outcome {
            Ok(Verification::Passed) => {
                self.logger.send(HarnessEvent::CasePassed { case, random });
                CaseOutcome::Passed
            }
            Ok(Verification::Ignored { foreign_writes, .. }) => {
                self.logger.send(HarnessEvent::RoundIgnored {
                    case,
                    random,
                    foreign_writes,
                });
                CaseOutcome::Ignored { foreign_writes }
            }
            Err(error) => {
                self.logger
                    .send(HarnessEvent::case_failed(case, random, &error));
                if matches!(error, HarnessError::StatsMismatch { .. }) {
                    self.dump_stats(driver, case);
                }
                CaseOutcome::Failed(error)
            }
        }
    }

    fn prepare_dispatch_verify(
        &self,
        driver: &dyn DriverHandle,
        case: TestCase,
        random: bool,
    ) -> Result<Verification> {
        self.enter(RunnerState::Preparing);
        driver.reset_statistics();
        let max_packed = driver.max_packed_writes();
        let prepared = self.prepare_case(case, random, max_packed)?;
        self.engine.set_ignore_this_round(false);
        self.arm(case.group());

        self.enter(RunnerState::Dispatching);
        let completion = self.engine.submit(&prepared.stream)?;
        self.settle();

        self.enter(RunnerState::Verifying);
        let verification = verify(self.engine.as_ref(), driver, &prepared.expected)?;
        if verification == Verification::Passed && completion.unexpected > 0 {
            return Err(HarnessError::OutcomeMismatch {
                case: case.label(),
                unexpected: completion.unexpected,
            });
        }
        Ok(verification)
    }

    fn prepare_case(&self, case: TestCase, random: bool, max_packed: u32) -> Result<PreparedCase> {
        let mut ctx = self.context.lock();
        if ctx.random_seed == 0 {
            ctx.random_seed = seed_from_clock();
        }
        let mut rng = Lcg::new(ctx.random_seed);
        let seed = rng.seed();
        let prepared = prepare(case, random, &mut rng, max_packed, &self.config.stream)?;

        ctx.random_seed = rng.seed();
        ctx.test_case = Some(case);
        ctx.expected = prepared.expected.clone();
        ctx.num_requests = prepared.recorded_requests;
        ctx.script = ErrorScript::for_case(case, prepared.num_requests, max_packed);
        drop(ctx);

        self.logger.send(HarnessEvent::CaseStarted {
            case,
            random,
            seed,
            num_requests: prepared.num_requests,
        });
        Ok(prepared)
    }

    fn dump_stats(&self, driver: &dyn DriverHandle, case: TestCase) {
        let snapshot = driver.packing_statistics().snapshot();
        let stats = serde_json::to_string(&snapshot).unwrap_or_else(|e| format!("<{e}>"));
        self.logger.send(HarnessEvent::StatsDump { case, stats });
    }

    fn settle(&self) {
        let delay = self.config.run.settle_delay_ms;
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::engine::DispatchEngine;
    use crate::engine::sim::SimulatedEngine;
    use crate::logger::sink::HarnessLoggerHandle;

    fn session(config: Config) -> (HarnessSession, Arc<SimulatedEngine>) {
        let engine = Arc::new(SimulatedEngine::new(&config).unwrap());
        let dyn_engine: Arc<dyn DispatchEngine> = engine.clone();
        (
            HarnessSession::new(dyn_engine, config, HarnessLoggerHandle::disabled()),
            engine,
        )
    }

    fn quick_config() -> Config {
        let mut cfg = Config::default();
        cfg.run.settle_delay_ms = 0;
        cfg.run.random_seed = 4242;
        cfg
    }

    #[test]
    fn packing_group_passes_against_simulated_driver() {
        let (session, _) = session(quick_config());
        let result = session.run_group(TestGroup::PackingBehavior, 1).unwrap();
        assert!(result.passed, "{:?}", result.last_error);
        assert_eq!(result.passes_run, 14);
    }

    #[test]
    fn zero_repeat_runs_once() {
        let (session, _) = session(quick_config());
        let result = session.run_group(TestGroup::ErrorRecovery, 0).unwrap();
        assert_eq!(result.passes_run, 16);
    }

    #[test]
    fn cleanup_runs_after_every_case() {
        let (session, engine) = session(quick_config());
        session.run_group(TestGroup::InvalidCommand, 1).unwrap();
        assert_eq!(session.state(), RunnerState::Idle);
        assert_eq!(engine.hooks_armed(), (false, false));
        assert!(session.context().test_case.is_none());
        session.cleanup();
        session.cleanup();
        assert_eq!(session.state(), RunnerState::Cleanup);
        assert_eq!(engine.hooks_armed(), (false, false));
    }

    #[test]
    fn not_supported_runs_nothing() {
        let mut cfg = quick_config();
        cfg.device.packing_capable = false;
        let (session, engine) = session(cfg);
        let err = session.run_group(TestGroup::PackingBehavior, 1).unwrap_err();
        assert_eq!(err.code(), "PCH-1001");
        assert!(engine.driver().packing_control_enabled());
    }

    #[test]
    fn general_group_is_not_runnable() {
        let (session, _) = session(quick_config());
        assert!(session.run_group(TestGroup::General, 1).is_err());
    }

    #[test]
    fn zero_seed_is_replaced_before_use() {
        let mut cfg = quick_config();
        cfg.run.random_seed = 0;
        let (session, _) = session(cfg);
        let result = session.run_group(TestGroup::PackingBehavior, 1).unwrap();
        assert_ne!(result.seed, 0);
        assert_ne!(session.seed(), 0);
    }

    #[test]
    fn disabled_stats_fail_every_pass() {
        let mut cfg = quick_config();
        cfg.device.stats_enabled = false;
        let (session, _) = session(cfg);
        let result = session.run_group(TestGroup::PackingBehavior, 1).unwrap();
        assert!(!result.passed);
        assert_eq!(result.failure_count, 14);
        assert!(result.last_error.unwrap().contains("PCH-3001"));
    }

    #[test]
    fn seed_reaching_zero_mid_run_is_replaced() {
        let (logger, rx) = HarnessLoggerHandle::channel(8);
        let engine: Arc<dyn DispatchEngine> =
            Arc::new(SimulatedEngine::new(&quick_config()).unwrap());
        let session = HarnessSession::new(engine, quick_config(), logger);
        session.context.lock().random_seed = 0;

        session
            .prepare_case(TestCase::StopDueToEmptyQueue, true, 8)
            .unwrap();
        let Ok(HarnessEvent::CaseStarted { seed, .. }) = rx.try_recv() else {
            panic!("expected a case_started event");
        };
        assert_ne!(seed, 0);
    }

    #[test]
    fn threshold_case_records_the_batch_limit() {
        let (session, _) = session(quick_config());
        let prepared = session
            .prepare_case(TestCase::StopDueToThreshold, false, 8)
            .unwrap();
        assert_eq!(prepared.stream.len(), 9);
        assert_eq!(session.context().num_requests, 8);
    }
}
