//! Session runner: trial execution, classification, and the
//! deadline/flaky policy.
//!
//! The runner drives `Sampling -> Shrinking -> Done`, with an early exit
//! to `Done` when the discard budget shows the strategy is unsatisfiable.
//! Trials run strictly sequentially; the property function is treated as
//! an opaque blocking call, timed from the moment control is handed to it
//! until it returns or panics. Strategy draw time is deliberately outside
//! the timed window.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::data::{DataSource, DrawError, DrawNode, DEFAULT_MAX_LENGTH};
use crate::errors::EngineError;
use crate::observe::{
    probe_begin, probe_end, Observations, PauseProbe, TrialHandler, TrialReport, TrialStatus,
    GC_TIMING_LABEL, TEST_TIMING_LABEL,
};
use crate::shrinking::{ShrinkError, Shrinker};
use crate::strategy::Strategy;

/// Exploratory trials only flag a deadline breach beyond
/// `deadline * GRACE_NUM / GRACE_DEN`; confirmation replays use the exact
/// deadline. Flagging aggressively at confirmation while allowing slack
/// during exploration keeps marginally slow trials from flickering in
/// repeated sampling.
pub const DEADLINE_GRACE_NUM: u32 = 5;
pub const DEADLINE_GRACE_DEN: u32 = 4;

/// Per-trial wall-clock budget for the property function, or disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Duration>);

impl Deadline {
    /// Build from a millisecond count. Non-finite or non-positive values
    /// are rejected before any trial runs.
    pub fn from_millis(ms: f64) -> Result<Deadline, EngineError> {
        if !ms.is_finite() || ms <= 0.0 {
            return Err(EngineError::invalid_argument(format!(
                "deadline must be a positive number of milliseconds, got {ms}"
            )));
        }
        Ok(Deadline(Some(Duration::from_secs_f64(ms / 1000.0))))
    }

    pub fn from_duration(d: Duration) -> Deadline {
        Deadline(Some(d))
    }

    /// No deadline: a trial may run arbitrarily long.
    pub fn disabled() -> Deadline {
        Deadline(None)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.0
    }

    pub fn is_disabled(&self) -> bool {
        self.0.is_none()
    }
}

impl Default for Deadline {
    fn default() -> Deadline {
        Deadline(Some(Duration::from_millis(200)))
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Valid trials required before the session reports `AllPassed`.
    pub max_examples: u32,
    /// Discarded (invalid or overrun) trials tolerated before the session
    /// reports `Unsatisfiable`.
    pub max_discards: u32,
    pub deadline: Deadline,
    pub seed: u64,
    /// Buffer replayed (and extended with fresh bytes) for the first
    /// trial, for reproducing a previously seen failure.
    pub replay: Option<Vec<u8>>,
    /// Byte budget per trial.
    pub max_length: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_examples: 100,
            max_discards: 1000,
            deadline: Deadline::default(),
            seed: 0,
            replay: None,
            max_length: DEFAULT_MAX_LENGTH,
        }
    }
}

/// Why a property function failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyFailure {
    /// The property returned false.
    Falsified,
    /// The property panicked; payload preserved verbatim.
    Panic(String),
}

impl fmt::Display for PropertyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyFailure::Falsified => write!(f, "property returned false"),
            PropertyFailure::Panic(msg) => write!(f, "property panicked: {msg}"),
        }
    }
}

/// The class of failure a counterexample reproduces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureClass {
    Property(PropertyFailure),
    DeadlineExceeded,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::Property(p) => write!(f, "{p}"),
            FailureClass::DeadlineExceeded => write!(f, "exceeded the deadline"),
        }
    }
}

/// A failure that did not reproduce on an immediate replay of the same
/// buffer. Always fatal to the session: it means either real test
/// nondeterminism or an engine bug, and both need the user's attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlakyDiagnostic {
    /// Timing flakiness: the trial breached the deadline once but not on
    /// replay.
    UnreliableTiming {
        first: Duration,
        replay: Duration,
        deadline: Duration,
    },
    /// Value flakiness: the failure itself did not recur.
    UnreliableOutcome { first: String, replay: String },
}

impl fmt::Display for FlakyDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlakyDiagnostic::UnreliableTiming {
                first,
                replay,
                deadline,
            } => write!(
                f,
                "unreliable test timing: took {first:?} on the first run and {replay:?} on \
                 replay, with a deadline of {deadline:?}"
            ),
            FlakyDiagnostic::UnreliableOutcome { first, replay } => write!(
                f,
                "unreliable test outcome: {first} on the first run, {replay} on replay"
            ),
        }
    }
}

/// One minimal or original counterexample.
#[derive(Debug, Clone)]
pub struct Counterexample<T> {
    pub value: T,
    pub value_repr: String,
    pub buffer: Vec<u8>,
}

/// Result of a whole session.
#[derive(Debug)]
pub enum SessionResult<T> {
    AllPassed,
    Falsified {
        minimal: Counterexample<T>,
        original: Counterexample<T>,
        classification: FailureClass,
    },
    Unsatisfiable,
    Flaky {
        diagnostic: FlakyDiagnostic,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TrialOutcome {
    Pass,
    Invalid,
    Overrun,
    Failed(PropertyFailure),
    DeadlineExceeded,
}

impl TrialOutcome {
    fn status(&self) -> TrialStatus {
        match self {
            TrialOutcome::Pass => TrialStatus::Passed,
            TrialOutcome::Invalid => TrialStatus::Invalid,
            TrialOutcome::Overrun => TrialStatus::Overrun,
            TrialOutcome::Failed(_) => TrialStatus::Failed,
            TrialOutcome::DeadlineExceeded => TrialStatus::DeadlineExceeded,
        }
    }

    fn describe(&self) -> String {
        match self {
            TrialOutcome::Pass => "passed".to_owned(),
            TrialOutcome::Invalid => "discarded (invalid)".to_owned(),
            TrialOutcome::Overrun => "discarded (overrun)".to_owned(),
            TrialOutcome::Failed(f) => format!("failed: {f}"),
            TrialOutcome::DeadlineExceeded => "exceeded the deadline".to_owned(),
        }
    }
}

struct Trial<T> {
    outcome: TrialOutcome,
    value: Option<T>,
    record: Vec<u8>,
    nodes: Vec<DrawNode>,
    elapsed: Duration,
}

/// Drives one session: sampling, confirmation, shrinking.
pub struct Runner<S, F> {
    strategy: S,
    property: F,
    config: Config,
    observations: Observations,
    probe: Option<Box<dyn PauseProbe>>,
    master_rng: ChaCha8Rng,
}

impl<S, F> Runner<S, F>
where
    S: Strategy,
    S::Value: fmt::Debug,
    F: Fn(&S::Value) -> bool,
{
    pub fn new(strategy: S, property: F, config: Config) -> Runner<S, F> {
        let master_rng = ChaCha8Rng::seed_from_u64(config.seed);
        Runner {
            strategy,
            property,
            config,
            observations: Observations::new(),
            probe: None,
            master_rng,
        }
    }

    /// Register an observation handler, fired once per trial.
    pub fn on_trial(&mut self, handler: TrialHandler) {
        self.observations.register(handler);
    }

    /// Install the optional memory-pause instrumentation probe.
    pub fn set_pause_probe(&mut self, probe: Box<dyn PauseProbe>) {
        self.probe = Some(probe);
    }

    /// Run the session to completion.
    pub fn run(&mut self) -> SessionResult<S::Value> {
        let mut valid = 0u32;
        let mut discards = 0u32;
        let mut replay_seed = self.config.replay.take();

        while valid < self.config.max_examples {
            let source = match replay_seed.take() {
                Some(buffer) => {
                    let seed = self.master_rng.gen();
                    DataSource::with_prefix(seed, buffer, self.config.max_length)
                }
                None => DataSource::random(self.master_rng.gen(), self.config.max_length),
            };
            let trial = self.execute(source, false);
            match &trial.outcome {
                TrialOutcome::Pass => valid += 1,
                TrialOutcome::Invalid | TrialOutcome::Overrun => {
                    discards += 1;
                    if discards >= self.config.max_discards {
                        info!("discard budget exhausted after {valid} valid trials");
                        return SessionResult::Unsatisfiable;
                    }
                }
                TrialOutcome::Failed(_) | TrialOutcome::DeadlineExceeded => {
                    debug!("candidate failure after {valid} valid trials; confirming");
                    return self.investigate(trial);
                }
            }
        }
        SessionResult::AllPassed
    }

    /// Replay a candidate failure once before believing it, then shrink.
    fn investigate(&mut self, first: Trial<S::Value>) -> SessionResult<S::Value> {
        let confirm = self.execute(
            DataSource::replay(first.record.clone(), self.config.max_length),
            true,
        );
        let class = match (&first.outcome, &confirm.outcome) {
            (TrialOutcome::DeadlineExceeded, TrialOutcome::DeadlineExceeded) => {
                FailureClass::DeadlineExceeded
            }
            // A failure only confirms when the replay fails the same way;
            // a panic that turns into a plain false (or vice versa) is as
            // unreliable as a failure that turns into a pass.
            (TrialOutcome::Failed(f), TrialOutcome::Failed(g))
                if matches!(
                    (f, g),
                    (PropertyFailure::Falsified, PropertyFailure::Falsified)
                        | (PropertyFailure::Panic(_), PropertyFailure::Panic(_))
                ) =>
            {
                FailureClass::Property(g.clone())
            }
            (TrialOutcome::DeadlineExceeded, _) => {
                let deadline = self
                    .config
                    .deadline
                    .duration()
                    .unwrap_or(Duration::ZERO);
                return SessionResult::Flaky {
                    diagnostic: FlakyDiagnostic::UnreliableTiming {
                        first: first.elapsed,
                        replay: confirm.elapsed,
                        deadline,
                    },
                };
            }
            (TrialOutcome::Failed(f), _) => {
                return SessionResult::Flaky {
                    diagnostic: FlakyDiagnostic::UnreliableOutcome {
                        first: format!("failed: {f}"),
                        replay: confirm.outcome.describe(),
                    },
                };
            }
            _ => unreachable!("investigate called without a failing trial"),
        };

        let original = match confirm.value {
            Some(value) => Counterexample {
                value_repr: format!("{value:?}"),
                value,
                buffer: confirm.record.clone(),
            },
            None => {
                // A confirmed failure implies the draw completed.
                return SessionResult::Flaky {
                    diagnostic: FlakyDiagnostic::UnreliableOutcome {
                        first: first.outcome.describe(),
                        replay: confirm.outcome.describe(),
                    },
                };
            }
        };

        info!("failure confirmed ({class}); shrinking");
        self.shrink_and_report(original, class, confirm.record, confirm.nodes)
    }

    fn shrink_and_report(
        &mut self,
        original: Counterexample<S::Value>,
        class: FailureClass,
        record: Vec<u8>,
        nodes: Vec<DrawNode>,
    ) -> SessionResult<S::Value> {
        let shrinker = Shrinker::new(record, nodes);
        let max_length = self.config.max_length;
        let target = class.clone();
        let shrunk = {
            let mut oracle = |buffer: &[u8]| {
                let trial = self.execute_oracle(buffer.to_vec(), max_length);
                if class_matches(&trial.outcome, &target) {
                    Some((trial.record, trial.nodes))
                } else {
                    None
                }
            };
            shrinker.shrink(&mut oracle)
        };

        let minimal_buffer = match shrunk {
            Ok((buffer, _)) => buffer,
            Err(ShrinkError::FlakyOracle) => {
                return SessionResult::Flaky {
                    diagnostic: FlakyDiagnostic::UnreliableOutcome {
                        first: format!("failed: {class}"),
                        replay: "no longer reproduces during shrinking".to_owned(),
                    },
                };
            }
        };

        // Last oracle check with the exact deadline: the reported example
        // must reproduce before we hand it to the caller.
        let fin = self.execute(
            DataSource::replay(minimal_buffer.clone(), self.config.max_length),
            true,
        );
        match (class_matches(&fin.outcome, &class), fin.value) {
            (true, Some(value)) => SessionResult::Falsified {
                minimal: Counterexample {
                    value_repr: format!("{value:?}"),
                    value,
                    buffer: fin.record,
                },
                original,
                classification: class,
            },
            _ => SessionResult::Flaky {
                diagnostic: FlakyDiagnostic::UnreliableOutcome {
                    first: format!("failed: {class}"),
                    replay: fin.outcome.describe(),
                },
            },
        }
    }

    fn execute_oracle(&mut self, buffer: Vec<u8>, max_length: usize) -> Trial<S::Value> {
        self.execute(DataSource::replay(buffer, max_length), false)
    }

    /// Run one trial: draw, time the property call, classify, freeze,
    /// report. `exact_deadline` selects the confirmation-time deadline
    /// instead of the exploratory one.
    fn execute(&mut self, mut source: DataSource, exact_deadline: bool) -> Trial<S::Value> {
        let drawn = self.strategy.draw(&mut source);
        let (outcome, value, elapsed, dwell) = match drawn {
            Err(DrawError::Overrun) => (TrialOutcome::Overrun, None, Duration::ZERO, None),
            Err(DrawError::FilterRejected { path }) => {
                debug!("trial invalid: filter rejected at `{path}`");
                (TrialOutcome::Invalid, None, Duration::ZERO, None)
            }
            Err(DrawError::Frozen) => {
                debug!("draw on frozen source; discarding trial");
                (TrialOutcome::Invalid, None, Duration::ZERO, None)
            }
            Ok(value) => {
                probe_begin(&mut self.probe);
                let property = &self.property;
                let start = Instant::now();
                let result = catch_unwind(AssertUnwindSafe(|| property(&value)));
                let elapsed = start.elapsed();
                let dwell = probe_end(&mut self.probe);
                let outcome = if self.breaches_deadline(elapsed, exact_deadline) {
                    // Takes precedence over any failure in the same trial.
                    TrialOutcome::DeadlineExceeded
                } else {
                    match result {
                        Ok(true) => TrialOutcome::Pass,
                        Ok(false) => TrialOutcome::Failed(PropertyFailure::Falsified),
                        Err(payload) => TrialOutcome::Failed(PropertyFailure::Panic(
                            panic_message(payload.as_ref()),
                        )),
                    }
                };
                (outcome, Some(value), elapsed, dwell)
            }
        };
        if matches!(
            outcome,
            TrialOutcome::Failed(_) | TrialOutcome::DeadlineExceeded
        ) {
            source.mark_interesting();
        }
        source.freeze();

        let mut timing = std::collections::BTreeMap::new();
        timing.insert(TEST_TIMING_LABEL.to_owned(), elapsed.as_secs_f64());
        if let Some(dwell) = dwell {
            timing.insert(GC_TIMING_LABEL.to_owned(), dwell);
        }
        self.observations.emit(&TrialReport {
            status: outcome.status(),
            elapsed: elapsed.as_secs_f64(),
            timing,
            value_repr: value.as_ref().map(|v| format!("{v:?}")),
        });

        Trial {
            outcome,
            value,
            record: source.record().to_vec(),
            nodes: source.nodes().to_vec(),
            elapsed,
        }
    }

    fn breaches_deadline(&self, elapsed: Duration, exact: bool) -> bool {
        match self.config.deadline.duration() {
            None => false,
            Some(deadline) => {
                let limit = if exact {
                    deadline
                } else {
                    deadline * DEADLINE_GRACE_NUM / DEADLINE_GRACE_DEN
                };
                elapsed > limit
            }
        }
    }
}

fn class_matches(outcome: &TrialOutcome, class: &FailureClass) -> bool {
    match (outcome, class) {
        (TrialOutcome::DeadlineExceeded, FailureClass::DeadlineExceeded) => true,
        (TrialOutcome::Failed(PropertyFailure::Falsified), FailureClass::Property(PropertyFailure::Falsified)) => true,
        (TrialOutcome::Failed(PropertyFailure::Panic(_)), FailureClass::Property(PropertyFailure::Panic(_))) => true,
        _ => false,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Run a session over `strategy` and `property` under `config`.
pub fn run<S, F>(strategy: S, property: F, config: Config) -> SessionResult<S::Value>
where
    S: Strategy,
    S::Value: fmt::Debug,
    F: Fn(&S::Value) -> bool,
{
    Runner::new(strategy, property, config).run()
}
