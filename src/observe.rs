//! Per-trial observation reports and instrumentation ports.
//!
//! Handlers receive an immutable report after every trial, including the
//! trials the shrinker replays. They run synchronously, cannot influence
//! classification, and a panicking handler is isolated and logged rather
//! than allowed to take the session down.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use log::warn;
use serde::Serialize;

/// Timing label for memory-reclamation dwell measured by a `PauseProbe`.
pub const GC_TIMING_LABEL: &str = "overall:gc";

/// Timing label for the property-function call itself.
pub const TEST_TIMING_LABEL: &str = "execute:test";

/// Classification of one trial as reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrialStatus {
    Passed,
    Invalid,
    Overrun,
    Failed,
    DeadlineExceeded,
}

/// Immutable per-trial report handed to observation handlers.
#[derive(Debug, Clone, Serialize)]
pub struct TrialReport {
    pub status: TrialStatus,
    /// Wall-clock seconds spent in the property function.
    pub elapsed: f64,
    /// Instrumentation label to measured seconds. Values may be NaN when
    /// a probe failed to measure.
    pub timing: BTreeMap<String, f64>,
    /// Debug representation of the drawn value, when one was drawn.
    pub value_repr: Option<String>,
}

pub type TrialHandler = Box<dyn Fn(&TrialReport)>;

/// Registrable list of per-trial callbacks.
#[derive(Default)]
pub struct Observations {
    handlers: Vec<TrialHandler>,
}

impl Observations {
    pub fn new() -> Observations {
        Observations::default()
    }

    pub fn register(&mut self, handler: TrialHandler) {
        self.handlers.push(handler);
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invoke every handler. Panics are contained per handler.
    pub fn emit(&self, report: &TrialReport) {
        for handler in &self.handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(report))).is_err() {
                warn!("observation handler panicked; trial outcome unaffected");
            }
        }
    }
}

/// Instrumentation port for memory-reclamation pauses (the moral
/// equivalent of a garbage collector's dwell time). The embedding runtime
/// may install one; its absence changes nothing about classification.
///
/// `begin_trial` is called immediately before the property function,
/// `end_trial` immediately after; `end_trial` returns the dwell in
/// seconds observed during the trial. A probe that fails to measure
/// (panics) is recorded as NaN rather than corrupting the trial.
pub trait PauseProbe {
    fn begin_trial(&mut self);
    fn end_trial(&mut self) -> f64;
}

/// Drive a probe around a trial, degrading failures to NaN.
pub(crate) fn probe_begin(probe: &mut Option<Box<dyn PauseProbe>>) {
    if let Some(p) = probe {
        if catch_unwind(AssertUnwindSafe(|| p.begin_trial())).is_err() {
            warn!("pause probe failed at trial start");
        }
    }
}

pub(crate) fn probe_end(probe: &mut Option<Box<dyn PauseProbe>>) -> Option<f64> {
    let p = probe.as_mut()?;
    match catch_unwind(AssertUnwindSafe(|| p.end_trial())) {
        Ok(dwell) => Some(dwell),
        Err(_) => {
            warn!("pause probe failed to measure; recording NaN");
            Some(f64::NAN)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn report() -> TrialReport {
        TrialReport {
            status: TrialStatus::Passed,
            elapsed: 0.001,
            timing: BTreeMap::new(),
            value_repr: Some("17".to_owned()),
        }
    }

    #[test]
    fn handlers_all_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut obs = Observations::new();
        for _ in 0..3 {
            let count = Arc::clone(&count);
            obs.register(Box::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        obs.emit(&report());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_handler_is_isolated() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut obs = Observations::new();
        obs.register(Box::new(|_| panic!("handler bug")));
        {
            let count = Arc::clone(&count);
            obs.register(Box::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        obs.emit(&report());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_probe_degrades_to_nan() {
        struct Broken;
        impl PauseProbe for Broken {
            fn begin_trial(&mut self) {}
            fn end_trial(&mut self) -> f64 {
                panic!("cannot measure")
            }
        }
        let mut probe: Option<Box<dyn PauseProbe>> = Some(Box::new(Broken));
        probe_begin(&mut probe);
        let dwell = probe_end(&mut probe);
        assert!(dwell.unwrap().is_nan());
    }
}
