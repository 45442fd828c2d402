//! Falsify: a byte-stream property testing engine.
//!
//! Test values are decoded from a buffer of bytes, so every generated
//! value can be replayed from its buffer and minimized by rewriting the
//! buffer. The pieces fit together as:
//!
//! * [`data`] - the draw engine: a `DataSource` serves bytes from a PRNG
//!   or a recorded buffer and keeps a typed record of every draw.
//! * [`strategy`] - composable descriptions of how to turn draws into
//!   values, with `map`, `filter` and semantic filter hints.
//! * [`engine`] - the runner: samples trials, classifies failures,
//!   confirms them by replay, and reports a minimal counterexample.
//! * [`shrinking`] - buffer-level minimization against a reproduction
//!   oracle.

pub mod data;
pub mod distributions;
pub mod engine;
pub mod errors;
pub mod intervals;
pub mod observe;
pub mod shrinking;
pub mod strategy;
pub mod strings;

pub use data::{DataSource, DrawError, Status, DEFAULT_MAX_LENGTH};
pub use engine::{
    run, Config, Counterexample, Deadline, FailureClass, FlakyDiagnostic, PropertyFailure, Runner,
    SessionResult,
};
pub use errors::EngineError;
pub use intervals::IntervalSet;
pub use observe::{PauseProbe, TrialReport, TrialStatus};
pub use strategy::{booleans, integers, vecs, FilterHint, Strategy};
pub use strings::{identifiers, text, CharStrategy, IdentifierStrategy, TextStrategy};
