//! Per-trial byte stream and primitive draw operations.
//!
//! A `DataSource` owns the byte record for exactly one trial. Bytes come
//! from a replay prefix first (when one was supplied) and then from a
//! seeded ChaCha8 generator; in pure-replay mode there is no generator and
//! running past the prefix is an overrun. Every primitive draw appends a
//! `DrawNode` describing the consumed byte range and the decoded value,
//! which is the structure the shrinker mutates later.
//!
//! Determinism invariant: a draw's result is a pure function of the bytes
//! it consumes. Replaying a recorded buffer reproduces bit-identical
//! values and an identical node sequence.

use byteorder::{BigEndian, ByteOrder};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use thiserror::Error;

use crate::intervals::IntervalSet;

/// Cap on bytes a single trial may consume.
pub const DEFAULT_MAX_LENGTH: usize = 8 * 1024;

/// Terminal state of a data source. Ordering matters: later variants are
/// "better" outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Status {
    /// Ran out of bytes mid-draw; the trial is discarded.
    Overrun = 0,
    /// A strategy rejected draws past its retry budget; discarded.
    Invalid = 1,
    /// All draws completed and the property function ran.
    Valid = 2,
    /// The trial failed and is a shrink candidate.
    Interesting = 3,
}

/// What a recorded draw was, for shrink targeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawKind {
    /// Fixed-size byte block.
    Bytes,
    /// Weighted boolean.
    Boolean,
    /// Bounded integer, decoded big-endian; all-zero bytes decode to the
    /// lower bound.
    Integer,
    /// Ordinal index into an interval set; index 0 is the lowest
    /// codepoint, so zeroing the span simplifies the character.
    CharIndex,
    /// One "continue the sequence?" decision inside a repeated draw.
    RepeatFlag,
}

/// Decoded result of one draw.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawValue {
    Bytes(Vec<u8>),
    Boolean(bool),
    Integer(i64),
    Char(char),
}

/// One entry in the draw history: operation kind, the consumed byte range
/// `start..end` within the record, and the decoded value.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawNode {
    pub kind: DrawKind,
    pub start: usize,
    pub end: usize,
    pub value: DrawValue,
}

impl DrawNode {
    pub fn span_len(&self) -> usize {
        self.end - self.start
    }
}

/// Recoverable per-trial draw failures. These classify the trial, they do
/// not abort the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrawError {
    #[error("ran out of bytes while drawing")]
    Overrun,
    #[error("filter rejected too many draws at `{path}`")]
    FilterRejected { path: String },
    #[error("draw on a frozen data source")]
    Frozen,
}

enum ByteMode {
    /// Fresh pseudorandom bytes once the prefix is exhausted.
    Generate(Box<ChaCha8Rng>),
    /// Prefix only; running past it is an overrun.
    Replay,
}

/// Byte buffer, cursor, and draw history for a single trial.
pub struct DataSource {
    mode: ByteMode,
    prefix: Vec<u8>,
    record: Vec<u8>,
    max_length: usize,
    status: Status,
    nodes: Vec<DrawNode>,
    labels: Vec<&'static str>,
    frozen: bool,
}

impl DataSource {
    /// A generating source: no prefix, fresh bytes from `seed`.
    pub fn random(seed: u64, max_length: usize) -> DataSource {
        DataSource::with_prefix(seed, Vec::new(), max_length)
    }

    /// A generating source that replays `prefix` before drawing fresh
    /// bytes. Used when a corpus buffer seeds the first trial.
    pub fn with_prefix(seed: u64, prefix: Vec<u8>, max_length: usize) -> DataSource {
        DataSource {
            mode: ByteMode::Generate(Box::new(ChaCha8Rng::seed_from_u64(seed))),
            prefix,
            record: Vec::new(),
            max_length,
            status: Status::Valid,
            nodes: Vec::new(),
            labels: Vec::new(),
            frozen: false,
        }
    }

    /// A pure-replay source over a previously recorded buffer. Draws past
    /// the end overrun rather than inventing new bytes, so a shrunk buffer
    /// can never grow back.
    pub fn replay(buffer: Vec<u8>, max_length: usize) -> DataSource {
        DataSource {
            mode: ByteMode::Replay,
            prefix: buffer,
            record: Vec::new(),
            max_length,
            status: Status::Valid,
            nodes: Vec::new(),
            labels: Vec::new(),
            frozen: false,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Bytes consumed so far. After `freeze` this is the replay seed.
    pub fn record(&self) -> &[u8] {
        &self.record
    }

    pub fn nodes(&self) -> &[DrawNode] {
        &self.nodes
    }

    /// Finalize the record and draw history. Further draws fail with
    /// `DrawError::Frozen`.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Mark the trial invalid (a rejection budget ran out).
    pub fn mark_invalid(&mut self) {
        if self.status == Status::Valid {
            self.status = Status::Invalid;
        }
    }

    /// Mark the trial a shrink candidate.
    pub fn mark_interesting(&mut self) {
        if self.status == Status::Valid {
            self.status = Status::Interesting;
        }
    }

    /// Run `f` with `label` pushed onto the diagnostic stack. The label is
    /// popped on every non-panicking exit path; a panic discards the whole
    /// source, so balance is preserved trial-wide. The stack lives on the
    /// source itself, never in shared state.
    pub fn with_label<R>(
        &mut self,
        label: &'static str,
        f: impl FnOnce(&mut DataSource) -> R,
    ) -> R {
        self.labels.push(label);
        let out = f(self);
        self.labels.pop();
        out
    }

    /// Current diagnostic label path, innermost last.
    pub fn label_path(&self) -> String {
        self.labels.join("/")
    }

    fn take(&mut self, n: usize) -> Result<usize, DrawError> {
        if self.frozen {
            return Err(DrawError::Frozen);
        }
        if self.status == Status::Overrun {
            return Err(DrawError::Overrun);
        }
        if self.record.len() + n > self.max_length {
            self.status = Status::Overrun;
            return Err(DrawError::Overrun);
        }
        let start = self.record.len();
        for _ in 0..n {
            let pos = self.record.len();
            if pos < self.prefix.len() {
                self.record.push(self.prefix[pos]);
            } else {
                match &mut self.mode {
                    ByteMode::Generate(rng) => self.record.push(rng.gen()),
                    ByteMode::Replay => {
                        self.status = Status::Overrun;
                        return Err(DrawError::Overrun);
                    }
                }
            }
        }
        Ok(start)
    }

    fn push_node(&mut self, kind: DrawKind, start: usize, value: DrawValue) {
        self.nodes.push(DrawNode {
            kind,
            start,
            end: self.record.len(),
            value,
        });
    }

    /// Draw a fixed-size block of bytes.
    pub fn draw_bytes(&mut self, n: usize) -> Result<Vec<u8>, DrawError> {
        let start = self.take(n)?;
        let out = self.record[start..].to_vec();
        self.push_node(DrawKind::Bytes, start, DrawValue::Bytes(out.clone()));
        Ok(out)
    }

    /// Draw a boolean that is true with probability `p`. Degenerate
    /// probabilities consume no bytes. An all-zero span decodes to false,
    /// so zeroing a boolean simplifies it.
    pub fn draw_boolean(&mut self, p: f64) -> Result<bool, DrawError> {
        self.draw_boolean_kind(p, DrawKind::Boolean)
    }

    pub(crate) fn draw_boolean_kind(&mut self, p: f64, kind: DrawKind) -> Result<bool, DrawError> {
        if self.frozen {
            return Err(DrawError::Frozen);
        }
        if self.status == Status::Overrun {
            return Err(DrawError::Overrun);
        }
        if p <= 0.0 {
            let start = self.record.len();
            self.push_node(kind, start, DrawValue::Boolean(false));
            return Ok(false);
        }
        if p >= 1.0 {
            let start = self.record.len();
            self.push_node(kind, start, DrawValue::Boolean(true));
            return Ok(true);
        }
        let start = self.take(8)?;
        let raw = BigEndian::read_u64(&self.record[start..start + 8]);
        // true requires a large raw value, so zeroed bytes decode to the
        // simpler outcome.
        let threshold = ((1.0 - p) * u64::MAX as f64) as u64;
        let result = raw > threshold;
        self.push_node(kind, start, DrawValue::Boolean(result));
        Ok(result)
    }

    /// Draw a uniform integer in `[min, max]`. The span decodes big-endian
    /// with all-zero bytes mapping to `min`.
    pub fn draw_integer(&mut self, min: i64, max: i64) -> Result<i64, DrawError> {
        debug_assert!(min <= max);
        let range = (max as i128 - min as i128) as u128 + 1;
        let offset = self.draw_index(range, DrawKind::Integer)?;
        let value = (min as i128 + offset as i128) as i64;
        if let Some(node) = self.nodes.last_mut() {
            node.value = DrawValue::Integer(value);
        }
        Ok(value)
    }

    /// Weighted integer starting at `min`, one weight per value. Zeroed
    /// bytes select `min`. Callers validate the weight table.
    pub fn draw_integer_weighted(&mut self, min: i64, weights: &[f64]) -> Result<i64, DrawError> {
        debug_assert!(!weights.is_empty());
        let start = self.take(8)?;
        let raw = BigEndian::read_u64(&self.record[start..start + 8]);
        let total: f64 = weights.iter().sum();
        let target = raw as f64 / u64::MAX as f64 * total;
        let mut acc = 0.0;
        let mut chosen = weights.len() - 1;
        for (i, w) in weights.iter().enumerate() {
            acc += w;
            if target < acc {
                chosen = i;
                break;
            }
        }
        let value = min + chosen as i64;
        self.push_node(DrawKind::Integer, start, DrawValue::Integer(value));
        Ok(value)
    }

    /// Draw an ordinal index in `[0, range)` using the minimal number of
    /// bytes that covers the range.
    fn draw_index(&mut self, range: u128, kind: DrawKind) -> Result<u64, DrawError> {
        if range <= 1 {
            if self.frozen {
                return Err(DrawError::Frozen);
            }
            if self.status == Status::Overrun {
                return Err(DrawError::Overrun);
            }
            let start = self.record.len();
            self.push_node(kind, start, DrawValue::Integer(0));
            return Ok(0);
        }
        let bits = 128 - (range - 1).leading_zeros();
        let nbytes = ((bits + 7) / 8) as usize;
        let start = self.take(nbytes)?;
        let mut raw = 0u128;
        for &b in &self.record[start..start + nbytes] {
            raw = (raw << 8) | b as u128;
        }
        let offset = (raw % range) as u64;
        self.push_node(kind, start, DrawValue::Integer(offset as i64));
        Ok(offset)
    }

    /// Draw one character from an interval set.
    pub fn draw_char(&mut self, intervals: &IntervalSet) -> Result<char, DrawError> {
        debug_assert!(!intervals.is_empty());
        let idx = self.draw_index(intervals.len() as u128, DrawKind::CharIndex)?;
        let c = intervals.char_at(idx).unwrap_or('\0');
        if let Some(node) = self.nodes.last_mut() {
            node.value = DrawValue::Char(c);
        }
        Ok(c)
    }

    /// Batched string draw: one repeat-flag per element boundary, one
    /// character index per element. This is the fast path a
    /// sequence-of-single-characters strategy uses instead of drawing each
    /// character through the generic sequence machinery.
    pub fn draw_string(
        &mut self,
        intervals: &IntervalSet,
        min_size: usize,
        max_size: usize,
    ) -> Result<String, DrawError> {
        debug_assert!(min_size <= max_size);
        debug_assert!(!intervals.is_empty() || max_size == 0);
        let mut rep = crate::distributions::Repeat::for_sizes(min_size, max_size);
        let mut out = String::new();
        while rep.should_continue(self)? {
            out.push(self.draw_char(intervals)?);
        }
        Ok(out)
    }
}
