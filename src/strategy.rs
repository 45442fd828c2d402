//! Strategy composition layer.
//!
//! A strategy is an immutable description of how to pull one value out of
//! a `DataSource`. Composition wraps, never mutates: `map` and `filter`
//! return new strategies. The draw contract every implementation must
//! honor: the result is a pure function of the bytes consumed, with no
//! hidden external state, so the engine can replay and shrink arbitrary
//! compositions.

use crate::data::{DataSource, DrawError};
use crate::errors::EngineError;

/// Re-draw budget for a plain rejection filter before the trial is
/// declared invalid.
pub const FILTER_ATTEMPTS: u32 = 3;

/// Semantic filter hints. A strategy that recognizes a hint may rebuild
/// itself to satisfy the condition by construction instead of rejection
/// sampling; unrecognized predicates always fall back to plain
/// `filter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterHint {
    MinLength(usize),
    MaxLength(usize),
    IsIdentifier,
}

pub trait Strategy {
    type Value;

    /// Draw one value. Deterministic given the exact bytes the source
    /// yields.
    fn draw(&self, source: &mut DataSource) -> Result<Self::Value, DrawError>;

    /// Short description used in diagnostics.
    fn label(&self) -> String {
        "strategy".to_owned()
    }

    /// Apply `f` to the drawn value. Exactly one underlying draw.
    fn map<U, F>(self, f: F) -> Map<Self, F>
    where
        Self: Sized,
        F: Fn(Self::Value) -> U,
    {
        Map { inner: self, f }
    }

    /// Re-draw until `predicate` holds, up to `FILTER_ATTEMPTS` tries,
    /// then mark the trial invalid.
    fn filter<P>(self, predicate: P) -> Filter<Self, P>
    where
        Self: Sized,
        P: Fn(&Self::Value) -> bool,
    {
        Filter {
            inner: self,
            predicate,
        }
    }
}

#[derive(Clone)]
pub struct Map<S, F> {
    inner: S,
    f: F,
}

impl<S, F, U> Strategy for Map<S, F>
where
    S: Strategy,
    F: Fn(S::Value) -> U,
{
    type Value = U;

    fn draw(&self, source: &mut DataSource) -> Result<U, DrawError> {
        let value = self.inner.draw(source)?;
        Ok((self.f)(value))
    }

    fn label(&self) -> String {
        format!("map({})", self.inner.label())
    }
}

#[derive(Clone)]
pub struct Filter<S, P> {
    inner: S,
    predicate: P,
}

impl<S, P> Strategy for Filter<S, P>
where
    S: Strategy,
    P: Fn(&S::Value) -> bool,
{
    type Value = S::Value;

    fn draw(&self, source: &mut DataSource) -> Result<S::Value, DrawError> {
        source.with_label("filter", |source| {
            for _ in 0..FILTER_ATTEMPTS {
                let value = self.inner.draw(source)?;
                if (self.predicate)(&value) {
                    return Ok(value);
                }
            }
            source.mark_invalid();
            Err(DrawError::FilterRejected {
                path: source.label_path(),
            })
        })
    }

    fn label(&self) -> String {
        format!("filter({})", self.inner.label())
    }
}

/// Uniform integers in an inclusive range, optionally weighted per value.
#[derive(Debug, Clone)]
pub struct IntegersStrategy {
    min: i64,
    max: i64,
    weights: Option<Vec<f64>>,
}

impl IntegersStrategy {
    pub fn new(min: i64, max: i64) -> Result<IntegersStrategy, EngineError> {
        if min > max {
            return Err(EngineError::invalid_argument(format!(
                "integers({min}, {max}): empty range"
            )));
        }
        Ok(IntegersStrategy {
            min,
            max,
            weights: None,
        })
    }

    /// Attach one weight per value. Only supported for small ranges, and
    /// weights must be finite and positive.
    pub fn weighted(min: i64, max: i64, weights: Vec<f64>) -> Result<IntegersStrategy, EngineError> {
        let base = IntegersStrategy::new(min, max)?;
        let range = (max as i128 - min as i128) as u128 + 1;
        if range > 256 {
            return Err(EngineError::invalid_argument(format!(
                "weighted integers: range of {range} values is too large for a weight table"
            )));
        }
        if weights.len() as u128 != range {
            return Err(EngineError::invalid_argument(format!(
                "weighted integers: {} weights for {range} values",
                weights.len()
            )));
        }
        if weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(EngineError::invalid_argument(
                "weighted integers: weights must be finite and positive",
            ));
        }
        Ok(IntegersStrategy {
            weights: Some(weights),
            ..base
        })
    }
}

impl Strategy for IntegersStrategy {
    type Value = i64;

    fn draw(&self, source: &mut DataSource) -> Result<i64, DrawError> {
        source.with_label("integers", |source| match &self.weights {
            Some(weights) => source.draw_integer_weighted(self.min, weights),
            None => source.draw_integer(self.min, self.max),
        })
    }

    fn label(&self) -> String {
        format!("integers({}, {})", self.min, self.max)
    }
}

/// Booleans that are true with probability `p`.
#[derive(Debug, Clone)]
pub struct BooleansStrategy {
    p: f64,
}

impl BooleansStrategy {
    pub fn new(p: f64) -> Result<BooleansStrategy, EngineError> {
        if !p.is_finite() || !(0.0..=1.0).contains(&p) {
            return Err(EngineError::invalid_argument(format!(
                "booleans({p}): probability must be in [0, 1]"
            )));
        }
        Ok(BooleansStrategy { p })
    }
}

impl Strategy for BooleansStrategy {
    type Value = bool;

    fn draw(&self, source: &mut DataSource) -> Result<bool, DrawError> {
        source.with_label("booleans", |source| source.draw_boolean(self.p))
    }

    fn label(&self) -> String {
        "booleans".to_owned()
    }
}

/// Variable-length sequences of an element strategy. One repeat-flag draw
/// per element boundary so the shrinker can drop elements individually.
#[derive(Debug, Clone)]
pub struct VecStrategy<S> {
    element: S,
    min_size: usize,
    max_size: usize,
}

impl<S: Strategy> VecStrategy<S> {
    pub fn new(element: S, min_size: usize, max_size: usize) -> Result<VecStrategy<S>, EngineError> {
        if min_size > max_size {
            return Err(EngineError::invalid_argument(format!(
                "vec: min_size {min_size} exceeds max_size {max_size}"
            )));
        }
        Ok(VecStrategy {
            element,
            min_size,
            max_size,
        })
    }
}

impl<S: Strategy> Strategy for VecStrategy<S> {
    type Value = Vec<S::Value>;

    fn draw(&self, source: &mut DataSource) -> Result<Vec<S::Value>, DrawError> {
        source.with_label("vec", |source| {
            let mut rep = crate::distributions::Repeat::for_sizes(self.min_size, self.max_size);
            let mut out = Vec::new();
            while rep.should_continue(source)? {
                out.push(self.element.draw(source)?);
            }
            Ok(out)
        })
    }

    fn label(&self) -> String {
        format!("vec({})", self.element.label())
    }
}

/// Uniform integers in `[min, max]`.
pub fn integers(min: i64, max: i64) -> Result<IntegersStrategy, EngineError> {
    IntegersStrategy::new(min, max)
}

/// Booleans with probability `p` of true.
pub fn booleans(p: f64) -> Result<BooleansStrategy, EngineError> {
    BooleansStrategy::new(p)
}

/// Sequences of `element` with the given size bounds.
pub fn vecs<S: Strategy>(
    element: S,
    min_size: usize,
    max_size: usize,
) -> Result<VecStrategy<S>, EngineError> {
    VecStrategy::new(element, min_size, max_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DEFAULT_MAX_LENGTH;

    #[test]
    fn empty_integer_range_is_rejected_at_construction() {
        assert!(integers(10, 9).is_err());
        assert!(integers(10, 10).is_ok());
    }

    #[test]
    fn map_applies_without_extra_draws() {
        let doubled = integers(0, 100).unwrap().map(|x| x * 2);
        let plain = integers(0, 100).unwrap();
        let mut a = DataSource::random(42, DEFAULT_MAX_LENGTH);
        let mut b = DataSource::random(42, DEFAULT_MAX_LENGTH);
        let x = plain.draw(&mut a).unwrap();
        let y = doubled.draw(&mut b).unwrap();
        assert_eq!(y, x * 2);
        assert_eq!(a.record(), b.record());
    }

    #[test]
    fn filter_retries_then_marks_invalid() {
        let impossible = integers(0, 100).unwrap().filter(|_| false);
        let mut source = DataSource::random(1, DEFAULT_MAX_LENGTH);
        match impossible.draw(&mut source) {
            Err(DrawError::FilterRejected { path }) => assert_eq!(path, "filter"),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(source.status(), crate::data::Status::Invalid);
    }

    #[test]
    fn filter_passes_matching_values() {
        let evens = integers(0, 1000).unwrap().filter(|x| x % 2 == 0);
        let mut hits = 0;
        for seed in 0..100 {
            let mut source = DataSource::random(seed, DEFAULT_MAX_LENGTH);
            if let Ok(v) = evens.draw(&mut source) {
                assert_eq!(v % 2, 0);
                hits += 1;
            }
        }
        // A coin-flip filter with three attempts almost never rejects.
        assert!(hits > 80);
    }

    #[test]
    fn weighted_integers_validate_their_table() {
        assert!(IntegersStrategy::weighted(0, 2, vec![1.0, 1.0]).is_err());
        assert!(IntegersStrategy::weighted(0, 2, vec![1.0, -1.0, 1.0]).is_err());
        assert!(IntegersStrategy::weighted(0, 1000, vec![1.0; 1001]).is_err());
        let s = IntegersStrategy::weighted(5, 7, vec![1.0, 1.0, 98.0]).unwrap();
        let mut source = DataSource::random(9, DEFAULT_MAX_LENGTH);
        for _ in 0..50 {
            let v = s.draw(&mut source).unwrap();
            assert!((5..=7).contains(&v));
        }
    }

    #[test]
    fn vec_sizes_respect_bounds() {
        let lists = vecs(integers(0, 10).unwrap(), 1, 5).unwrap();
        for seed in 0..50 {
            let mut source = DataSource::random(seed, DEFAULT_MAX_LENGTH);
            let v = lists.draw(&mut source).unwrap();
            assert!((1..=5).contains(&v.len()));
        }
    }
}
