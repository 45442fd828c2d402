//! Repetition control shared by sequence draws.
//!
//! `Repeat` turns "draw between min and max elements" into one boolean
//! decision per element boundary. Each decision is its own recorded draw,
//! so the shrinker can truncate a sequence by zeroing a single flag, or
//! delete a flag/element pair outright.

use crate::data::{DataSource, DrawError, DrawKind};

#[derive(Debug, Clone)]
pub struct Repeat {
    min_count: u64,
    max_count: u64,
    p_continue: f64,
    current_count: u64,
}

impl Repeat {
    pub fn new(min_count: u64, max_count: u64, expected_count: f64) -> Repeat {
        Repeat {
            min_count,
            max_count,
            p_continue: 1.0 - 1.0 / (1.0 + expected_count),
            current_count: 0,
        }
    }

    /// Repetition control for a sized collection draw, with the expected
    /// size biased toward the small end of the range.
    pub fn for_sizes(min_size: usize, max_size: usize) -> Repeat {
        let min = min_size as f64;
        let max = max_size as f64;
        let average = f64::min(f64::max(min * 2.0, min + 5.0), 0.5 * (min + max));
        Repeat::new(
            min_size as u64,
            max_size as u64,
            f64::max(average - min, 0.0),
        )
    }

    /// Decide whether to draw one more element. Decisions forced by the
    /// size bounds consume no bytes, so a sequence can never shrink below
    /// its minimum size.
    pub fn should_continue(&mut self, source: &mut DataSource) -> Result<bool, DrawError> {
        if self.current_count < self.min_count {
            self.current_count += 1;
            return Ok(true);
        }
        if self.current_count >= self.max_count {
            return Ok(false);
        }
        let result = source.draw_boolean_kind(self.p_continue, DrawKind::RepeatFlag)?;
        if result {
            self.current_count += 1;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DEFAULT_MAX_LENGTH;

    #[test]
    fn fixed_count_consumes_no_bytes() {
        let mut source = DataSource::random(0, DEFAULT_MAX_LENGTH);
        let mut rep = Repeat::new(3, 3, 0.0);
        let mut count = 0;
        while rep.should_continue(&mut source).unwrap() {
            count += 1;
        }
        assert_eq!(count, 3);
        assert!(source.record().is_empty());
    }

    #[test]
    fn counts_stay_within_bounds() {
        for seed in 0..100 {
            let mut source = DataSource::random(seed, DEFAULT_MAX_LENGTH);
            let mut rep = Repeat::for_sizes(2, 9);
            let mut count = 0u64;
            while rep.should_continue(&mut source).unwrap() {
                count += 1;
            }
            assert!((2..=9).contains(&count));
        }
    }

    #[test]
    fn zeroed_flags_stop_at_the_minimum() {
        let mut source = DataSource::replay(vec![0; 64], DEFAULT_MAX_LENGTH);
        let mut rep = Repeat::for_sizes(1, 10);
        let mut count = 0;
        while rep.should_continue(&mut source).unwrap() {
            count += 1;
        }
        assert_eq!(count, 1);
    }
}
