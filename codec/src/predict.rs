//! Delta prediction from up to three baselines.

use crate::types::SnapshotTick;

/// Predicts a field's current word from its baseline words.
///
/// With three baselines describing evenly divisible linear motion the
/// prediction extrapolates that motion to the current tick; otherwise it is
/// the newest baseline's value. Without baselines it is zero. Both ends of
/// the connection compute the same prediction from the same records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaPredictor {
    baselines: usize,
    /// Ticks from baseline 0 to now.
    dt: i64,
    /// Ticks from baseline 1 to baseline 0.
    d01: i64,
    /// Ticks from baseline 2 to baseline 1.
    d12: i64,
}

impl DeltaPredictor {
    /// Creates a predictor for `tick` given baseline ticks, newest first.
    #[must_use]
    pub fn new(tick: SnapshotTick, baselines: &[SnapshotTick]) -> Self {
        let span = |a: SnapshotTick, b: SnapshotTick| i64::from(a.ticks_since(b));
        let mut predictor = Self {
            baselines: baselines.len(),
            dt: 0,
            d01: 0,
            d12: 0,
        };
        if let [b0, b1, b2, ..] = baselines {
            predictor.dt = span(tick, *b0);
            predictor.d01 = span(*b0, *b1);
            predictor.d12 = span(*b1, *b2);
        }
        predictor
    }

    /// Returns `true` if linear extrapolation can apply.
    #[must_use]
    pub const fn is_linear(&self) -> bool {
        self.baselines >= 3 && self.d01 > 0 && self.d12 > 0 && self.dt > 0
    }

    /// Predicts the current word.
    #[must_use]
    pub fn predict(&self, b0: u32, b1: u32, b2: u32) -> u32 {
        if self.baselines == 0 {
            return 0;
        }
        if !self.is_linear() {
            return b0;
        }
        let v0 = i64::from(b0 as i32);
        let step0 = v0 - i64::from(b1 as i32);
        let step1 = i64::from(b1 as i32) - i64::from(b2 as i32);
        if step0 * self.d12 != step1 * self.d01 {
            return b0;
        }
        let advance = step0 * self.dt;
        if advance % self.d01 != 0 {
            return b0;
        }
        (v0 + advance / self.d01) as i32 as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticks(raw: &[u32]) -> Vec<SnapshotTick> {
        raw.iter().copied().map(SnapshotTick::new).collect()
    }

    #[test]
    fn no_baseline_predicts_zero() {
        let p = DeltaPredictor::new(SnapshotTick::new(10), &[]);
        assert_eq!(p.predict(5, 6, 7), 0);
    }

    #[test]
    fn one_baseline_predicts_it() {
        let p = DeltaPredictor::new(SnapshotTick::new(10), &ticks(&[8]));
        assert_eq!(p.predict(5, 0, 0), 5);
    }

    #[test]
    fn linear_motion_is_extrapolated() {
        let p = DeltaPredictor::new(SnapshotTick::new(12), &ticks(&[10, 8, 6]));
        assert!(p.is_linear());
        assert_eq!(p.predict(30, 20, 10), 40);
        let p = DeltaPredictor::new(SnapshotTick::new(11), &ticks(&[10, 8, 6]));
        assert_eq!(p.predict(30, 20, 10), 35);
    }

    #[test]
    fn negative_motion_is_extrapolated() {
        let p = DeltaPredictor::new(SnapshotTick::new(4), &ticks(&[3, 2, 1]));
        assert_eq!(p.predict((-3i32) as u32, (-1i32) as u32, 1), (-5i32) as u32);
    }

    #[test]
    fn non_linear_falls_back_to_newest() {
        let p = DeltaPredictor::new(SnapshotTick::new(12), &ticks(&[10, 8, 6]));
        assert_eq!(p.predict(30, 20, 15), 30);
    }

    #[test]
    fn uneven_division_falls_back_to_newest() {
        let p = DeltaPredictor::new(SnapshotTick::new(11), &ticks(&[10, 8, 6]));
        assert_eq!(p.predict(31, 20, 9), 31);
    }
}
