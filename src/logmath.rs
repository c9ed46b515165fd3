//! Log-domain arithmetic in a configurable log base.
//!
//! All probabilities in the search core are kept as log values in a base
//! close to 1 (1.0001 by default), which maps the useful probability range
//! onto comfortably sized numbers and turns multiplication into addition.
//! Adding two probabilities needs a table lookup: the add table implements
//! `log(1 + base^-index)` so that `add_as_linear` is a subtraction, an
//! index, and one addition.

const DEFAULT_LOG_BASE: f64 = 1.0001;

/// Hard cap on the add-table size; reached when the log base is very close
/// to 1 (around 1.00007).
const VERY_LARGE_NUMBER_OF_ENTRIES: usize = 150_000;

/// Log-domain math utility.
///
/// Construct one per recognizer and thread it through the components that
/// need conversions; the table makes it non-trivial to build, so it is
/// shared by reference rather than recreated.
#[derive(Debug, Clone)]
pub struct LogMath {
    natural_log_base: f32,
    inverse_natural_log_base: f32,
    add_table: Vec<f32>,
}

impl Default for LogMath {
    fn default() -> Self {
        Self::new()
    }
}

impl LogMath {
    /// A `LogMath` in the default base 1.0001.
    pub fn new() -> Self {
        Self::with_base(DEFAULT_LOG_BASE)
    }

    /// A `LogMath` in the given base. The base must be greater than 1;
    /// bases extremely close to 1 are clamped by the table-size cap.
    pub fn with_base(log_base: f64) -> Self {
        assert!(log_base > 1.0, "log base must be > 1.0, got {log_base}");
        let natural_log_base = log_base.ln() as f32;
        let mut lm = LogMath {
            natural_log_base,
            inverse_natural_log_base: 1.0 / natural_log_base,
            add_table: Vec::new(),
        };
        lm.build_add_table();
        lm
    }

    // The highest useful index maps to a linear addend of 0.5: larger
    // indices would round to 0 once probabilities are treated as integers
    // in this base. So the table length is -floor(log(base^0.5 - 1)).
    fn build_add_table(&mut self) {
        let top = -(self.linear_to_log(self.log_to_linear(0.5) - 1.0) as f64).floor();
        let entries = (top as usize).min(VERY_LARGE_NUMBER_OF_ENTRIES);
        assert!(
            entries > 0,
            "log base too close to 1.0 results in an empty add table"
        );
        self.add_table = (0..entries)
            .map(|index| self.linear_to_log(self.log_to_linear(-(index as f32)) + 1.0))
            .collect();
    }

    /// Converts a linear-domain value to this log base.
    pub fn linear_to_log(&self, linear: f64) -> f32 {
        linear.ln() as f32 * self.inverse_natural_log_base
    }

    /// Converts a value in this log base back to the linear domain.
    pub fn log_to_linear(&self, log: f32) -> f64 {
        ((log * self.natural_log_base) as f64).exp()
    }

    /// Converts a natural-log value to this log base.
    pub fn ln_to_log(&self, ln: f32) -> f32 {
        ln * self.inverse_natural_log_base
    }

    /// Converts a whole vector from linear to log domain in place.
    pub fn linear_to_log_slice(&self, values: &mut [f32]) {
        for v in values.iter_mut() {
            *v = self.linear_to_log(*v as f64);
        }
    }

    /// Adds two log-domain values as if they were linear probabilities,
    /// i.e. computes `log(linear(a) + linear(b))` via the add table.
    pub fn add_as_linear(&self, a: f32, b: f32) -> f32 {
        let (high, low) = if a >= b { (a, b) } else { (b, a) };
        if low == f32::NEG_INFINITY {
            return high;
        }
        let diff = high - low;
        let index = diff as usize;
        if index >= self.add_table.len() {
            high
        } else {
            high + self.add_table[index]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let lm = LogMath::new();
        for &p in &[1.0, 0.5, 1e-10, 1e-60] {
            let log = lm.linear_to_log(p);
            let back = lm.log_to_linear(log);
            assert!(
                (back - p).abs() / p < 1e-3,
                "round trip of {p} gave {back}"
            );
        }
    }

    #[test]
    fn test_log_of_one_is_zero() {
        let lm = LogMath::new();
        assert_eq!(lm.linear_to_log(1.0), 0.0);
    }

    #[test]
    fn test_add_as_linear() {
        let lm = LogMath::new();
        let half = lm.linear_to_log(0.5);
        let sum = lm.add_as_linear(half, half);
        // 0.5 + 0.5 = 1.0, whose log is 0
        assert!(sum.abs() < 1.0, "log(0.5+0.5) should be ~0, got {sum}");
    }

    #[test]
    fn test_add_as_linear_dominant_term() {
        let lm = LogMath::new();
        let big = lm.linear_to_log(0.9);
        let tiny = lm.linear_to_log(1e-40);
        // adding a vanishingly small probability changes nothing
        assert_eq!(lm.add_as_linear(big, tiny), big);
        assert_eq!(lm.add_as_linear(tiny, big), big);
    }

    #[test]
    fn test_add_neg_infinity_identity() {
        let lm = LogMath::new();
        let x = lm.linear_to_log(0.3);
        assert_eq!(lm.add_as_linear(x, f32::NEG_INFINITY), x);
    }

    #[test]
    fn test_ln_to_log() {
        let lm = LogMath::new();
        let from_ln = lm.ln_to_log((0.25f64).ln() as f32);
        let direct = lm.linear_to_log(0.25);
        assert!((from_ln - direct).abs() < 1.0);
    }
}
