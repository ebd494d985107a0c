//! Table configuration.
//!
//! Growth policy: bucket counts are zero (nothing allocated yet) or a power
//! of two, never below `MIN_BUCKETS` once storage exists. A table grows when
//! `len / bucket_count` would exceed the max load factor, to the next power
//! of two at or above both twice the current count and the count the load
//! factor requires.

/// Default upper bound on `len / bucket_count`.
pub const DEFAULT_MAX_LOAD_FACTOR: f32 = 1.0;

/// Smallest non-zero bucket count.
pub const MIN_BUCKETS: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TableConfig {
    pub max_load_factor: f32,
    pub min_buckets: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
            min_buckets: MIN_BUCKETS,
        }
    }
}

impl TableConfig {
    pub fn with_max_load_factor(mut self, mlf: f32) -> Self {
        self.max_load_factor = mlf;
        self
    }

    pub fn with_min_buckets(mut self, n: usize) -> Self {
        self.min_buckets = n;
        self
    }

    /// Clamp out-of-range values: the load factor must be finite and
    /// positive, the minimum bucket count a power of two of at least 1.
    pub(crate) fn normalized(self) -> Self {
        let max_load_factor = normalize_load_factor(self.max_load_factor);
        let min_buckets = self.min_buckets.max(1).next_power_of_two();
        Self {
            max_load_factor,
            min_buckets,
        }
    }
}

pub(crate) fn normalize_load_factor(mlf: f32) -> f32 {
    if mlf.is_finite() && mlf > 0.0 {
        mlf
    } else {
        DEFAULT_MAX_LOAD_FACTOR
    }
}

/// Buckets needed to hold `len` entries under `mlf`, before rounding.
pub(crate) fn buckets_for(len: usize, mlf: f32) -> usize {
    if len == 0 {
        return 0;
    }
    let n = (len as f64 / mlf as f64).ceil();
    if n >= usize::MAX as f64 {
        usize::MAX
    } else {
        n as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_values_are_clamped() {
        let c = TableConfig::default()
            .with_max_load_factor(f32::NAN)
            .with_min_buckets(5)
            .normalized();
        assert_eq!(c.max_load_factor, DEFAULT_MAX_LOAD_FACTOR);
        assert_eq!(c.min_buckets, 8);

        let c = TableConfig::default()
            .with_max_load_factor(-2.0)
            .with_min_buckets(0)
            .normalized();
        assert_eq!(c.max_load_factor, DEFAULT_MAX_LOAD_FACTOR);
        assert_eq!(c.min_buckets, 1);
    }

    #[test]
    fn buckets_for_rounds_up() {
        assert_eq!(buckets_for(0, 1.0), 0);
        assert_eq!(buckets_for(10, 1.0), 10);
        assert_eq!(buckets_for(10, 0.75), 14);
        assert_eq!(buckets_for(10, 4.0), 3);
    }
}
