use crate::fuse::CellRecord;

/// Half-width added on each side when every observed value is identical.
pub const DEGENERATE_EPS: f32 = 0.1;
/// Fraction of the range highlighted around a hovered legend value.
pub const HOVER_BAND_FRAC: f32 = 0.03;

/// Inclusive value range of a trait over some record subset.
/// Always `min <= max`; a degenerate range is expanded symmetrically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub min: f32,
    pub max: f32,
}

impl Default for ValueRange {
    fn default() -> Self {
        ValueRange { min: 0.0, max: 1.0 }
    }
}

impl ValueRange {
    pub fn compute(values: impl Iterator<Item = f32>) -> Self {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for v in values {
            if v.is_finite() {
                min = min.min(v);
                max = max.max(v);
            }
        }
        if !min.is_finite() || !max.is_finite() {
            return ValueRange::default();
        }
        if min == max {
            return ValueRange { min: min - DEGENERATE_EPS, max: max + DEGENERATE_EPS };
        }
        ValueRange { min, max }
    }

    /// Range of `key` over the given records. Callers pre-filter by region
    /// (and slice, in compare mode) before computing.
    pub fn of_trait<'a>(records: impl Iterator<Item = &'a CellRecord>, key: &str) -> Self {
        Self::compute(records.filter_map(|r| r.traits.get(key).copied()))
    }

    pub fn span(&self) -> f32 {
        self.max - self.min
    }

    /// Highlight band around a hovered legend value, clamped to the range.
    pub fn hover_band(&self, value: f32) -> (f32, f32) {
        let half = self.span() * HOVER_BAND_FRAC;
        ((value - half).max(self.min), (value + half).min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn record(region: &str, value: Option<f32>) -> CellRecord {
        let mut traits = HashMap::new();
        if let Some(v) = value {
            traits.insert("t".to_string(), v);
        }
        CellRecord {
            id: "c".to_string(),
            x: 0.0,
            y: 0.0,
            slice: "s1".to_string(),
            region: region.to_string(),
            traits,
        }
    }

    #[test]
    fn test_no_valid_values_defaults_to_unit_range() {
        assert_eq!(ValueRange::compute(std::iter::empty()), ValueRange { min: 0.0, max: 1.0 });
        assert_eq!(
            ValueRange::compute([f32::NAN, f32::INFINITY].into_iter()),
            ValueRange::default()
        );
    }

    #[test]
    fn test_degenerate_range_expands_symmetrically() {
        let records = vec![record("Heart", Some(3.0)), record("Liver", Some(3.0))];
        let range = ValueRange::of_trait(records.iter(), "t");
        assert!((range.min - 2.9).abs() < 1e-6);
        assert!((range.max - 3.1).abs() < 1e-6);
    }

    #[test]
    fn test_exact_min_max_and_nan_skipping() {
        let records = vec![
            record("Heart", Some(1.0)),
            record("Heart", Some(f32::NAN)),
            record("Heart", Some(-2.5)),
            record("Heart", None),
        ];
        let range = ValueRange::of_trait(records.iter(), "t");
        assert_eq!(range, ValueRange { min: -2.5, max: 1.0 });
    }

    #[test]
    fn test_region_filter_changes_range() {
        let records = vec![record("Heart", Some(1.0)), record("Liver", Some(9.0))];
        let all = ValueRange::of_trait(records.iter(), "t");
        assert_eq!(all.max, 9.0);
        let hearts = ValueRange::of_trait(records.iter().filter(|r| r.region == "Heart"), "t");
        // single observed value, so the degenerate expansion applies
        assert!((hearts.min - 0.9).abs() < 1e-6 && (hearts.max - 1.1).abs() < 1e-6);
    }

    #[test]
    fn test_hover_band_is_clamped() {
        let range = ValueRange { min: 0.0, max: 10.0 };
        let (lo, hi) = range.hover_band(5.0);
        assert!((lo - 4.7).abs() < 1e-6 && (hi - 5.3).abs() < 1e-6);
        let (lo, hi) = range.hover_band(0.1);
        assert_eq!(lo, 0.0);
        assert!((hi - 0.4).abs() < 1e-6);
        let (_, hi) = range.hover_band(10.0);
        assert_eq!(hi, 10.0);
    }
}
