/// Theme-dependent endpoints of the continuous trait gradient.
const MIN_COLOR_LIGHT: [u8; 3] = [255, 204, 204];
const MAX_COLOR_LIGHT: [u8; 3] = [204, 0, 0];
const MIN_COLOR_DARK: [u8; 3] = [0, 0, 102];
const MAX_COLOR_DARK: [u8; 3] = [173, 216, 230];

const NEUTRAL_GRAY: [u8; 4] = [128, 128, 128, 255];

/// Points whose trait value falls inside the hovered legend band.
pub const HIGHLIGHT: [u8; 4] = [0, 255, 0, 255];

/// Fixed region palette; regions outside this table fall back to gray.
const REGION_TABLE: [(&str, [u8; 3]); 5] = [
    ("Epithelial", [0xFA, 0xDF, 0x92]),
    ("Palatal Mesenchyme", [0xB4, 0x3E, 0x44]),
    ("Odontogenic", [0xF2, 0xC9, 0xD5]),
    ("Fibroblastic", [0x90, 0x48, 0x69]),
    ("Osteogenic", [0x49, 0x64, 0x96]),
];

/// Linear per-channel interpolation between the theme endpoints.
/// A degenerate range maps everything to neutral gray.
pub fn continuous_color(value: f32, min: f32, max: f32, light_theme: bool) -> [u8; 4] {
    if min == max || !value.is_finite() {
        return NEUTRAL_GRAY;
    }
    let ratio = ((value - min) / (max - min)).clamp(0.0, 1.0);
    let (lo, hi) = if light_theme {
        (MIN_COLOR_LIGHT, MAX_COLOR_LIGHT)
    } else {
        (MIN_COLOR_DARK, MAX_COLOR_DARK)
    };
    let lerp = |a: u8, b: u8| (a as f32 + ratio * (b as f32 - a as f32)).round() as u8;
    [lerp(lo[0], hi[0]), lerp(lo[1], hi[1]), lerp(lo[2], hi[2]), 255]
}

pub fn categorical_color(label: &str) -> [u8; 4] {
    table_color(label).unwrap_or(NEUTRAL_GRAY)
}

/// Fixed-table lookup only, so callers can substitute their own fallback.
pub fn table_color(label: &str) -> Option<[u8; 4]> {
    REGION_TABLE
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, rgb)| [rgb[0], rgb[1], rgb[2], 255])
}

/// Derived swatch palette for the region filter UI: evenly sampled TURBO for
/// regions the fixed table does not cover.
pub fn region_palette(n: usize) -> Vec<[u8; 4]> {
    let count = n.max(1);
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let t = if count <= 1 {
            0.0
        } else {
            i as f64 / (count as f64 - 1.0)
        };
        let c = colorous::TURBO.eval_continuous(t);
        out.push([c.r, c.g, c.b, 255]);
    }
    out
}

pub fn pack_rgba8(rgba: [u8; 4]) -> u32 {
    (rgba[0] as u32)
        | ((rgba[1] as u32) << 8)
        | ((rgba[2] as u32) << 16)
        | ((rgba[3] as u32) << 24)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_match_theme_colors() {
        assert_eq!(continuous_color(0.0, 0.0, 1.0, true), [255, 204, 204, 255]);
        assert_eq!(continuous_color(1.0, 0.0, 1.0, true), [204, 0, 0, 255]);
        assert_eq!(continuous_color(0.0, 0.0, 1.0, false), [0, 0, 102, 255]);
        assert_eq!(continuous_color(1.0, 0.0, 1.0, false), [173, 216, 230, 255]);
    }

    #[test]
    fn test_monotonic_per_channel() {
        for light in [false, true] {
            let mut prev = continuous_color(0.0, 0.0, 1.0, light);
            let end = continuous_color(1.0, 0.0, 1.0, light);
            for step in 1..=20 {
                let c = continuous_color(step as f32 / 20.0, 0.0, 1.0, light);
                for ch in 0..3 {
                    if end[ch] >= prev[ch] {
                        assert!(c[ch] >= prev[ch], "channel {ch} not increasing");
                    } else {
                        assert!(c[ch] <= prev[ch], "channel {ch} not decreasing");
                    }
                }
                prev = c;
            }
        }
    }

    #[test]
    fn test_degenerate_range_is_gray() {
        assert_eq!(continuous_color(3.0, 3.0, 3.0, true), NEUTRAL_GRAY);
        assert_eq!(continuous_color(3.0, 3.0, 3.0, false), NEUTRAL_GRAY);
    }

    #[test]
    fn test_out_of_range_values_clamp_to_endpoints() {
        assert_eq!(
            continuous_color(-5.0, 0.0, 1.0, true),
            continuous_color(0.0, 0.0, 1.0, true)
        );
        assert_eq!(
            continuous_color(42.0, 0.0, 1.0, true),
            continuous_color(1.0, 0.0, 1.0, true)
        );
    }

    #[test]
    fn test_categorical_lookup_and_fallback() {
        assert_eq!(categorical_color("Epithelial"), [0xFA, 0xDF, 0x92, 255]);
        assert_eq!(categorical_color("Osteogenic"), [0x49, 0x64, 0x96, 255]);
        assert_eq!(categorical_color("No Such Region"), NEUTRAL_GRAY);
    }

    #[test]
    fn test_region_palette_size_and_determinism() {
        assert_eq!(region_palette(0).len(), 1);
        let a = region_palette(7);
        let b = region_palette(7);
        assert_eq!(a.len(), 7);
        assert_eq!(a, b);
    }

    #[test]
    fn test_pack_rgba8_layout() {
        assert_eq!(pack_rgba8([1, 2, 3, 4]), 1 | (2 << 8) | (3 << 16) | (4 << 24));
    }
}
