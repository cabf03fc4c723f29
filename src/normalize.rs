use crate::fuse::CellRecord;
use std::collections::BTreeMap;

pub const FRAME_WIDTH: f32 = 500.0;
pub const FRAME_HEIGHT: f32 = 800.0;
pub const FRAME_MARGIN: f32 = 50.0;

/// Rescales every slice independently into the fixed display frame,
/// preserving that slice's aspect ratio and centering the fitted extent.
///
/// Absolute coordinate scale is not comparable across slices, so each slice is
/// fitted against its own bounding box only. A degenerate axis (zero range)
/// collapses to the frame center on that axis.
pub fn normalize(records: &mut [CellRecord]) {
    let mut by_slice: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, record) in records.iter().enumerate() {
        by_slice.entry(record.slice.as_str()).or_default().push(idx);
    }
    let groups: Vec<Vec<usize>> = by_slice.into_values().collect();

    for indices in groups {
        let mut min_x = f32::INFINITY;
        let mut max_x = f32::NEG_INFINITY;
        let mut min_y = f32::INFINITY;
        let mut max_y = f32::NEG_INFINITY;
        for &idx in &indices {
            min_x = min_x.min(records[idx].x);
            max_x = max_x.max(records[idx].x);
            min_y = min_y.min(records[idx].y);
            max_y = max_y.max(records[idx].y);
        }

        let x_range = (max_x - min_x).max(0.0);
        let y_range = (max_y - min_y).max(0.0);

        let (fit_w, fit_h) = fitted_extent(x_range, y_range);
        let x_off = (FRAME_WIDTH - fit_w) / 2.0 + FRAME_MARGIN;
        let y_off = (FRAME_HEIGHT - fit_h) / 2.0 + FRAME_MARGIN;

        for idx in indices {
            let record = &mut records[idx];
            record.x = if x_range > 0.0 {
                (record.x - min_x) / x_range * fit_w + x_off
            } else {
                FRAME_WIDTH / 2.0 + FRAME_MARGIN
            };
            record.y = if y_range > 0.0 {
                (record.y - min_y) / y_range * fit_h + y_off
            } else {
                FRAME_HEIGHT / 2.0 + FRAME_MARGIN
            };
        }
    }
}

/// Largest extent with the source aspect ratio that fits the target frame.
fn fitted_extent(x_range: f32, y_range: f32) -> (f32, f32) {
    if x_range <= 0.0 && y_range <= 0.0 {
        return (0.0, 0.0);
    }
    if y_range <= 0.0 {
        return (FRAME_WIDTH, 0.0);
    }
    if x_range <= 0.0 {
        return (0.0, FRAME_HEIGHT);
    }
    let aspect = x_range / y_range;
    if aspect > FRAME_WIDTH / FRAME_HEIGHT {
        (FRAME_WIDTH, FRAME_WIDTH / aspect)
    } else {
        (FRAME_HEIGHT * aspect, FRAME_HEIGHT)
    }
}
