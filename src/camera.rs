/// Per-view 2D camera over display coordinates (y grows downward).
#[derive(Clone, Copy, Debug)]
pub struct Camera2D {
    pub center: [f32; 2],
    /// Pixels per display unit; larger = zoom in.
    pub pixels_per_unit: f32,
}

impl Default for Camera2D {
    fn default() -> Self {
        Self {
            center: [0.0, 0.0],
            pixels_per_unit: 1.0,
        }
    }
}

impl Camera2D {
    /// Centers on the bbox and scales so it fills `fill` of the viewport.
    pub fn fit_bbox(&mut self, bbox: [f32; 4], viewport_px: [f32; 2], fill: f32) {
        let [min_x, min_y, max_x, max_y] = bbox;
        self.center = [0.5 * (min_x + max_x), 0.5 * (min_y + max_y)];

        let w = (max_x - min_x).max(1e-6);
        let h = (max_y - min_y).max(1e-6);
        let fill = fill.clamp(0.05, 0.95);
        let sx = (viewport_px[0] * fill) / w;
        let sy = (viewport_px[1] * fill) / h;
        self.pixels_per_unit = sx.min(sy).clamp(1e-6, 1e9);
    }

    pub fn pan_by_pixels(&mut self, delta_px: [f32; 2]) {
        self.center[0] -= delta_px[0] / self.pixels_per_unit;
        self.center[1] -= delta_px[1] / self.pixels_per_unit;
    }

    /// Zoom while keeping the world point under the cursor fixed.
    pub fn zoom_at_viewport_pixel(
        &mut self,
        mouse_px: [f32; 2],
        viewport_px: [f32; 2],
        zoom_factor: f32,
    ) {
        let old_ppu = self.pixels_per_unit;
        let new_ppu = (old_ppu * zoom_factor).clamp(1e-6, 1e9);

        let anchor_x = self.center[0] + (mouse_px[0] - 0.5 * viewport_px[0]) / old_ppu;
        let anchor_y = self.center[1] + (mouse_px[1] - 0.5 * viewport_px[1]) / old_ppu;

        self.pixels_per_unit = new_ppu;
        self.center = [
            anchor_x - (mouse_px[0] - 0.5 * viewport_px[0]) / new_ppu,
            anchor_y - (mouse_px[1] - 0.5 * viewport_px[1]) / new_ppu,
        ];
    }

    /// Viewport pixel coordinates of a world point.
    pub fn world_to_viewport(&self, world: [f32; 2], viewport_px: [f32; 2]) -> [f32; 2] {
        [
            (world[0] - self.center[0]) * self.pixels_per_unit + 0.5 * viewport_px[0],
            (world[1] - self.center[1]) * self.pixels_per_unit + 0.5 * viewport_px[1],
        ]
    }

    pub fn viewport_to_world(&self, px: [f32; 2], viewport_px: [f32; 2]) -> [f32; 2] {
        [
            self.center[0] + (px[0] - 0.5 * viewport_px[0]) / self.pixels_per_unit,
            self.center[1] + (px[1] - 0.5 * viewport_px[1]) / self.pixels_per_unit,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_bbox_centers_and_fits() {
        let mut cam = Camera2D::default();
        cam.fit_bbox([0.0, 0.0, 100.0, 200.0], [1000.0, 1000.0], 0.9);
        assert_eq!(cam.center, [50.0, 100.0]);
        // height binds: 200 world units into 900 px
        assert!((cam.pixels_per_unit - 4.5).abs() < 1e-4);
    }

    #[test]
    fn test_zoom_keeps_cursor_anchor_stable() {
        let mut cam = Camera2D {
            center: [300.0, 450.0],
            pixels_per_unit: 2.0,
        };
        let mouse = [120.0, 80.0];
        let viewport = [800.0, 600.0];
        let before = cam.viewport_to_world(mouse, viewport);
        cam.zoom_at_viewport_pixel(mouse, viewport, 1.5);
        let after = cam.viewport_to_world(mouse, viewport);
        assert!((before[0] - after[0]).abs() < 1e-3);
        assert!((before[1] - after[1]).abs() < 1e-3);
    }

    #[test]
    fn test_round_trip_world_viewport() {
        let cam = Camera2D {
            center: [10.0, -4.0],
            pixels_per_unit: 3.0,
        };
        let viewport = [640.0, 480.0];
        let px = cam.world_to_viewport([25.0, 12.0], viewport);
        let world = cam.viewport_to_world(px, viewport);
        assert!((world[0] - 25.0).abs() < 1e-4);
        assert!((world[1] - 12.0).abs() < 1e-4);
    }
}
