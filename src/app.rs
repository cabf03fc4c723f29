use crate::camera::Camera2D;
use crate::catalog::TraitCategory;
use crate::color;
use crate::fuse::{CellRecord, FallbackReason, Snapshot};
use crate::ingest::LoadError;
use crate::normalize::{FRAME_HEIGHT, FRAME_MARGIN, FRAME_WIDTH};
use crate::range::ValueRange;
use crate::render::{PointLayerCallback, SharedViews, Uniforms, ViewParams};
use crate::viewstate::{toggle_selection, Action, Theme, ViewKind, ViewState, MAX_VIEWS};
use eframe::egui;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

const POINT_SCALE_TO_UNITS: f32 = 0.1;
const CAMERA_FILL: f32 = 0.92;

/// Everything a slot needs to draw, rebuilt whenever `revision` moves.
struct ViewCache {
    revision: u64,
    key: String,
    kind: ViewKind,
    /// Indices into `snapshot.records` for the visible cells, parallel to
    /// `positions` and `colors`.
    indices: Vec<usize>,
    positions: Arc<Vec<f32>>,
    positions_id: u64,
    colors: Arc<Vec<u32>>,
    colors_id: u64,
    range: ValueRange,
    categorical: bool,
    bbox: [f32; 4],
}

struct CompareDialog {
    open: bool,
    dimension: ViewKind,
    search: String,
    selection: Vec<String>,
}

pub struct ScvizApp {
    snapshot: Option<Arc<Snapshot>>,
    state: Option<ViewState>,
    /// Bumped on every applied action and on dataset install; caches compare
    /// against it instead of diffing state.
    revision: u64,
    id_gen: u64,

    shared: Arc<SharedViews>,
    cameras: [Camera2D; MAX_VIEWS],
    caches: [Option<ViewCache>; MAX_VIEWS],
    need_fit: [bool; MAX_VIEWS],
    filter_open: [bool; MAX_VIEWS],

    load_handle: Option<JoinHandle<Result<Snapshot, LoadError>>>,
    load_error: Option<String>,

    trait_search: String,
    dialog: CompareDialog,
    screenshot_dir: PathBuf,
}

impl ScvizApp {
    pub fn new(cc: &eframe::CreationContext<'_>, data_dir: Option<PathBuf>) -> Self {
        let rs = cc
            .wgpu_render_state
            .as_ref()
            .expect("eframe must be built with the wgpu renderer");
        let shared = Arc::new(SharedViews::new(rs.target_format));

        let screenshot_dir = std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("screenshots");

        let mut app = Self {
            snapshot: None,
            state: None,
            revision: 0,
            id_gen: 0,
            shared,
            cameras: [Camera2D::default(); MAX_VIEWS],
            caches: [None, None, None, None],
            need_fit: [false; MAX_VIEWS],
            filter_open: [false; MAX_VIEWS],
            load_handle: None,
            load_error: None,
            trait_search: String::new(),
            dialog: CompareDialog {
                open: false,
                dimension: ViewKind::Section,
                search: String::new(),
                selection: Vec::new(),
            },
            screenshot_dir,
        };

        match data_dir {
            Some(dir) => {
                app.load_handle = Some(std::thread::spawn(move || Snapshot::load(&dir)));
            }
            None => app.install_snapshot(Snapshot::sample(FallbackReason::NoDataDirectory)),
        }
        app
    }

    fn install_snapshot(&mut self, snapshot: Snapshot) {
        log::info!(
            "dataset installed: {} cells, {} slices, {} regions, {} traits{}",
            snapshot.records.len(),
            snapshot.slices.len(),
            snapshot.regions.len(),
            snapshot.catalog.traits.len(),
            if snapshot.is_fallback() { " (fallback)" } else { "" },
        );
        let first_slice = snapshot.slices.first().cloned().unwrap_or_default();
        let first_trait = snapshot
            .catalog
            .traits
            .first()
            .map(|t| t.key.clone())
            .unwrap_or_default();
        self.state = Some(ViewState::new(
            &first_slice,
            &first_trait,
            snapshot.regions.clone(),
        ));
        self.snapshot = Some(Arc::new(snapshot));
        self.caches = [None, None, None, None];
        self.filter_open = [false; MAX_VIEWS];
        self.revision += 1;
    }

    fn dispatch(&mut self, action: Action) {
        if let Some(state) = self.state.as_mut() {
            state.apply(action);
            self.revision += 1;
        }
    }

    fn poll_load_job(&mut self) {
        let Some(handle) = self.load_handle.as_ref() else {
            return;
        };
        if !handle.is_finished() {
            return;
        }
        let handle = self.load_handle.take().expect("checked above");
        // An unreadable source is fatal for the session; no partial dataset.
        match handle.join() {
            Ok(Ok(snapshot)) => self.install_snapshot(snapshot),
            Ok(Err(err)) => {
                log::error!("dataset load failed: {err}");
                self.load_error = Some(format!("{err}"));
            }
            Err(_) => {
                log::error!("dataset load thread panicked");
                self.load_error = Some("load thread panicked".to_string());
            }
        }
    }

    /// Rebuilds the slot's upload data if the state revision moved since the
    /// cache was produced.
    fn ensure_cache(&mut self, slot: usize, snapshot: &Snapshot) {
        if let Some(cache) = self.caches[slot].as_ref() {
            if cache.revision == self.revision {
                return;
            }
        }
        let Some(state) = self.state.as_ref() else {
            return;
        };
        let Some(view) = state.views().get(slot).cloned() else {
            self.caches[slot] = None;
            return;
        };

        let filter = state.filter(slot);
        // Coloring mode is a global toggle, independent of how the view was
        // selected: a section view can show a trait and vice versa.
        let categorical = state.region_coloring;

        let indices: Vec<usize> = snapshot
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.slice == view.slice && filter.contains(&r.region))
            .map(|(i, _)| i)
            .collect();

        // In single mode the color scale spans the region-filtered trait
        // values of every slice, so switching sections keeps colors
        // comparable. Compare views each scale over their own visible cells.
        let range = if categorical {
            ValueRange::default()
        } else if state.is_compare() {
            ValueRange::compute(indices.iter().filter_map(|&i| {
                snapshot.records[i].traits.get(&view.trait_key).copied()
            }))
        } else {
            ValueRange::compute(
                snapshot
                    .records
                    .iter()
                    .filter(|r| filter.contains(&r.region))
                    .filter_map(|r| r.traits.get(&view.trait_key).copied()),
            )
        };

        let hover = state.hover(slot);
        let light = state.theme.is_light();

        let mut positions = Vec::with_capacity(indices.len() * 2);
        let mut colors = Vec::with_capacity(indices.len());
        let mut bbox = [f32::MAX, f32::MAX, f32::MIN, f32::MIN];
        for &i in &indices {
            let r = &snapshot.records[i];
            positions.push(r.x);
            positions.push(r.y);
            bbox[0] = bbox[0].min(r.x);
            bbox[1] = bbox[1].min(r.y);
            bbox[2] = bbox[2].max(r.x);
            bbox[3] = bbox[3].max(r.y);

            let rgba = record_color(r, &view.trait_key, range, hover, light, categorical);
            colors.push(color::pack_rgba8(rgba));
        }
        if indices.is_empty() {
            bbox = [
                0.0,
                0.0,
                FRAME_WIDTH + 2.0 * FRAME_MARGIN,
                FRAME_HEIGHT + 2.0 * FRAME_MARGIN,
            ];
        }

        let view_changed = match self.caches[slot].as_ref() {
            Some(c) => c.key != view.key || c.kind != view.kind,
            None => true,
        };
        if view_changed {
            self.need_fit[slot] = true;
        }

        self.id_gen += 1;
        let positions_id = self.id_gen;
        self.id_gen += 1;
        let colors_id = self.id_gen;
        self.caches[slot] = Some(ViewCache {
            revision: self.revision,
            key: view.key,
            kind: view.kind,
            indices,
            positions: Arc::new(positions),
            positions_id,
            colors: Arc::new(colors),
            colors_id,
            range,
            categorical,
            bbox,
        });
    }

    fn handle_screenshot_events(&mut self, ctx: &egui::Context) {
        let events = ctx.input(|i| i.events.clone());
        for ev in events {
            if let egui::Event::Screenshot { image, user_data, .. } = ev {
                if let Some(path) = user_data
                    .data
                    .as_ref()
                    .and_then(|u| u.downcast_ref::<PathBuf>().cloned())
                {
                    match save_color_image_png(&image, &path) {
                        Ok(()) => log::info!("screenshot saved to {}", path.display()),
                        Err(err) => log::error!("screenshot save failed: {err:#}"),
                    }
                }
            }
        }
    }

    fn request_screenshot(&self, ctx: &egui::Context) {
        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path = self.screenshot_dir.join(format!("scviz_{stamp}.png"));
        ctx.send_viewport_cmd(egui::ViewportCommand::Screenshot(egui::UserData::new(path)));
    }

    fn ui_top_bar(&mut self, ui: &mut egui::Ui, ctx: &egui::Context, actions: &mut Vec<Action>) {
        let Some(state) = self.state.as_ref() else {
            return;
        };
        let theme = state.theme;
        let is_compare = state.is_compare();
        let region_coloring = state.region_coloring;
        let mut scale = state.point_scale;

        ui.horizontal(|ui| {
            ui.label(egui::RichText::new("scviz").strong());
            ui.separator();

            ui.label("Cell size");
            if ui
                .add(egui::Slider::new(&mut scale, 1.0..=100.0).show_value(false))
                .changed()
            {
                actions.push(Action::SetPointScale(scale));
            }
            ui.separator();

            let theme_label = match theme {
                Theme::Light => "Dark mode",
                Theme::Dark => "Light mode",
            };
            if ui.button(theme_label).clicked() {
                actions.push(Action::ToggleTheme);
            }

            if ui.button("Screenshot").clicked() {
                self.request_screenshot(ctx);
            }
            ui.separator();

            let coloring_label = if region_coloring {
                "Show trait"
            } else {
                "Show cell types"
            };
            if ui.button(coloring_label).clicked() {
                actions.push(Action::ToggleRegionColoring);
            }

            if is_compare {
                if ui.button("Close compare").clicked() {
                    actions.push(Action::CloseCompare);
                }
            } else if ui.button("Compare…").clicked() {
                self.dialog.open = true;
                self.dialog.selection.clear();
                self.dialog.search.clear();
            }
        });
    }

    fn ui_left_panel(&mut self, ui: &mut egui::Ui, actions: &mut Vec<Action>) {
        let Some(snapshot) = self.snapshot.clone() else {
            return;
        };
        let Some(state) = self.state.as_ref() else {
            return;
        };
        let is_compare = state.is_compare();
        let focus = state.views().first().cloned();

        ui.add(
            egui::TextEdit::singleline(&mut self.trait_search).hint_text("Search traits"),
        );
        ui.add_space(6.0);

        let search = self.trait_search.to_lowercase();
        ui.add_enabled_ui(!is_compare, |ui| {
            for category in [TraitCategory::Gene, TraitCategory::TfActivity] {
                let mut shown = 0usize;
                ui.heading(category.heading());
                for descriptor in snapshot.catalog.in_category(category) {
                    if !search.is_empty() && !descriptor.label.to_lowercase().contains(&search) {
                        continue;
                    }
                    shown += 1;
                    let selected = !is_compare
                        && focus.as_ref().is_some_and(|f| {
                            f.kind == ViewKind::Trait && f.trait_key == descriptor.key
                        });
                    if ui.selectable_label(selected, &descriptor.label).clicked() {
                        actions.push(Action::SelectTrait(descriptor.key.clone()));
                    }
                }
                if shown == 0 {
                    ui.weak("no matches");
                }
                ui.add_space(6.0);
            }

            ui.heading("Sections");
            for slice in &snapshot.slices {
                let selected = !is_compare
                    && focus
                        .as_ref()
                        .is_some_and(|f| f.kind == ViewKind::Section && &f.slice == slice);
                if ui.selectable_label(selected, slice).clicked() {
                    actions.push(Action::SelectSection(slice.clone()));
                }
            }
        });

        ui.add_space(10.0);
        ui.separator();
        ui.weak(format!(
            "{} cells, {} sections",
            snapshot.records.len(),
            snapshot.slices.len()
        ));
        if snapshot.dropped > 0 {
            ui.weak(format!("{} cells dropped during join", snapshot.dropped));
        }
        if let Some(reason) = snapshot.fallback {
            let text = match reason {
                FallbackReason::NoJoinableCells => {
                    "No joinable cells in the sources; showing the synthetic sample."
                }
                FallbackReason::NoDataDirectory => {
                    "No data directory selected; showing the synthetic sample."
                }
            };
            ui.colored_label(egui::Color32::from_rgb(220, 170, 60), text);
        }
    }

    fn ui_view(
        &mut self,
        ui: &mut egui::Ui,
        ctx: &egui::Context,
        slot: usize,
        rect: egui::Rect,
        snapshot: &Snapshot,
        actions: &mut Vec<Action>,
    ) {
        let Some(state) = self.state.as_ref() else {
            return;
        };
        let Some(view) = state.views().get(slot).cloned() else {
            return;
        };
        let theme = state.theme;
        let point_scale = state.point_scale;
        let hover = state.hover(slot);
        let filter: Vec<(String, bool)> = snapshot
            .regions
            .iter()
            .map(|r| (r.clone(), state.filter(slot).contains(r)))
            .collect();

        let response = ui.interact(
            rect,
            egui::Id::new(("view", slot)),
            egui::Sense::click_and_drag(),
        );
        ui.painter().rect_filled(rect, 0.0, background_color(theme));

        let ppp = ctx.pixels_per_point();
        let viewport_px = [rect.width() * ppp, rect.height() * ppp];

        if self.need_fit[slot] {
            let bbox = self.caches[slot]
                .as_ref()
                .map(|c| c.bbox)
                .unwrap_or([0.0, 0.0, FRAME_WIDTH, FRAME_HEIGHT]);
            self.cameras[slot].fit_bbox(bbox, viewport_px, CAMERA_FILL);
            self.need_fit[slot] = false;
        }

        if response.dragged() {
            let delta = response.drag_delta();
            self.cameras[slot].pan_by_pixels([delta.x * ppp, delta.y * ppp]);
        }
        if response.hovered() {
            let scroll = ctx.input(|i| i.smooth_scroll_delta.y);
            if scroll.abs() > 0.0 {
                let zoom_factor = (1.0 + scroll * 0.0015).clamp(0.8, 1.25);
                let mouse = ctx
                    .input(|i| i.pointer.hover_pos())
                    .unwrap_or(rect.center());
                let local = mouse - rect.min;
                self.cameras[slot].zoom_at_viewport_pixel(
                    [local.x * ppp, local.y * ppp],
                    viewport_px,
                    zoom_factor,
                );
            }
        }

        let camera = self.cameras[slot];
        let point_radius_px =
            (point_scale * POINT_SCALE_TO_UNITS * camera.pixels_per_unit).max(1.0);

        let (cache_range, categorical) = {
            let Some(cache) = self.caches[slot].as_ref() else {
                return;
            };
            let mut slots = self.shared.slots.lock();
            slots[slot] = ViewParams {
                positions_id: cache.positions_id,
                positions: cache.positions.clone(),
                colors_id: cache.colors_id,
                colors: cache.colors.clone(),
                uniforms: Uniforms {
                    viewport_px,
                    center: camera.center,
                    pixels_per_unit: camera.pixels_per_unit,
                    point_radius_px,
                    _pad: [0.0; 2],
                },
            };
            (cache.range, cache.categorical)
        };

        ui.painter().add(egui_wgpu::Callback::new_paint_callback(
            rect,
            PointLayerCallback {
                shared: self.shared.clone(),
                slot,
            },
        ));

        // Title
        let title = if categorical {
            format!("{} — cell types", view.slice)
        } else {
            format!(
                "{} — {}",
                view.slice,
                snapshot.catalog.label_for(&view.trait_key)
            )
        };
        ui.painter().text(
            rect.left_top() + egui::vec2(8.0, 6.0),
            egui::Align2::LEFT_TOP,
            title,
            egui::FontId::proportional(13.0),
            text_color(theme),
        );

        if !categorical {
            self.ui_legend(ui, ctx, slot, rect, cache_range, hover, theme, actions);
        }
        self.ui_region_filter(ui, ctx, slot, rect, &filter, actions);
        self.ui_hover_tooltip(ui, ctx, slot, rect, snapshot, camera, point_radius_px, ppp);
    }

    /// Vertical gradient legend; hovering a band highlights matching cells.
    #[allow(clippy::too_many_arguments)]
    fn ui_legend(
        &mut self,
        ui: &mut egui::Ui,
        ctx: &egui::Context,
        slot: usize,
        rect: egui::Rect,
        range: ValueRange,
        hover: Option<(f32, f32)>,
        theme: Theme,
        actions: &mut Vec<Action>,
    ) {
        const STEPS: usize = 50;
        let legend = egui::Rect::from_min_size(
            egui::pos2(rect.right() - 34.0, rect.top() + 34.0),
            egui::vec2(16.0, 220.0),
        );
        if !rect.contains_rect(legend) {
            return;
        }

        let light = theme.is_light();
        let step_h = legend.height() / STEPS as f32;
        for i in 0..STEPS {
            // max at the top, min at the bottom
            let t = 1.0 - i as f32 / (STEPS - 1) as f32;
            let value = range.min + t * range.span();
            let rgba = color::continuous_color(value, range.min, range.max, light);
            let seg = egui::Rect::from_min_size(
                egui::pos2(legend.left(), legend.top() + step_h * i as f32),
                egui::vec2(legend.width(), step_h + 1.0),
            );
            ui.painter()
                .rect_filled(seg, 0.0, color32(rgba));
        }
        ui.painter().text(
            legend.center_top() - egui::vec2(0.0, 4.0),
            egui::Align2::CENTER_BOTTOM,
            format!("{:.2}", range.max),
            egui::FontId::proportional(11.0),
            text_color(theme),
        );
        ui.painter().text(
            legend.center_bottom() + egui::vec2(0.0, 4.0),
            egui::Align2::CENTER_TOP,
            format!("{:.2}", range.min),
            egui::FontId::proportional(11.0),
            text_color(theme),
        );

        let pointer = ctx.input(|i| i.pointer.hover_pos());
        match pointer {
            Some(pos) if legend.contains(pos) => {
                let frac = 1.0 - (pos.y - legend.top()) / legend.height();
                let band = range.hover_band(range.min + frac * range.span());
                if hover != Some(band) {
                    actions.push(Action::SetHover {
                        view: slot,
                        band: Some(band),
                    });
                }
            }
            _ => {
                if hover.is_some() {
                    actions.push(Action::SetHover {
                        view: slot,
                        band: None,
                    });
                }
            }
        }
    }

    fn ui_region_filter(
        &mut self,
        _ui: &mut egui::Ui,
        ctx: &egui::Context,
        slot: usize,
        rect: egui::Rect,
        filter: &[(String, bool)],
        actions: &mut Vec<Action>,
    ) {
        let palette = color::region_palette(filter.len());
        egui::Area::new(egui::Id::new(("region_filter", slot)))
            .fixed_pos(rect.left_top() + egui::vec2(8.0, 26.0))
            .show(ctx, |ui| {
                egui::Frame::popup(ui.style()).show(ui, |ui| {
                    let open = &mut self.filter_open[slot];
                    let arrow = if *open { "▼" } else { "▶" };
                    if ui.button(format!("{arrow} Regions")).clicked() {
                        *open = !*open;
                    }
                    if !*open {
                        return;
                    }
                    ui.horizontal(|ui| {
                        if ui.button("All").clicked() {
                            actions.push(Action::ShowAllRegions { view: slot });
                        }
                        if ui.button("Clear").clicked() {
                            actions.push(Action::ClearRegions { view: slot });
                        }
                    });
                    for (i, (region, enabled)) in filter.iter().enumerate() {
                        ui.horizontal(|ui| {
                            let (swatch, _) = ui.allocate_exact_size(
                                egui::vec2(10.0, 10.0),
                                egui::Sense::hover(),
                            );
                            let rgba =
                                color::table_color(region).unwrap_or(palette[i]);
                            ui.painter().rect_filled(swatch, 2.0, color32(rgba));
                            let mut on = *enabled;
                            if ui.checkbox(&mut on, region.as_str()).changed() {
                                actions.push(Action::ToggleRegion {
                                    view: slot,
                                    region: region.clone(),
                                });
                            }
                        });
                    }
                });
            });
    }

    #[allow(clippy::too_many_arguments)]
    fn ui_hover_tooltip(
        &self,
        ui: &mut egui::Ui,
        ctx: &egui::Context,
        slot: usize,
        rect: egui::Rect,
        snapshot: &Snapshot,
        camera: Camera2D,
        point_radius_px: f32,
        ppp: f32,
    ) {
        let Some(pos) = ctx.input(|i| i.pointer.hover_pos()) else {
            return;
        };
        if !rect.contains(pos) {
            return;
        }
        let Some(cache) = self.caches[slot].as_ref() else {
            return;
        };
        let Some(view) = self
            .state
            .as_ref()
            .and_then(|s| s.views().get(slot).cloned())
        else {
            return;
        };

        let local = pos - rect.min;
        let viewport_px = [rect.width() * ppp, rect.height() * ppp];
        let world = camera.viewport_to_world([local.x * ppp, local.y * ppp], viewport_px);
        let max_dist = (point_radius_px + 3.0) / camera.pixels_per_unit;
        let Some(record_idx) =
            nearest_cell(&cache.positions, &cache.indices, world, max_dist)
        else {
            return;
        };

        let record = &snapshot.records[record_idx];
        egui::show_tooltip_at_pointer(
            ctx,
            ui.layer_id(),
            egui::Id::new(("cell_tip", slot)),
            |ui| {
                ui.label(format!("ID: {}", record.id));
                ui.label(format!("Region: {}", record.region));
                if !cache.categorical {
                    let label = snapshot.catalog.label_for(&view.trait_key);
                    match record.traits.get(&view.trait_key) {
                        Some(v) => ui.label(format!("{label}: {v:.3}")),
                        None => ui.label(format!("{label}: n/a")),
                    };
                }
            },
        );
    }

    fn ui_compare_dialog(&mut self, ctx: &egui::Context, actions: &mut Vec<Action>) {
        if !self.dialog.open {
            return;
        }
        let Some(snapshot) = self.snapshot.clone() else {
            return;
        };

        let mut open = self.dialog.open;
        let mut start = false;
        egui::Window::new("Compare views")
            .open(&mut open)
            .resizable(false)
            .collapsible(false)
            .show(ctx, |ui| {
                ui.horizontal(|ui| {
                    let before = self.dialog.dimension;
                    ui.radio_value(&mut self.dialog.dimension, ViewKind::Section, "Sections");
                    ui.radio_value(&mut self.dialog.dimension, ViewKind::Trait, "Traits");
                    if self.dialog.dimension != before {
                        self.dialog.selection.clear();
                    }
                });
                ui.add(
                    egui::TextEdit::singleline(&mut self.dialog.search).hint_text("Search"),
                );
                ui.add_space(4.0);

                let search = self.dialog.search.to_lowercase();
                let items: Vec<(String, String)> = match self.dialog.dimension {
                    ViewKind::Section => snapshot
                        .slices
                        .iter()
                        .map(|s| (s.clone(), s.clone()))
                        .collect(),
                    ViewKind::Trait => snapshot
                        .catalog
                        .traits
                        .iter()
                        .map(|t| (t.key.clone(), t.label.clone()))
                        .collect(),
                };
                egui::ScrollArea::vertical().max_height(240.0).show(ui, |ui| {
                    for (key, label) in &items {
                        if !search.is_empty() && !label.to_lowercase().contains(&search) {
                            continue;
                        }
                        let selected = self.dialog.selection.iter().any(|k| k == key);
                        if ui.selectable_label(selected, label).clicked() {
                            toggle_selection(&mut self.dialog.selection, key);
                        }
                    }
                });

                ui.add_space(6.0);
                ui.horizontal(|ui| {
                    ui.label(format!(
                        "Selected {}/{MAX_VIEWS}",
                        self.dialog.selection.len()
                    ));
                    let enabled = !self.dialog.selection.is_empty();
                    if ui
                        .add_enabled(enabled, egui::Button::new("Start compare"))
                        .clicked()
                    {
                        start = true;
                    }
                });
            });

        if start {
            actions.push(Action::StartCompare {
                dimension: self.dialog.dimension,
                keys: self.dialog.selection.clone(),
            });
            open = false;
        }
        self.dialog.open = open;
    }
}

impl eframe::App for ScvizApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_screenshot_events(ctx);
        self.poll_load_job();

        if let Some(state) = self.state.as_ref() {
            ctx.set_visuals(visuals_for_theme(state.theme));
        }

        if self.snapshot.is_none() {
            let error = self.load_error.clone();
            egui::CentralPanel::default().show(ctx, |ui| {
                ui.centered_and_justified(|ui| match error {
                    Some(err) => {
                        ui.colored_label(
                            egui::Color32::from_rgb(220, 120, 80),
                            format!("Failed to load the dataset.\n\n{err}\n\nFix the source files and restart."),
                        );
                    }
                    None => {
                        ui.horizontal(|ui| {
                            ui.spinner();
                            ui.label("Loading dataset…");
                        });
                    }
                });
            });
            if self.load_handle.is_some() {
                ctx.request_repaint_after(std::time::Duration::from_millis(100));
            }
            return;
        }

        let Some(snapshot) = self.snapshot.clone() else {
            return;
        };
        let n_views = self
            .state
            .as_ref()
            .map(|s| s.views().len())
            .unwrap_or(0);
        for slot in 0..n_views {
            self.ensure_cache(slot, &snapshot);
        }

        let mut actions: Vec<Action> = Vec::new();

        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            self.ui_top_bar(ui, ctx, &mut actions);
        });

        egui::SidePanel::left("trait_panel")
            .resizable(true)
            .default_width(240.0)
            .max_width(360.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical()
                    .auto_shrink([false; 2])
                    .show(ui, |ui| {
                        self.ui_left_panel(ui, &mut actions);
                    });
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            let rects = grid_rects(ui.available_rect_before_wrap(), n_views);
            for (slot, rect) in rects.into_iter().enumerate() {
                self.ui_view(ui, ctx, slot, rect, &snapshot, &mut actions);
            }
        });

        self.ui_compare_dialog(ctx, &mut actions);

        if !actions.is_empty() {
            for action in actions {
                self.dispatch(action);
            }
            ctx.request_repaint();
        }
    }
}

/// Sub-rectangles for 1..=4 views: full, side by side, then a 2x2 grid.
fn grid_rects(rect: egui::Rect, n: usize) -> Vec<egui::Rect> {
    const GAP: f32 = 4.0;
    match n {
        0 => Vec::new(),
        1 => vec![rect],
        2 => {
            let w = (rect.width() - GAP) / 2.0;
            vec![
                egui::Rect::from_min_size(rect.min, egui::vec2(w, rect.height())),
                egui::Rect::from_min_size(
                    egui::pos2(rect.min.x + w + GAP, rect.min.y),
                    egui::vec2(w, rect.height()),
                ),
            ]
        }
        _ => {
            let w = (rect.width() - GAP) / 2.0;
            let h = (rect.height() - GAP) / 2.0;
            (0..n.min(MAX_VIEWS))
                .map(|i| {
                    let col = (i % 2) as f32;
                    let row = (i / 2) as f32;
                    egui::Rect::from_min_size(
                        egui::pos2(
                            rect.min.x + col * (w + GAP),
                            rect.min.y + row * (h + GAP),
                        ),
                        egui::vec2(w, h),
                    )
                })
                .collect()
        }
    }
}

/// Color of one cell under the active coloring mode. Absent trait values sit
/// at the bottom of the continuous scale; hover bands never match them.
fn record_color(
    record: &CellRecord,
    trait_key: &str,
    range: ValueRange,
    hover: Option<(f32, f32)>,
    light: bool,
    categorical: bool,
) -> [u8; 4] {
    if categorical {
        return color::categorical_color(&record.region);
    }
    match (record.traits.get(trait_key).copied(), hover) {
        (Some(v), Some((lo, hi))) if v >= lo && v <= hi => color::HIGHLIGHT,
        (Some(v), _) => color::continuous_color(v, range.min, range.max, light),
        (None, _) => color::continuous_color(range.min, range.min, range.max, light),
    }
}

/// Nearest visible cell to `world` within `max_dist`, as an index into the
/// full record list.
fn nearest_cell(
    positions: &[f32],
    indices: &[usize],
    world: [f32; 2],
    max_dist: f32,
) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (k, &record_idx) in indices.iter().enumerate() {
        let dx = positions[k * 2] - world[0];
        let dy = positions[k * 2 + 1] - world[1];
        let d2 = dx * dx + dy * dy;
        if d2 <= max_dist * max_dist && best.map_or(true, |(_, b)| d2 < b) {
            best = Some((record_idx, d2));
        }
    }
    best.map(|(idx, _)| idx)
}

fn visuals_for_theme(theme: Theme) -> egui::Visuals {
    match theme {
        Theme::Light => egui::Visuals::light(),
        Theme::Dark => egui::Visuals::dark(),
    }
}

fn background_color(theme: Theme) -> egui::Color32 {
    match theme {
        Theme::Light => egui::Color32::from_rgb(0xF0, 0xF0, 0xF0),
        Theme::Dark => egui::Color32::from_rgb(0x0A, 0x0A, 0x0A),
    }
}

fn text_color(theme: Theme) -> egui::Color32 {
    match theme {
        Theme::Light => egui::Color32::from_gray(30),
        Theme::Dark => egui::Color32::from_gray(220),
    }
}

fn color32(rgba: [u8; 4]) -> egui::Color32 {
    egui::Color32::from_rgba_unmultiplied(rgba[0], rgba[1], rgba[2], rgba[3])
}

fn save_color_image_png(img: &egui::ColorImage, path: &Path) -> anyhow::Result<()> {
    use image::ImageEncoder;

    let w = img.size[0] as u32;
    let h = img.size[1] as u32;
    let mut rgba = Vec::with_capacity((w * h * 4) as usize);
    for p in &img.pixels {
        rgba.extend_from_slice(&[p.r(), p.g(), p.b(), p.a()]);
    }

    std::fs::create_dir_all(path.parent().unwrap_or(Path::new(".")))?;
    let encoder = image::codecs::png::PngEncoder::new_with_quality(
        std::fs::File::create(path)?,
        image::codecs::png::CompressionType::Best,
        image::codecs::png::FilterType::Adaptive,
    );
    encoder.write_image(&rgba, w, h, image::ExtendedColorType::Rgba8)?;
    Ok(())
}
