use std::collections::BTreeSet;

pub const MAX_VIEWS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    Trait,
    Section,
}

/// One (slice, trait) rendering target. Compare views are selected along one
/// dimension but each keeps an independent slice+trait pair afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    pub key: String,
    pub kind: ViewKind,
    pub slice: String,
    pub trait_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn is_light(self) -> bool {
        matches!(self, Theme::Light)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SelectTrait(String),
    SelectSection(String),
    StartCompare { dimension: ViewKind, keys: Vec<String> },
    CloseCompare,
    ToggleRegion { view: usize, region: String },
    ShowAllRegions { view: usize },
    ClearRegions { view: usize },
    SetHover { view: usize, band: Option<(f32, f32)> },
    ToggleTheme,
    ToggleRegionColoring,
    SetPointScale(f32),
}

#[derive(Debug, Clone)]
struct CompareState {
    views: Vec<View>,
    filters: Vec<BTreeSet<String>>,
}

/// Owner of all mutable UI state. Every transition goes through `apply`;
/// nothing outside this struct mutates views, filters or hover bands.
#[derive(Debug, Clone)]
pub struct ViewState {
    focus: View,
    shared_filter: BTreeSet<String>,
    compare: Option<CompareState>,
    hover: [Option<(f32, f32)>; MAX_VIEWS],
    all_regions: Vec<String>,
    default_slice: String,
    default_trait: String,
    pub theme: Theme,
    pub region_coloring: bool,
    pub point_scale: f32,
}

impl ViewState {
    pub fn new(first_slice: &str, first_trait: &str, all_regions: Vec<String>) -> Self {
        ViewState {
            focus: View {
                key: first_slice.to_string(),
                kind: ViewKind::Section,
                slice: first_slice.to_string(),
                trait_key: first_trait.to_string(),
            },
            shared_filter: all_regions.iter().cloned().collect(),
            compare: None,
            hover: [None; MAX_VIEWS],
            all_regions,
            default_slice: first_slice.to_string(),
            default_trait: first_trait.to_string(),
            theme: Theme::Dark,
            region_coloring: false,
            point_scale: 25.0,
        }
    }

    pub fn views(&self) -> &[View] {
        match &self.compare {
            Some(c) => &c.views,
            None => std::slice::from_ref(&self.focus),
        }
    }

    pub fn is_compare(&self) -> bool {
        self.compare.is_some()
    }

    /// Visible-region set for the given view slot: shared in single mode,
    /// per view in compare mode.
    pub fn filter(&self, view: usize) -> &BTreeSet<String> {
        match &self.compare {
            Some(c) => c.filters.get(view).unwrap_or(&self.shared_filter),
            None => &self.shared_filter,
        }
    }

    pub fn hover(&self, view: usize) -> Option<(f32, f32)> {
        self.hover.get(view).copied().flatten()
    }

    pub fn apply(&mut self, action: Action) {
        match action {
            Action::SelectTrait(key) => {
                if self.compare.is_none() {
                    self.focus.key = key.clone();
                    self.focus.kind = ViewKind::Trait;
                    self.focus.trait_key = key;
                    self.hover = [None; MAX_VIEWS];
                }
            }
            Action::SelectSection(key) => {
                if self.compare.is_none() {
                    self.focus.key = key.clone();
                    self.focus.kind = ViewKind::Section;
                    self.focus.slice = key;
                    self.hover = [None; MAX_VIEWS];
                }
            }
            Action::StartCompare { dimension, keys } => {
                if keys.is_empty() {
                    return; // invalid selection leaves the state unchanged
                }
                let views: Vec<View> = keys
                    .into_iter()
                    .take(MAX_VIEWS)
                    .map(|key| match dimension {
                        ViewKind::Trait => View {
                            slice: self.default_slice.clone(),
                            trait_key: key.clone(),
                            kind: dimension,
                            key,
                        },
                        ViewKind::Section => View {
                            slice: key.clone(),
                            trait_key: self.default_trait.clone(),
                            kind: dimension,
                            key,
                        },
                    })
                    .collect();
                let filters = vec![self.all_regions.iter().cloned().collect(); views.len()];
                self.compare = Some(CompareState { views, filters });
                self.hover = [None; MAX_VIEWS];
            }
            Action::CloseCompare => {
                // the single-mode view and its shared filter persist untouched
                self.compare = None;
                self.hover = [None; MAX_VIEWS];
            }
            Action::ToggleRegion { view, region } => match &mut self.compare {
                Some(c) => {
                    if let Some(filter) = c.filters.get_mut(view) {
                        if !filter.remove(&region) {
                            filter.insert(region);
                        }
                    }
                }
                None => {
                    if !self.shared_filter.remove(&region) {
                        self.shared_filter.insert(region);
                    }
                }
            },
            Action::ShowAllRegions { view } => {
                let all: BTreeSet<String> = self.all_regions.iter().cloned().collect();
                match &mut self.compare {
                    Some(c) => {
                        if let Some(filter) = c.filters.get_mut(view) {
                            *filter = all;
                        }
                    }
                    None => self.shared_filter = all,
                }
            }
            Action::ClearRegions { view } => match &mut self.compare {
                Some(c) => {
                    if let Some(filter) = c.filters.get_mut(view) {
                        filter.clear();
                    }
                }
                None => self.shared_filter.clear(),
            },
            Action::SetHover { view, band } => {
                if view < self.views().len() {
                    self.hover[view] = band;
                }
            }
            Action::ToggleTheme => {
                self.theme = match self.theme {
                    Theme::Light => Theme::Dark,
                    Theme::Dark => Theme::Light,
                };
            }
            Action::ToggleRegionColoring => {
                self.region_coloring = !self.region_coloring;
                // hover bands only mean something on the continuous scale
                self.hover = [None; MAX_VIEWS];
            }
            Action::SetPointScale(scale) => {
                self.point_scale = scale.clamp(1.0, 100.0);
            }
        }
    }
}

/// Compare-dialog selection toggle: adding past four is a no-op, and removing
/// the last selected key is a no-op, so a confirmed selection always holds
/// between one and four keys. An entirely empty selection can only occur
/// before the first pick, and `StartCompare` rejects it.
pub fn toggle_selection(selection: &mut Vec<String>, key: &str) {
    if let Some(pos) = selection.iter().position(|k| k == key) {
        if selection.len() > 1 {
            selection.remove(pos);
        }
    } else if selection.len() < MAX_VIEWS {
        selection.push(key.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ViewState {
        ViewState::new(
            "E125",
            "Sox2",
            vec!["Heart".into(), "Kidney".into(), "Liver".into()],
        )
    }

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("k{i}")).collect()
    }

    #[test]
    fn test_single_mode_select_replaces_focus() {
        let mut s = state();
        s.apply(Action::SelectTrait("Tbx5".into()));
        assert_eq!(s.views().len(), 1);
        assert_eq!(s.views()[0].trait_key, "Tbx5");
        assert_eq!(s.views()[0].slice, "E125");
        s.apply(Action::SelectSection("E135".into()));
        assert_eq!(s.views()[0].slice, "E135");
        assert_eq!(s.views()[0].trait_key, "Tbx5");
        assert!(!s.is_compare());
    }

    #[test]
    fn test_compare_by_trait_shares_first_slice() {
        let mut s = state();
        s.apply(Action::StartCompare { dimension: ViewKind::Trait, keys: keys(3) });
        assert!(s.is_compare());
        assert_eq!(s.views().len(), 3);
        for (i, v) in s.views().iter().enumerate() {
            assert_eq!(v.slice, "E125");
            assert_eq!(v.trait_key, format!("k{i}"));
        }
    }

    #[test]
    fn test_compare_by_section_shares_first_trait() {
        let mut s = state();
        s.apply(Action::StartCompare { dimension: ViewKind::Section, keys: keys(2) });
        for v in s.views() {
            assert_eq!(v.trait_key, "Sox2");
        }
        assert_eq!(s.views()[1].slice, "k1");
    }

    #[test]
    fn test_view_count_invariant() {
        let mut s = state();
        s.apply(Action::StartCompare { dimension: ViewKind::Trait, keys: vec![] });
        assert!(!s.is_compare(), "empty selection must be rejected");
        s.apply(Action::StartCompare { dimension: ViewKind::Trait, keys: keys(4) });
        assert_eq!(s.views().len(), 4);

        let mut selection = keys(4);
        toggle_selection(&mut selection, "k5");
        assert_eq!(selection.len(), 4, "fifth selection must be a no-op");
        toggle_selection(&mut selection, "k2");
        assert_eq!(selection.len(), 3);
        let mut last = vec!["only".to_string()];
        toggle_selection(&mut last, "only");
        assert_eq!(last.len(), 1, "last selected key cannot be removed");
    }

    #[test]
    fn test_close_compare_restores_single_state() {
        let mut s = state();
        s.apply(Action::SelectTrait("Tbx5".into()));
        s.apply(Action::ToggleRegion { view: 0, region: "Liver".into() });
        s.apply(Action::StartCompare { dimension: ViewKind::Section, keys: keys(2) });
        s.apply(Action::ToggleRegion { view: 1, region: "Heart".into() });
        s.apply(Action::CloseCompare);
        assert!(!s.is_compare());
        assert_eq!(s.views()[0].trait_key, "Tbx5");
        // the shared filter kept its pre-compare shape
        assert!(!s.filter(0).contains("Liver"));
        assert!(s.filter(0).contains("Heart"));
    }

    #[test]
    fn test_filter_scoping_per_view() {
        let mut s = state();
        s.apply(Action::StartCompare { dimension: ViewKind::Trait, keys: keys(4) });
        s.apply(Action::ToggleRegion { view: 2, region: "Heart".into() });
        assert!(!s.filter(2).contains("Heart"));
        for view in [0, 1, 3] {
            assert!(s.filter(view).contains("Heart"), "view {view} was altered");
        }
        s.apply(Action::ClearRegions { view: 0 });
        assert!(s.filter(0).is_empty());
        assert_eq!(s.filter(1).len(), 3);
        s.apply(Action::ShowAllRegions { view: 2 });
        assert_eq!(s.filter(2).len(), 3);
    }

    #[test]
    fn test_single_mode_filter_is_shared() {
        let mut s = state();
        s.apply(Action::ToggleRegion { view: 0, region: "Kidney".into() });
        assert!(!s.filter(0).contains("Kidney"));
        s.apply(Action::ClearRegions { view: 0 });
        assert!(s.filter(0).is_empty());
        s.apply(Action::ShowAllRegions { view: 0 });
        assert_eq!(s.filter(0).len(), 3);
    }

    #[test]
    fn test_hover_band_is_per_view_and_cleared_on_transition() {
        let mut s = state();
        s.apply(Action::StartCompare { dimension: ViewKind::Trait, keys: keys(2) });
        s.apply(Action::SetHover { view: 1, band: Some((0.5, 0.8)) });
        assert_eq!(s.hover(1), Some((0.5, 0.8)));
        assert_eq!(s.hover(0), None);
        // out-of-range view index is ignored
        s.apply(Action::SetHover { view: 3, band: Some((0.0, 1.0)) });
        assert_eq!(s.hover(3), None);
        s.apply(Action::CloseCompare);
        assert_eq!(s.hover(1), None);
    }

    #[test]
    fn test_region_coloring_toggles_in_any_mode() {
        let mut state = state();
        assert!(!state.region_coloring);

        // single mode: the toggle flips and drops any hover band
        state.apply(Action::SetHover { view: 0, band: Some((0.1, 0.2)) });
        state.apply(Action::ToggleRegionColoring);
        assert!(state.region_coloring);
        assert_eq!(state.hover(0), None);

        // still flips while comparing traits
        state.apply(Action::StartCompare {
            dimension: ViewKind::Trait,
            keys: vec!["Sox2".to_string(), "Pax9".to_string()],
        });
        state.apply(Action::ToggleRegionColoring);
        assert!(!state.region_coloring);
    }

    #[test]
    fn test_point_scale_clamped() {
        let mut s = state();
        s.apply(Action::SetPointScale(0.0));
        assert_eq!(s.point_scale, 1.0);
        s.apply(Action::SetPointScale(500.0));
        assert_eq!(s.point_scale, 100.0);
    }
}
