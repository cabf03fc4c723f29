mod app;
mod camera;
mod catalog;
mod color;
mod fuse;
mod ingest;
mod normalize;
mod range;
mod render;
mod viewstate;

use std::path::PathBuf;

fn main() -> eframe::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let data_dir = resolve_data_dir();
    if let Some(dir) = data_dir.as_ref() {
        log::info!("data directory: {}", dir.display());
    } else {
        log::warn!("no data directory selected; starting with the synthetic sample dataset");
    }

    let native_options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_title("scviz")
            .with_inner_size([1280.0, 860.0]),
        renderer: eframe::Renderer::Wgpu,
        ..Default::default()
    };

    eframe::run_native(
        "scviz",
        native_options,
        Box::new(move |cc| Ok(Box::new(app::ScvizApp::new(cc, data_dir)))),
    )
}

/// Data directory: first CLI argument, then `SCVIZ_DATA`, then a folder picker.
/// `None` falls through to the built-in sample dataset.
fn resolve_data_dir() -> Option<PathBuf> {
    if let Some(arg) = std::env::args().nth(1) {
        return Some(PathBuf::from(arg));
    }
    if let Ok(env_dir) = std::env::var("SCVIZ_DATA") {
        if !env_dir.is_empty() {
            return Some(PathBuf::from(env_dir));
        }
    }
    rfd::FileDialog::new()
        .set_title("Select the directory holding the five CSV sources")
        .pick_folder()
}
