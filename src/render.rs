use crate::viewstate::MAX_VIEWS;
use bytemuck::{Pod, Zeroable};
use egui_wgpu::wgpu;
use egui_wgpu::wgpu::util::DeviceExt;
use egui_wgpu::CallbackTrait;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// Typed capability diagnostic, checked once at layer construction and on
/// upload. The renderer fails closed instead of patching around a weak device.
#[derive(Debug, Error)]
pub enum PointLayerError {
    #[error("device exposes {available} vertex-stage storage buffers, point layer needs {needed}")]
    StorageBindings { available: u32, needed: u32 },
    #[error("point storage needs {needed} bytes, device binding limit is {limit}")]
    StorageSize { needed: u64, limit: u64 },
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct Uniforms {
    pub viewport_px: [f32; 2],
    pub center: [f32; 2],
    pub pixels_per_unit: f32,
    pub point_radius_px: f32,
    pub _pad: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CornerVert {
    corner: [f32; 2],
}

/// Per-view upload parameters, double-buffered through `SharedViews` between
/// the UI pass and the paint callback. The ids drive change detection so
/// buffers are only re-uploaded when the view's inputs actually changed.
#[derive(Clone)]
pub struct ViewParams {
    pub positions_id: u64,
    pub positions: Arc<Vec<f32>>,
    pub colors_id: u64,
    pub colors: Arc<Vec<u32>>,
    pub uniforms: Uniforms,
}

impl Default for ViewParams {
    fn default() -> Self {
        ViewParams {
            positions_id: 0,
            positions: Arc::new(Vec::new()),
            colors_id: 0,
            colors: Arc::new(Vec::new()),
            uniforms: Uniforms::zeroed(),
        }
    }
}

pub struct SharedViews {
    pub format: wgpu::TextureFormat,
    pub slots: Mutex<[ViewParams; MAX_VIEWS]>,
}

impl SharedViews {
    pub fn new(format: wgpu::TextureFormat) -> Self {
        SharedViews {
            format,
            slots: Mutex::new(std::array::from_fn(|_| ViewParams::default())),
        }
    }
}

/// GPU resources for one view slot: an instanced quad expanded per point,
/// positions and packed rgba8 colors in storage buffers.
pub struct PointLayerGpu {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    uniform_buf: wgpu::Buffer,
    positions: wgpu::Buffer,
    colors: wgpu::Buffer,
    corners: wgpu::Buffer,
    n_draw: u32,
    max_binding_bytes: u64,
    last_positions_id: u64,
    last_colors_id: u64,
}

impl PointLayerGpu {
    pub fn new(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
    ) -> Result<Self, PointLayerError> {
        let limits = device.limits();
        if limits.max_storage_buffers_per_shader_stage < 2 {
            return Err(PointLayerError::StorageBindings {
                available: limits.max_storage_buffers_per_shader_stage,
                needed: 2,
            });
        }
        let max_binding_bytes = limits.max_storage_buffer_binding_size as u64;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("points.wgsl"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../assets/points.wgsl").into()),
        });

        let storage_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("points_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<Uniforms>() as u64
                        ),
                    },
                    count: None,
                },
                storage_entry(1),
                storage_entry(2),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("points_pl"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("points_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<CornerVert>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &[wgpu::VertexAttribute {
                        format: wgpu::VertexFormat::Float32x2,
                        offset: 0,
                        shader_location: 0,
                    }],
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let uniform_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("points_uniform"),
            size: std::mem::size_of::<Uniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let positions = Self::storage_buffer(device, "points_pos", 4);
        let colors = Self::storage_buffer(device, "points_col", 4);

        let corners_data = [
            CornerVert { corner: [-1.0, -1.0] },
            CornerVert { corner: [1.0, -1.0] },
            CornerVert { corner: [1.0, 1.0] },
            CornerVert { corner: [-1.0, -1.0] },
            CornerVert { corner: [1.0, 1.0] },
            CornerVert { corner: [-1.0, 1.0] },
        ];
        let corners = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("points_corners"),
            contents: bytemuck::cast_slice(&corners_data),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let bind_group =
            Self::make_bind_group(device, &bind_group_layout, &uniform_buf, &positions, &colors);

        Ok(Self {
            pipeline,
            bind_group_layout,
            bind_group,
            uniform_buf,
            positions,
            colors,
            corners,
            n_draw: 0,
            max_binding_bytes,
            last_positions_id: 0,
            last_colors_id: 0,
        })
    }

    fn storage_buffer(device: &wgpu::Device, label: &str, bytes: u64) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: bytes.max(4),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn make_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        uniform_buf: &wgpu::Buffer,
        positions: &wgpu::Buffer,
        colors: &wgpu::Buffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("points_bg"),
            layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: uniform_buf.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: positions.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: colors.as_entire_binding() },
            ],
        })
    }

    pub fn prepare(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        params: &ViewParams,
    ) -> Result<(), PointLayerError> {
        let n_points = (params.positions.len() / 2).min(params.colors.len());
        self.n_draw = n_points as u32;
        if n_points == 0 {
            return Ok(());
        }

        let pos_bytes = (n_points as u64) * 2 * 4;
        let col_bytes = (n_points as u64) * 4;
        if pos_bytes > self.max_binding_bytes {
            return Err(PointLayerError::StorageSize {
                needed: pos_bytes,
                limit: self.max_binding_bytes,
            });
        }

        let mut rebound = false;
        if self.positions.size() < pos_bytes {
            self.positions = Self::storage_buffer(device, "points_pos", pos_bytes);
            rebound = true;
        }
        if self.colors.size() < col_bytes {
            self.colors = Self::storage_buffer(device, "points_col", col_bytes);
            rebound = true;
        }
        if rebound {
            self.bind_group = Self::make_bind_group(
                device,
                &self.bind_group_layout,
                &self.uniform_buf,
                &self.positions,
                &self.colors,
            );
            // buffers were replaced; force re-upload
            self.last_positions_id = 0;
            self.last_colors_id = 0;
        }

        if self.last_positions_id != params.positions_id {
            queue.write_buffer(
                &self.positions,
                0,
                bytemuck::cast_slice(&params.positions[..n_points * 2]),
            );
            self.last_positions_id = params.positions_id;
        }
        if self.last_colors_id != params.colors_id {
            queue.write_buffer(
                &self.colors,
                0,
                bytemuck::cast_slice(&params.colors[..n_points]),
            );
            self.last_colors_id = params.colors_id;
        }
        queue.write_buffer(&self.uniform_buf, 0, bytemuck::bytes_of(&params.uniforms));
        Ok(())
    }

    pub fn paint(&self, render_pass: &mut wgpu::RenderPass<'_>) {
        if self.n_draw == 0 {
            return;
        }
        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, &self.bind_group, &[]);
        render_pass.set_vertex_buffer(0, self.corners.slice(..));
        render_pass.draw(0..6, 0..self.n_draw);
    }
}

/// One layer per view slot, created lazily inside the egui-wgpu resource map.
struct LayerStore {
    layers: Vec<Option<PointLayerGpu>>,
    construction_failed: bool,
}

pub struct PointLayerCallback {
    pub shared: Arc<SharedViews>,
    pub slot: usize,
}

impl CallbackTrait for PointLayerCallback {
    fn prepare(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        _screen_descriptor: &egui_wgpu::ScreenDescriptor,
        _egui_encoder: &mut wgpu::CommandEncoder,
        callback_resources: &mut egui_wgpu::CallbackResources,
    ) -> Vec<wgpu::CommandBuffer> {
        if callback_resources.get::<LayerStore>().is_none() {
            callback_resources.insert(LayerStore {
                layers: (0..MAX_VIEWS).map(|_| None).collect(),
                construction_failed: false,
            });
        }
        let store = callback_resources
            .get_mut::<LayerStore>()
            .expect("layer store inserted above");
        if store.construction_failed {
            return Vec::new();
        }

        if store.layers[self.slot].is_none() {
            match PointLayerGpu::new(device, self.shared.format) {
                Ok(layer) => store.layers[self.slot] = Some(layer),
                Err(err) => {
                    log::error!("point layer unavailable: {err}");
                    store.construction_failed = true;
                    return Vec::new();
                }
            }
        }

        let params = self.shared.slots.lock()[self.slot].clone();
        if let Some(layer) = store.layers[self.slot].as_mut() {
            if let Err(err) = layer.prepare(device, queue, &params) {
                log::error!("point upload rejected: {err}");
                layer.n_draw = 0;
            }
        }
        Vec::new()
    }

    fn paint(
        &self,
        _info: eframe::egui::PaintCallbackInfo,
        render_pass: &mut wgpu::RenderPass<'static>,
        callback_resources: &egui_wgpu::CallbackResources,
    ) {
        let Some(store) = callback_resources.get::<LayerStore>() else {
            return;
        };
        if let Some(layer) = store.layers.get(self.slot).and_then(|l| l.as_ref()) {
            layer.paint(render_pass);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniforms_layout_matches_shader() {
        // Two vec2 plus two f32 plus padding: 32 bytes, 16-byte aligned.
        assert_eq!(std::mem::size_of::<Uniforms>(), 32);
    }

    #[test]
    fn test_shared_views_starts_empty() {
        let shared = SharedViews::new(wgpu::TextureFormat::Bgra8Unorm);
        let slots = shared.slots.lock();
        assert_eq!(slots.len(), MAX_VIEWS);
        assert!(slots.iter().all(|s| s.positions.is_empty()));
    }
}
