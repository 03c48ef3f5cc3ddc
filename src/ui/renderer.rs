//! wgpu graphics backend for the avatar view.
//!
//! Each context renders the scene into an offscreen colour/depth target with
//! CPU-skinned vertex data. The target is the context's drawing element: the
//! egui paint callback blits it into the window's render pass.

#![cfg(feature = "native-ui")]

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use bytemuck::{Pod, Zeroable};
use eframe::egui_wgpu::RenderState;
use eframe::wgpu;
use glam::Vec3;

use crate::error::SurfaceCreationError;
use crate::rig::{Rig, RigId};
use crate::view::scene::{LightRig, Scene};
use crate::view::surface::{
    DrawingElement, ElementId, GraphicsBackend, GraphicsContext, SurfaceConfig,
};

const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const MSAA_SAMPLES: u32 = 4;

/// Vertex layout matching the shader.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl Vertex {
    const ATTRIBS: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }
}

/// Uniform buffer layout matching the shader.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct Uniforms {
    pub mvp: [[f32; 4]; 4],
    pub model: [[f32; 4]; 4],
    /// xyz: toward the light, w unused
    pub key_dir: [f32; 4],
    /// rgb premultiplied by intensity
    pub key_color: [f32; 4],
    pub sky_color: [f32; 4],
    pub ground_color: [f32; 4],
    /// xyz: sky direction
    pub sky_dir: [f32; 4],
    pub base_color: [f32; 4],
}

impl Uniforms {
    fn new(mvp: glam::Mat4, model: glam::Mat4, lights: &LightRig, base_color: [f32; 4]) -> Self {
        let hemi = &lights.hemisphere;
        let key = &lights.directional;
        Self {
            mvp: mvp.to_cols_array_2d(),
            model: model.to_cols_array_2d(),
            key_dir: key.direction().extend(0.0).to_array(),
            key_color: scaled(key.color, key.intensity),
            sky_color: scaled(hemi.sky, hemi.intensity),
            ground_color: scaled(hemi.ground, hemi.intensity),
            sky_dir: hemi.position.normalize_or(Vec3::Y).extend(0.0).to_array(),
            base_color,
        }
    }
}

fn scaled(rgb: [f32; 3], intensity: f32) -> [f32; 4] {
    [rgb[0] * intensity, rgb[1] * intensity, rgb[2] * intensity, 1.0]
}

/// One primitive's GPU resources.
struct DrawCall {
    mesh: usize,
    primitive: usize,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    num_indices: u32,
    base_color: [f32; 4],
}

/// Device handles shared by every context a backend creates.
#[derive(Clone)]
struct Gpu {
    device: wgpu::Device,
    queue: wgpu::Queue,
    target_format: wgpu::TextureFormat,
}

/// Creates wgpu contexts on eframe's device.
pub struct WgpuBackend {
    gpu: Option<Gpu>,
}

impl WgpuBackend {
    /// `None` when eframe started without a wgpu renderer; every context
    /// request then fails.
    pub fn new(render_state: Option<&RenderState>) -> Self {
        match render_state {
            Some(rs) => {
                let info = rs.adapter.get_info();
                tracing::info!(
                    "GPU adapter: {} (vendor {:#06x}, {:?}, {:?}, driver {} {})",
                    info.name,
                    info.vendor,
                    info.device_type,
                    info.backend,
                    info.driver,
                    info.driver_info
                );
            }
            None => tracing::warn!("No wgpu render state, the avatar cannot be drawn"),
        }
        Self {
            gpu: render_state.map(|rs| Gpu {
                device: rs.device.clone(),
                queue: rs.queue.clone(),
                target_format: rs.target_format,
            }),
        }
    }
}

impl GraphicsBackend for WgpuBackend {
    fn create_context(
        &self,
        config: &SurfaceConfig,
    ) -> Result<Box<dyn GraphicsContext>, SurfaceCreationError> {
        let gpu = self.gpu.clone().ok_or_else(|| {
            SurfaceCreationError::NoAdapter("wgpu render state not available".to_string())
        })?;
        Ok(Box::new(WgpuContext::new(gpu, config)))
    }
}

/// Offscreen render target, shown by blitting it into egui's pass.
pub struct OffscreenTarget {
    id: ElementId,
    blit_pipeline: wgpu::RenderPipeline,
    blit_bind_group: Mutex<Option<wgpu::BindGroup>>,
}

impl OffscreenTarget {
    fn bind_group(&self) -> MutexGuard<'_, Option<wgpu::BindGroup>> {
        self.blit_bind_group.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Draw the target as a fullscreen triangle. No-op once released.
    pub fn blit(&self, render_pass: &mut wgpu::RenderPass<'_>) {
        let guard = self.bind_group();
        let Some(bind_group) = guard.as_ref() else {
            return;
        };
        render_pass.set_pipeline(&self.blit_pipeline);
        render_pass.set_bind_group(0, bind_group, &[]);
        render_pass.draw(0..3, 0..1);
    }
}

impl DrawingElement for OffscreenTarget {
    fn id(&self) -> ElementId {
        self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Size-dependent textures.
struct Targets {
    size: [u32; 2],
    /// Multisampled colour, resolved into `color_view`
    msaa_view: Option<wgpu::TextureView>,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
}

pub struct WgpuContext {
    gpu: Gpu,
    sample_count: u32,
    transparent: bool,
    scene_pipeline: wgpu::RenderPipeline,
    scene_bind_group_layout: wgpu::BindGroupLayout,
    blit_bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    targets: Option<Targets>,
    element: std::sync::Arc<OffscreenTarget>,
    rigs: HashMap<RigId, Vec<DrawCall>>,
}

impl WgpuContext {
    fn new(gpu: Gpu, config: &SurfaceConfig) -> Self {
        let device = &gpu.device;
        let sample_count = if config.antialias { MSAA_SAMPLES } else { 1 };

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("pet_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shader.wgsl").into()),
        });

        let scene_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("pet_scene_bgl"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let scene_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("pet_scene_pl"),
                bind_group_layouts: &[&scene_bind_group_layout],
                push_constant_ranges: &[],
            });

        let scene_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("pet_scene_pipeline"),
            layout: Some(&scene_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[Vertex::layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: OFFSCREEN_FORMAT,
                    blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                // VRM materials are frequently double-sided
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: Default::default(),
                bias: Default::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: sample_count,
                ..Default::default()
            },
            multiview: None,
            cache: None,
        });

        let blit_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("pet_blit_bgl"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });

        let blit_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("pet_blit_pl"),
                bind_group_layouts: &[&blit_bind_group_layout],
                push_constant_ranges: &[],
            });

        let blit_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("pet_blit_pipeline"),
            layout: Some(&blit_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_blit"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_blit"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: gpu.target_format,
                    // Offscreen colour is premultiplied; let the window show through
                    blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: Default::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("pet_sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let element = std::sync::Arc::new(OffscreenTarget {
            id: ElementId::next(),
            blit_pipeline,
            blit_bind_group: Mutex::new(None),
        });

        let mut ctx = Self {
            sample_count,
            transparent: config.transparent,
            scene_pipeline,
            scene_bind_group_layout,
            blit_bind_group_layout,
            sampler,
            targets: None,
            element,
            rigs: HashMap::new(),
            gpu,
        };
        ctx.resize(config.width, config.height);
        tracing::debug!(
            "wgpu context {}x{} ({}x MSAA)",
            config.width,
            config.height,
            sample_count
        );
        ctx
    }

    fn clear_color(&self) -> wgpu::Color {
        if self.transparent {
            wgpu::Color::TRANSPARENT
        } else {
            wgpu::Color {
                r: 0.12,
                g: 0.12,
                b: 0.16,
                a: 1.0,
            }
        }
    }

    /// Rewrite every vertex buffer of `rig` from its current skinned pose.
    fn update_vertices(&self, rig: &Rig, draws: &[DrawCall]) {
        let model = rig.model();
        for dc in draws {
            let prim = &model.meshes[dc.mesh].primitives[dc.primitive];
            let positions = rig
                .skinned_positions(dc.mesh)
                .and_then(|mesh| mesh.get(dc.primitive))
                .filter(|p| p.len() == prim.positions.len())
                .unwrap_or(&prim.positions);
            let vertices = build_vertices(positions, &prim.normals);
            self.gpu
                .queue
                .write_buffer(&dc.vertex_buffer, 0, bytemuck::cast_slice(&vertices));
        }
    }
}

fn build_vertices(positions: &[Vec3], normals: &[Vec3]) -> Vec<Vertex> {
    positions
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let n = normals.get(i).copied().unwrap_or(Vec3::Y);
            Vertex {
                position: p.to_array(),
                normal: n.to_array(),
            }
        })
        .collect()
}

impl GraphicsContext for WgpuContext {
    fn drawing_element(&self) -> std::sync::Arc<dyn DrawingElement> {
        self.element.clone()
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        if self.targets.as_ref().is_some_and(|t| t.size == [width, height]) {
            return;
        }
        let device = &self.gpu.device;

        let color_view = create_texture(
            device,
            "pet_offscreen_color",
            width,
            height,
            OFFSCREEN_FORMAT,
            1,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        );
        let msaa_view = (self.sample_count > 1).then(|| {
            create_texture(
                device,
                "pet_offscreen_msaa",
                width,
                height,
                OFFSCREEN_FORMAT,
                self.sample_count,
                wgpu::TextureUsages::RENDER_ATTACHMENT,
            )
        });
        let depth_view = create_texture(
            device,
            "pet_offscreen_depth",
            width,
            height,
            DEPTH_FORMAT,
            self.sample_count,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        );

        let blit_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pet_blit_bg"),
            layout: &self.blit_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&color_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        *self.element.bind_group() = Some(blit_bind_group);

        self.targets = Some(Targets {
            size: [width, height],
            msaa_view,
            color_view,
            depth_view,
        });
    }

    fn upload_rig(&mut self, rig: &Rig) {
        let device = &self.gpu.device;
        let model = rig.model();
        let mut draws = Vec::new();

        for (mesh_idx, mesh) in model.meshes.iter().enumerate() {
            for (prim_idx, prim) in mesh.primitives.iter().enumerate() {
                if prim.positions.is_empty() || prim.indices.is_empty() {
                    continue;
                }

                let vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("pet_vb_{}_{}", mesh_idx, prim_idx)),
                    size: (prim.positions.len() * std::mem::size_of::<Vertex>()) as u64,
                    usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });

                let index_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("pet_ib_{}_{}", mesh_idx, prim_idx)),
                    size: (prim.indices.len() * std::mem::size_of::<u32>()) as u64,
                    usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                self.gpu
                    .queue
                    .write_buffer(&index_buffer, 0, bytemuck::cast_slice(&prim.indices));

                let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("pet_ub_{}_{}", mesh_idx, prim_idx)),
                    size: std::mem::size_of::<Uniforms>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });

                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("pet_bg_{}_{}", mesh_idx, prim_idx)),
                    layout: &self.scene_bind_group_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniform_buffer.as_entire_binding(),
                    }],
                });

                draws.push(DrawCall {
                    mesh: mesh_idx,
                    primitive: prim_idx,
                    vertex_buffer,
                    index_buffer,
                    uniform_buffer,
                    bind_group,
                    num_indices: prim.indices.len() as u32,
                    base_color: prim.base_color,
                });
            }
        }

        self.update_vertices(rig, &draws);
        tracing::debug!("Uploaded {} with {} draw calls", rig.id(), draws.len());
        if let Some(old) = self.rigs.insert(rig.id(), draws) {
            destroy(old);
        }
    }

    fn release_rig(&mut self, id: RigId) {
        if let Some(draws) = self.rigs.remove(&id) {
            destroy(draws);
            tracing::debug!("Released GPU buffers of {}", id);
        }
    }

    fn render(&mut self, scene: &Scene) {
        let Some(targets) = self.targets.as_ref() else {
            return;
        };

        let draws = scene
            .rig()
            .and_then(|rig| self.rigs.get(&rig.id()).map(|d| (rig, d.as_slice())));

        if let Some((rig, draws)) = draws {
            self.update_vertices(rig, draws);
            let model = rig.root_matrix();
            let mvp = scene.camera().view_projection() * model;
            for dc in draws {
                let uniforms = Uniforms::new(mvp, model, scene.lights(), dc.base_color);
                self.gpu
                    .queue
                    .write_buffer(&dc.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));
            }
        }

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pet_offscreen_encoder"),
            });

        {
            let (view, resolve_target) = match targets.msaa_view.as_ref() {
                Some(msaa) => (msaa, Some(&targets.color_view)),
                None => (&targets.color_view, None),
            };
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("pet_offscreen_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color()),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &targets.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });

            if let Some((_, draws)) = draws {
                pass.set_pipeline(&self.scene_pipeline);
                for dc in draws {
                    pass.set_bind_group(0, &dc.bind_group, &[]);
                    pass.set_vertex_buffer(0, dc.vertex_buffer.slice(..));
                    pass.set_index_buffer(dc.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..dc.num_indices, 0, 0..1);
                }
            }
        }

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
    }

    fn release(&mut self) {
        for (_, draws) in self.rigs.drain() {
            destroy(draws);
        }
        *self.element.bind_group() = None;
        self.targets = None;
        tracing::debug!("wgpu context released");
    }
}

fn destroy(draws: Vec<DrawCall>) {
    for dc in draws {
        dc.vertex_buffer.destroy();
        dc.index_buffer.destroy();
        dc.uniform_buffer.destroy();
    }
}

fn create_texture(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
    sample_count: u32,
    usage: wgpu::TextureUsages,
) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    });
    texture.create_view(&Default::default())
}
