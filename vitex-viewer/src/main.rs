//! # VITEX Viewer
//!
//! Windowed demo harness for the frame pipeline. A producer thread publishes
//! synthetic NV12 (and occasionally RGBA) frames into the handoff mailbox;
//! the render thread runs them through the pipeline and blits the resulting
//! texture to the window.
//!
//! ```text
//! ┌───────────────┐  publish   ┌─────────────┐  render_tick  ┌────────────┐
//! │ Producer      │───────────►│ FrameHandoff │──────────────►│ wgpu blit  │
//! │ (synthetic)   │            └─────────────┘               └────────────┘
//! └───────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use vitex_core::{
    ColorSpace, FrameDescriptor, FrameHandoff, PipelineError, PixelFormat, Plane, RenderSession,
    TextureId, WgpuBackend,
};

// ============================================================================
// Vertex and Shader
// ============================================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 2],
    tex_coords: [f32; 2],
}

const VERTICES: &[Vertex] = &[
    Vertex { position: [-1.0, -1.0], tex_coords: [0.0, 1.0] },
    Vertex { position: [ 1.0, -1.0], tex_coords: [1.0, 1.0] },
    Vertex { position: [ 1.0,  1.0], tex_coords: [1.0, 0.0] },
    Vertex { position: [-1.0,  1.0], tex_coords: [0.0, 0.0] },
];

const INDICES: &[u16] = &[0, 1, 2, 2, 3, 0];

const SHADER_BLIT: &str = r#"
struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coords: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) tex_coords: vec2<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(in.position, 0.0, 1.0);
    out.tex_coords = in.tex_coords;
    return out;
}

@group(0) @binding(0) var t_frame: texture_2d<f32>;
@group(0) @binding(1) var s_frame: sampler;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(t_frame, s_frame, in.tex_coords);
}
"#;

// ============================================================================
// Synthetic Frame Producer
// ============================================================================

const FRAME_WIDTH: u32 = 640;
const FRAME_HEIGHT: u32 = 360;

struct Producer {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Producer {
    /// Spawn a thread publishing ~60 frames/s of a scrolling NV12 gradient,
    /// with a packed RGBA frame every 120th to exercise the direct path.
    fn spawn(handoff: Arc<FrameHandoff>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("vitex-producer".into())
            .spawn(move || {
                let (w, h) = (FRAME_WIDTH as usize, FRAME_HEIGHT as usize);
                let mut luma = vec![0u8; w * h];
                let mut chroma = vec![0u8; w * h.div_ceil(2)];
                let mut rgba = vec![0u8; w * h * 4];
                let mut tick = 0u64;

                while !stop_flag.load(Ordering::Relaxed) {
                    if tick % 120 == 119 {
                        fill_rgba_bars(&mut rgba, w, h, tick);
                        handoff.publish(&FrameDescriptor::packed(
                            PixelFormat::Rgba32,
                            FRAME_WIDTH,
                            FRAME_HEIGHT,
                            &rgba,
                            w * 4,
                        ));
                    } else {
                        fill_nv12_gradient(&mut luma, &mut chroma, w, h, tick);
                        handoff.publish(&FrameDescriptor::semi_planar(
                            PixelFormat::Nv12,
                            FRAME_WIDTH,
                            FRAME_HEIGHT,
                            Plane { data: &luma, stride: w },
                            Plane { data: &chroma, stride: w },
                        ));
                    }
                    tick += 1;
                    std::thread::sleep(Duration::from_millis(16));
                }
            })
            .expect("spawn producer thread");

        Self {
            stop,
            thread: Some(thread),
        }
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn fill_nv12_gradient(luma: &mut [u8], chroma: &mut [u8], w: usize, h: usize, tick: u64) {
    let phase = (tick * 2) as usize;
    for row in 0..h {
        for col in 0..w {
            luma[row * w + col] = (((col + phase) % 220) + 16) as u8;
        }
    }
    for row in 0..h.div_ceil(2) {
        for pair in 0..w / 2 {
            let idx = row * w + pair * 2;
            chroma[idx] = ((row + phase / 4) % 255) as u8;
            chroma[idx + 1] = ((pair + phase / 2) % 255) as u8;
        }
    }
}

fn fill_rgba_bars(rgba: &mut [u8], w: usize, h: usize, tick: u64) {
    const BARS: [[u8; 3]; 7] = [
        [235, 235, 235],
        [235, 235, 16],
        [16, 235, 235],
        [16, 235, 16],
        [235, 16, 235],
        [235, 16, 16],
        [16, 16, 235],
    ];
    let shift = (tick / 8) as usize;
    for row in 0..h {
        for col in 0..w {
            let bar = BARS[((col * 7 / w) + shift) % 7];
            let idx = (row * w + col) * 4;
            rgba[idx] = bar[0];
            rgba[idx + 1] = bar[1];
            rgba[idx + 2] = bar[2];
            rgba[idx + 3] = 255;
        }
    }
}

// ============================================================================
// Viewer State
// ============================================================================

struct ViewerState {
    window: Arc<Window>,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    blit_pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    // Rebuilt only when the pipeline hands back a different texture
    bound: Option<(TextureId, wgpu::BindGroup)>,
    session: RenderSession<WgpuBackend>,
    producer: Producer,
}

impl ViewerState {
    async fn new(window: Arc<Window>) -> Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .context("surface creation failed")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow!("no suitable GPU adapter"))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    label: Some("vitex_device"),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .context("device request failed")?;
        let device = Arc::new(device);
        let queue = Arc::new(queue);

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
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
                label: Some("blit_bind_group_layout"),
            });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit_shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER_BLIT.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blit_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        };

        let blit_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("blit_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[vertex_layout],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: Some(wgpu::Face::Back),
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            cache: None,
        });

        use wgpu::util::DeviceExt;
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("blit_vertices"),
            contents: bytemuck::cast_slice(VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("blit_indices"),
            contents: bytemuck::cast_slice(INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });

        let backend = WgpuBackend::new(Arc::clone(&device), Arc::clone(&queue));
        let session = RenderSession::new(backend, ColorSpace::Bt709);
        let producer = Producer::spawn(session.handoff());

        info!(width = size.width, height = size.height, "viewer initialized");

        Ok(Self {
            window,
            device,
            queue,
            surface,
            surface_config,
            blit_pipeline,
            bind_group_layout,
            vertex_buffer,
            index_buffer,
            sampler,
            bound: None,
            session,
            producer,
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
        self.session.on_resize();
        self.bound = None;
    }

    /// Advance the pipeline one frame and draw whatever texture it produced.
    fn redraw(&mut self) -> Result<(), wgpu::SurfaceError> {
        match self.session.render_tick() {
            Ok(result) => self.bind_texture(result.id),
            Err(PipelineError::NotReady) => self.bound = None,
            Err(error) => {
                error!(%error, "pipeline failed, resetting");
                self.session.reset();
                self.bound = None;
            }
        }

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("viewer_encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("viewer_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            if let Some((_, bind_group)) = &self.bound {
                render_pass.set_pipeline(&self.blit_pipeline);
                render_pass.set_bind_group(0, bind_group, &[]);
                render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
                render_pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
                render_pass.draw_indexed(0..INDICES.len() as u32, 0, 0..1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    fn bind_texture(&mut self, id: TextureId) {
        if matches!(self.bound, Some((bound_id, _)) if bound_id == id) {
            return;
        }
        let Some(texture) = self.session.backend().texture(id) else {
            self.bound = None;
            return;
        };
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        self.bound = Some((id, bind_group));
    }

    fn shutdown(&mut self) {
        self.producer.stop();
        self.bound = None;
        self.session.shutdown();

        let stats = self.session.stats();
        match serde_json::to_string_pretty(&stats) {
            Ok(json) => info!("pipeline stats:\n{json}"),
            Err(error) => warn!(%error, "failed to serialize stats"),
        }
    }
}

// ============================================================================
// Application
// ============================================================================

#[derive(Default)]
struct ViewerApp {
    state: Option<ViewerState>,
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        let attributes = Window::default_attributes()
            .with_title("VITEX Viewer")
            .with_inner_size(winit::dpi::LogicalSize::new(960.0, 540.0));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(error) => {
                error!(%error, "window creation failed");
                event_loop.exit();
                return;
            }
        };
        match pollster::block_on(ViewerState::new(window)) {
            Ok(state) => self.state = Some(state),
            Err(error) => {
                error!(%error, "viewer initialization failed");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => {
                state.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                state.resize(size.width, size.height);
            }
            WindowEvent::RedrawRequested => match state.redraw() {
                Ok(()) => {}
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    let size = state.window.inner_size();
                    state.resize(size.width, size.height);
                }
                Err(wgpu::SurfaceError::OutOfMemory) => {
                    error!("surface out of memory");
                    state.shutdown();
                    event_loop.exit();
                }
                Err(error) => warn!(%error, "frame skipped"),
            },
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = vitex_core::VERSION, "starting VITEX viewer");

    let event_loop = EventLoop::new().context("event loop creation failed")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = ViewerApp::default();
    event_loop.run_app(&mut app).context("event loop failed")?;
    Ok(())
}
