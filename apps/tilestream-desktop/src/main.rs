use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tilestream_render_wgpu::{BufferRegistry, OrbitCamera, TilePipeline, WgpuTileDrawer, WgpuUploader};
use tilestream_stream::{RetirementPolicy, StreamConfig, TileStream};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

const STATS_INTERVAL: Duration = Duration::from_secs(5);
/// Radians per second when orbiting with the arrow keys.
const KEY_ORBIT_SPEED: f32 = 1.5;

#[derive(Parser)]
#[command(name = "tilestream-desktop", about = "Streamed tile grid viewer")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// JSON stream configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Retirement policy: eager or regenerated-slot
    #[arg(long)]
    policy: Option<RetirementPolicy>,
}

/// Everything that exists only once the window and device are up.
struct Gpu {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: wgpu::SurfaceConfiguration,
    pipeline: TilePipeline,
    drawer: WgpuTileDrawer,
    stream: Option<TileStream<WgpuUploader>>,
}

impl Gpu {
    fn new(event_loop: &ActiveEventLoop, stream_config: StreamConfig) -> Result<Self> {
        let attrs = Window::default_attributes()
            .with_title("Tile Stream")
            .with_inner_size(PhysicalSize::new(1280u32, 720));
        let window = Arc::new(event_loop.create_window(attrs).context("create window")?);

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window.clone())
            .context("create surface")?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| anyhow!("no suitable GPU adapter"))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("tilestream_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))
        .context("create device")?;
        let device = Arc::new(device);
        let queue = Arc::new(queue);

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| anyhow!("surface reports no formats"))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let pipeline = TilePipeline::new(&device, surface_format, config.width, config.height);

        let registry = BufferRegistry::new();
        let uploader = WgpuUploader::new(Arc::clone(&device), Arc::clone(&queue), registry.clone());
        let drawer = WgpuTileDrawer::new(registry);
        let stream = TileStream::start(uploader, stream_config).context("start tile stream")?;

        tracing::info!(
            "GPU initialized with {} backend",
            adapter.get_info().backend.to_str()
        );

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            pipeline,
            drawer,
            stream: Some(stream),
        })
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        self.config.width = size.width.max(1);
        self.config.height = size.height.max(1);
        self.surface.configure(&self.device, &self.config);
        self.pipeline
            .resize(&self.device, self.config.width, self.config.height);
    }

    fn aspect(&self) -> f32 {
        self.config.width as f32 / self.config.height.max(1) as f32
    }

    fn render(&mut self, camera: &OrbitCamera) {
        let output = match self.surface.get_current_texture() {
            Ok(t) => t,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.config);
                return;
            }
            Err(e) => {
                tracing::error!("surface error: {e}");
                return;
            }
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.pipeline.update_camera(&self.queue, camera);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame_encoder"),
            });
        {
            let mut pass = self.pipeline.begin_pass(&mut encoder, &view);
            if let Some(stream) = &mut self.stream {
                if let Err(e) = stream.advance_and_draw(&mut self.drawer, &mut pass) {
                    tracing::warn!("tile stream: {e}");
                }
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
    }

    /// Tear the stream down on this (render) thread.
    fn shutdown(&mut self) {
        if let Some(stream) = self.stream.take() {
            let report = stream.shutdown(&mut self.drawer);
            tracing::info!(
                drawables = report.drawables_destroyed,
                buffers = report.buffers_released,
                joined = report.producer_joined,
                "tile stream stopped"
            );
        }
    }
}

struct App {
    stream_config: StreamConfig,
    camera: OrbitCamera,
    gpu: Option<Gpu>,
    keys_held: HashSet<KeyCode>,
    dragging: bool,
    last_frame: Instant,
    last_stats: Instant,
}

impl App {
    fn new(stream_config: StreamConfig) -> Self {
        Self {
            stream_config,
            camera: OrbitCamera::default(),
            gpu: None,
            keys_held: HashSet::new(),
            dragging: false,
            last_frame: Instant::now(),
            last_stats: Instant::now(),
        }
    }

    fn update(&mut self, dt: f32) {
        let step = KEY_ORBIT_SPEED * dt / self.camera.sensitivity;
        if self.keys_held.contains(&KeyCode::ArrowLeft) {
            self.camera.rotate(-step, 0.0);
        }
        if self.keys_held.contains(&KeyCode::ArrowRight) {
            self.camera.rotate(step, 0.0);
        }
        if self.keys_held.contains(&KeyCode::ArrowUp) {
            self.camera.rotate(0.0, step);
        }
        if self.keys_held.contains(&KeyCode::ArrowDown) {
            self.camera.rotate(0.0, -step);
        }
    }

    fn log_stats(&mut self) {
        if self.last_stats.elapsed() < STATS_INTERVAL {
            return;
        }
        self.last_stats = Instant::now();
        let Some(stream) = self.gpu.as_ref().and_then(|g| g.stream.as_ref()) else {
            return;
        };
        let stats = stream.stats();
        tracing::info!(
            cycles = stats.producer.cycles,
            uploads = stats.producer.uploads,
            released = stats.producer.buffers_released,
            swaps = stats.consumer.swaps,
            frame_avg = ?stats.frame_time_avg,
            frame_max = ?stats.frame_time_max,
            "stream stats"
        );
    }

    fn exit(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(gpu) = &mut self.gpu {
            gpu.shutdown();
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.gpu.is_some() {
            return;
        }
        match Gpu::new(event_loop, self.stream_config.clone()) {
            Ok(gpu) => {
                self.camera.aspect = gpu.aspect();
                self.gpu = Some(gpu);
            }
            Err(e) => {
                tracing::error!("startup failed: {e:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => self.exit(event_loop),
            WindowEvent::Resized(new_size) => {
                if let Some(gpu) = &mut self.gpu {
                    gpu.resize(new_size);
                    self.camera.aspect = gpu.aspect();
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: key_state,
                        ..
                    },
                ..
            } => {
                let pressed = key_state == ElementState::Pressed;
                if key == KeyCode::Escape && pressed {
                    self.exit(event_loop);
                } else if pressed {
                    self.keys_held.insert(key);
                } else {
                    self.keys_held.remove(&key);
                }
            }
            WindowEvent::MouseInput {
                button: MouseButton::Right,
                state: btn_state,
                ..
            } => {
                self.dragging = btn_state == ElementState::Pressed;
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let steps = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32 / 40.0,
                };
                self.camera.zoom(steps);
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let dt = (now - self.last_frame).as_secs_f32().min(0.1);
                self.last_frame = now;
                self.update(dt);

                if let Some(gpu) = &mut self.gpu {
                    gpu.render(&self.camera);
                    gpu.window.request_redraw();
                }
                self.log_stats();
            }
            _ => {}
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _device_id: winit::event::DeviceId,
        event: DeviceEvent,
    ) {
        if let DeviceEvent::MouseMotion { delta } = event {
            if self.dragging {
                self.camera.rotate(delta.0 as f32, delta.1 as f32);
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(gpu) = &self.gpu {
            gpu.window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(gpu) = &mut self.gpu {
            gpu.shutdown();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let mut stream_config = match &cli.config {
        Some(path) => StreamConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => StreamConfig::default(),
    };
    if let Some(policy) = cli.policy {
        stream_config.policy = policy;
    }

    tracing::info!(policy = %stream_config.policy, "tilestream-desktop starting");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(stream_config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
