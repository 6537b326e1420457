//! N-Body Gravitational Simulation
//!
//! Advances particles with compute kernels and draws them straight from the
//! buffer the kernels write.

use nbody_physics::ParticleBuffers;
use nbody_renderer::{Camera, PointRenderer};
use nbody_simulation::{
    Backend, ConfigError, CpuSimulation, FrameDriver, FrameOutcome, GpuSimulation,
    SimulationConfig, SimulationError,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

/// Frames averaged for the title bar statistics
const FRAME_TIME_WINDOW: usize = 60;

/// Fatal errors that end the process
#[derive(Error, Debug)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Simulation(#[from] SimulationError),

    #[error("Failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),

    #[error("Surface reports no supported formats")]
    NoSurfaceFormat,

    #[error("Surface ran out of memory")]
    SurfaceOutOfMemory,

    #[error("Failed to create window: {0}")]
    Window(#[from] winit::error::OsError),

    #[error("Event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
}

#[derive(Error, Debug)]
enum FrameError {
    #[error("Surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),

    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

enum SimulationBackend {
    /// Kernels write the vertex store in place
    Gpu(GpuSimulation),
    /// Positions are uploaded to the vertex store after each release
    Cpu {
        simulation: CpuSimulation,
        vertex_store: wgpu::Buffer,
    },
}

struct GpuState {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,

    backend: SimulationBackend,
    driver: FrameDriver,
    renderer: PointRenderer,
    camera: Camera,
    particle_count: u32,

    frame_times: VecDeque<f32>,
    last_frame_time: Instant,
}

impl GpuState {
    async fn new(window: Arc<Window>, sim_config: &SimulationConfig) -> Result<Self, AppError> {
        let size = window.inner_size();

        // Create wgpu instance
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance.create_surface(window.clone())?;

        // Request adapter
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(SimulationError::from)?;

        log::info!("✓ Using GPU: {}", adapter.get_info().name);

        // Create device and queue
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(SimulationError::from)?;

        // Configure surface
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or(AppError::NoSurfaceFormat)?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoNoVsync,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        // Initialize particles; graphics allocates the shared vertex store first
        let particles =
            ParticleBuffers::initialize(sim_config.particle_count as usize, sim_config.seed);
        log::info!("✓ Initialized {} particles", particles.len());

        let renderer = PointRenderer::new(&device, config.format);
        let vertex_store = PointRenderer::create_vertex_store(&device, particles.positions());
        log::info!("✓ Renderer initialized");

        let backend = match sim_config.backend {
            Backend::Gpu => {
                let simulation =
                    GpuSimulation::new(device.clone(), queue.clone(), vertex_store, sim_config)
                        .await?;
                SimulationBackend::Gpu(simulation)
            }
            Backend::Cpu => SimulationBackend::Cpu {
                simulation: CpuSimulation::new(particles, sim_config.force_model)?,
                vertex_store,
            },
        };
        log::info!("✓ Simulation initialized ({:?} backend)", sim_config.backend);

        let camera = Camera::new(config.width, config.height);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            backend,
            driver: FrameDriver::new(sim_config.timestep),
            renderer,
            camera,
            particle_count: sim_config.particle_count,
            frame_times: VecDeque::with_capacity(FRAME_TIME_WINDOW),
            last_frame_time: Instant::now(),
        })
    }

    fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
            self.camera.resize(new_size.width, new_size.height);
        }
    }

    /// Simulate (unless priming) and draw one frame. Returns (fps, avg frame time ms).
    fn render(&mut self) -> Result<(f32, f32), FrameError> {
        // Track frame time
        let now = Instant::now();
        let frame_time = (now - self.last_frame_time).as_secs_f32() * 1000.0;
        self.last_frame_time = now;

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let Self {
            device,
            queue,
            backend,
            driver,
            renderer,
            camera,
            particle_count,
            ..
        } = self;
        let count = *particle_count;

        let outcome = match backend {
            SimulationBackend::Gpu(simulation) => {
                let (outcome, drawn) = driver.frame(simulation, |s| {
                    s.position_buffer()
                        .map(|buffer| renderer.render(device, queue, &view, camera, buffer, count))
                })?;
                drawn?;
                outcome
            }
            SimulationBackend::Cpu {
                simulation,
                vertex_store,
            } => {
                let (outcome, drawn) = driver.frame(simulation, |s| {
                    s.positions().map(|positions| {
                        PointRenderer::upload_positions(queue, vertex_store, positions);
                        renderer.render(device, queue, &view, camera, vertex_store, count)
                    })
                })?;
                drawn?;
                outcome
            }
        };

        if outcome == FrameOutcome::Primed {
            log::info!("✓ First frame drawn from initial positions");
        }

        output.present();

        self.frame_times.push_back(frame_time);
        if self.frame_times.len() > FRAME_TIME_WINDOW {
            self.frame_times.pop_front();
        }
        let avg_frame_time =
            self.frame_times.iter().sum::<f32>() / self.frame_times.len() as f32;
        let fps = if avg_frame_time > 0.0 {
            1000.0 / avg_frame_time
        } else {
            0.0
        };

        Ok((fps, avg_frame_time))
    }
}

struct App {
    sim_config: SimulationConfig,
    window: Option<Arc<Window>>,
    gpu_state: Option<GpuState>,
    fatal: Option<AppError>,
}

impl App {
    fn new(sim_config: SimulationConfig) -> Self {
        Self {
            sim_config,
            window: None,
            gpu_state: None,
            fatal: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<(), AppError> {
        let window_attributes = Window::default_attributes()
            .with_title("N-Body Simulation")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));

        let window = Arc::new(event_loop.create_window(window_attributes)?);
        let gpu_state = pollster::block_on(GpuState::new(window.clone(), &self.sim_config))?;

        self.window = Some(window);
        self.gpu_state = Some(gpu_state);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: AppError) {
        self.fatal = Some(error);
        self.gpu_state = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && self.fatal.is_none() {
            if let Err(error) = self.init(event_loop) {
                self.fail(event_loop, error);
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
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => event_loop.exit(),

            WindowEvent::Resized(physical_size) => {
                if let Some(gpu_state) = &mut self.gpu_state {
                    gpu_state.resize(physical_size);
                }
            }

            WindowEvent::RedrawRequested => {
                let fatal = match (&self.window, &mut self.gpu_state) {
                    (Some(window), Some(gpu_state)) => match gpu_state.render() {
                        Ok((fps, frame_time)) => {
                            window.set_title(&format!(
                                "N-Body - {:.0} FPS ({:.2}ms) - {} particles",
                                fps, frame_time, gpu_state.particle_count
                            ));
                            None
                        }
                        Err(FrameError::Surface(
                            wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated,
                        )) => {
                            gpu_state.resize(window.inner_size());
                            None
                        }
                        Err(FrameError::Surface(wgpu::SurfaceError::OutOfMemory)) => {
                            Some(AppError::SurfaceOutOfMemory)
                        }
                        Err(FrameError::Surface(e)) => {
                            log::warn!("Render error: {:?}", e);
                            None
                        }
                        Err(FrameError::Simulation(e)) => Some(AppError::from(e)),
                    },
                    _ => None,
                };

                if let Some(error) = fatal {
                    self.fail(event_loop, error);
                    return;
                }
            }

            _ => {}
        }

        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn run() -> Result<(), AppError> {
    let sim_config = SimulationConfig::from_env()?;
    log::info!(
        "Config: {} particles, dt = {}, {:?} forces, {:?} seed",
        sim_config.particle_count,
        sim_config.timestep,
        sim_config.force_model,
        sim_config.seed
    );

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(sim_config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

fn main() {
    // Initialize logger (RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting N-body simulation...");

    if let Err(error) = run() {
        log::error!("{}", error);
        std::process::exit(1);
    }
}
