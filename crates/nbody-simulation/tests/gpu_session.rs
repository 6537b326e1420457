//! GPU session tests
//!
//! Each test requests a headless adapter and returns early when none exists,
//! so these pass on machines without a GPU.

use nbody_physics::{forces, Float4, ForceModel, ParticleBuffers, SeedPolicy};
use nbody_renderer::PointRenderer;
use nbody_simulation::{
    BufferOwner, FrameDriver, FrameOutcome, GpuSimulation, Kernel, Simulation, SimulationConfig,
    SimulationError,
};

fn headless_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    let _ = env_logger::builder().is_test(true).try_init();

    pollster::block_on(async {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok()?;

        adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Test Device"),
                ..Default::default()
            })
            .await
            .ok()
    })
}

macro_rules! require_gpu {
    () => {
        match headless_device() {
            Some(device) => device,
            None => {
                eprintln!("No GPU adapter available, skipping");
                return;
            }
        }
    };
}

fn session(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    positions: &[Float4],
    config: &SimulationConfig,
) -> GpuSimulation {
    let store = PointRenderer::create_vertex_store(device, positions);
    pollster::block_on(GpuSimulation::new(
        device.clone(),
        queue.clone(),
        store,
        config,
    ))
    .expect("session should build")
}

fn close(a: &[Float4], b: &[Float4], rel: f32) -> bool {
    a.len() == b.len()
        && a.iter().flatten().zip(b.iter().flatten()).all(|(x, y)| {
            (x - y).abs() <= rel * y.abs().max(1.0)
        })
}

#[test]
fn test_two_body_scenario_on_gpu() {
    let (device, queue) = require_gpu!();
    let config = SimulationConfig {
        particle_count: 2,
        timestep: 1.0,
        ..Default::default()
    };
    let mut sim = session(
        &device,
        &queue,
        &[[0.0, 0.0, 0.0, 1.0], [1.0, 0.0, 0.0, 1.0]],
        &config,
    );

    sim.acquire().unwrap();
    sim.dispatch(Kernel::UpdateVelocity, 1.0).unwrap();
    sim.release().unwrap();

    let velocities = sim.read_velocities().unwrap();
    assert_eq!(velocities[0], [0.0; 4]);
    assert!((velocities[1][0] + 0.997).abs() < 1e-3);

    sim.acquire().unwrap();
    sim.dispatch(Kernel::UpdatePosition, 1.0).unwrap();
    sim.release().unwrap();

    let positions = sim.read_positions().unwrap();
    assert_eq!(positions[0], [0.0, 0.0, 0.0, 1.0]);
    assert!((positions[1][0] - 0.003).abs() < 1e-3);
    assert_eq!(positions[1][3], 1.0);
}

#[test]
fn test_gpu_matches_cpu_reference() {
    let (device, queue) = require_gpu!();

    for model in [ForceModel::LowerIndex, ForceModel::Symmetric] {
        let config = SimulationConfig {
            particle_count: 300,
            timestep: 0.0001,
            seed: SeedPolicy::Fixed(17),
            force_model: model,
            ..Default::default()
        };
        let mut reference =
            ParticleBuffers::initialize(config.particle_count as usize, config.seed);
        let mut sim = session(&device, &queue, reference.positions(), &config);

        for _ in 0..3 {
            assert_eq!(sim.run_frame(config.timestep).unwrap(), FrameOutcome::Simulated);
            forces::step(&mut reference, config.timestep, model);
        }

        assert!(close(&sim.read_velocities().unwrap(), reference.velocities(), 1e-3));
        assert!(close(&sim.read_positions().unwrap(), reference.positions(), 1e-3));
    }
}

#[test]
fn test_priming_frame_on_gpu_draws_initial_positions() {
    let (device, queue) = require_gpu!();
    let config = SimulationConfig {
        particle_count: 1000,
        ..Default::default()
    };
    let initial = ParticleBuffers::initialize(config.particle_count as usize, config.seed);
    let mut sim = session(&device, &queue, initial.positions(), &config);
    let mut driver = FrameDriver::new(config.timestep);

    let (outcome, drawn) = driver
        .frame(&mut sim, |s| s.read_positions())
        .unwrap();

    assert_eq!(outcome, FrameOutcome::Primed);
    assert_eq!(drawn.unwrap().as_slice(), initial.positions());
    assert_eq!(sim.handoffs(), 0);

    let (outcome, _) = driver.frame(&mut sim, |_| ()).unwrap();
    assert_eq!(outcome, FrameOutcome::Simulated);
    assert_eq!(sim.owner(), BufferOwner::Graphics);
}

#[test]
fn test_zero_timestep_on_gpu() {
    let (device, queue) = require_gpu!();
    let config = SimulationConfig {
        particle_count: 512,
        ..Default::default()
    };
    let initial = ParticleBuffers::initialize(config.particle_count as usize, config.seed);
    let mut sim = session(&device, &queue, initial.positions(), &config);

    for _ in 0..3 {
        sim.run_frame(0.0).unwrap();
    }

    assert_eq!(sim.read_positions().unwrap().as_slice(), initial.positions());
    assert!(sim.read_velocities().unwrap().iter().all(|v| *v == [0.0; 4]));
}

#[test]
fn test_draw_access_denied_while_acquired() {
    let (device, queue) = require_gpu!();
    let config = SimulationConfig {
        particle_count: 4,
        ..Default::default()
    };
    let initial = ParticleBuffers::initialize(4, config.seed);
    let mut sim = session(&device, &queue, initial.positions(), &config);

    sim.acquire().unwrap();
    assert!(sim.position_buffer().is_err());
    assert!(sim.read_positions().is_err());
    assert!(sim.acquire().is_err());
    sim.release().unwrap();
    assert!(sim.position_buffer().is_ok());
    assert!(sim.release().is_err());
}

#[test]
fn test_import_rejects_mismatched_buffer() {
    let (device, queue) = require_gpu!();
    let config = SimulationConfig {
        particle_count: 16,
        ..Default::default()
    };

    let short = PointRenderer::create_vertex_store(&device, &[[0.0, 0.0, 0.0, 1.0]; 8]);
    let result = pollster::block_on(GpuSimulation::new(
        device.clone(),
        queue.clone(),
        short,
        &config,
    ));
    assert!(matches!(result, Err(SimulationError::SharedBufferImport(_))));

    let not_drawable = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Storage Only"),
        size: 16 * 16,
        usage: wgpu::BufferUsages::STORAGE,
        mapped_at_creation: false,
    });
    let result = pollster::block_on(GpuSimulation::new(device, queue, not_drawable, &config));
    assert!(matches!(result, Err(SimulationError::SharedBufferImport(_))));
}
