//! GPU compute session
//!
//! Owns the compute pipelines and the velocity buffer, and imports the vertex
//! store allocated by the renderer as the position buffer. Both kernels live in
//! one WGSL module; each dispatch is submitted on its own and waited on before
//! the next one starts.

use crate::error::SimulationError;
use crate::ownership::{BufferOwner, BufferOwnership};
use crate::params::{SimParams, SimulationConfig};
use crate::session::{Completion, Kernel, Simulation};
use nbody_physics::{Float4, ForceModel, FLOAT4_SIZE};
use std::sync::mpsc;
use std::time::Duration;
use wgpu::util::DeviceExt;

/// Threads per workgroup, must match `@workgroup_size` in nbody.wgsl
pub const WORKGROUP_SIZE: u32 = 256;

/// Usages the vertex store must carry to be shared with compute
pub const SHARED_POSITION_USAGES: wgpu::BufferUsages =
    wgpu::BufferUsages::VERTEX.union(wgpu::BufferUsages::STORAGE);

/// GPU-based N-body simulation
pub struct GpuSimulation {
    device: wgpu::Device,
    queue: wgpu::Queue,

    // Buffers
    position_buffer: wgpu::Buffer,
    velocity_buffer: wgpu::Buffer,
    params_buffer: wgpu::Buffer,

    // Compute pipelines
    velocity_pipeline: wgpu::ComputePipeline,
    position_pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,

    ownership: BufferOwnership,
    params: SimParams,
    device_timeout: Option<Duration>,
}

impl GpuSimulation {
    /// Import `position_buffer` and build the compute program.
    ///
    /// The buffer must hold exactly `config.particle_count` vec4 positions and
    /// carry [`SHARED_POSITION_USAGES`]. Velocities start at zero.
    pub async fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        position_buffer: wgpu::Buffer,
        config: &SimulationConfig,
    ) -> Result<Self, SimulationError> {
        Self::with_shader_source(
            device,
            queue,
            position_buffer,
            config,
            include_str!("shaders/nbody.wgsl"),
        )
        .await
    }

    /// Same as [`GpuSimulation::new`] with the kernels compiled from `source`
    pub(crate) async fn with_shader_source(
        device: wgpu::Device,
        queue: wgpu::Queue,
        position_buffer: wgpu::Buffer,
        config: &SimulationConfig,
        source: &str,
    ) -> Result<Self, SimulationError> {
        log::info!("Initializing GpuSimulation...");
        let particle_count = config.particle_count;

        validate_import(&device, &position_buffer, particle_count)?;

        // Create velocity buffer (zero-initialized)
        let velocities = vec![[0.0f32; 4]; particle_count as usize];
        let velocity_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Velocity Buffer"),
            contents: bytemuck::cast_slice(&velocities),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });

        let params = SimParams::new(config.timestep, particle_count, config.force_model);
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Simulation Params Buffer"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        log::info!("Buffers created");

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("N-Body Compute Shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("N-Body Bind Group Layout"),
            entries: &[
                // Positions (shared with the renderer) - Binding 0
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Velocities - Binding 1
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Params (Uniform) - Binding 2
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("N-Body Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        log::debug!("Creating velocity pipeline...");
        let velocity_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Velocity Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some(Kernel::UpdateVelocity.entry_point()),
            compilation_options: Default::default(),
            cache: None,
        });

        log::debug!("Creating position pipeline...");
        let position_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Position Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some(Kernel::UpdatePosition.entry_point()),
            compilation_options: Default::default(),
            cache: None,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("N-Body Bind Group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: position_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: velocity_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        if let Some(error) = device.pop_error_scope().await {
            return Err(SimulationError::ProgramBuild(error.to_string()));
        }

        log::info!("Pipelines created");

        Ok(Self {
            device,
            queue,
            position_buffer,
            velocity_buffer,
            params_buffer,
            velocity_pipeline,
            position_pipeline,
            bind_group,
            ownership: BufferOwnership::new(),
            params,
            device_timeout: config.device_timeout(),
        })
    }

    /// The shared position buffer as a vertex source. Only legal while graphics owns it.
    pub fn position_buffer(&self) -> Result<&wgpu::Buffer, SimulationError> {
        self.ownership.require(BufferOwner::Graphics)?;
        Ok(&self.position_buffer)
    }

    pub fn force_model(&self) -> ForceModel {
        if self.params.force_model == ForceModel::Symmetric as u32 {
            ForceModel::Symmetric
        } else {
            ForceModel::LowerIndex
        }
    }

    pub fn handoffs(&self) -> u64 {
        self.ownership.handoffs()
    }

    /// Copy the positions back to the host (diagnostics and tests)
    pub fn read_positions(&self) -> Result<Vec<Float4>, SimulationError> {
        self.ownership.require(BufferOwner::Graphics)?;
        self.read_back(&self.position_buffer)
    }

    /// Copy the velocities back to the host (diagnostics and tests)
    pub fn read_velocities(&self) -> Result<Vec<Float4>, SimulationError> {
        self.ownership.require(BufferOwner::Graphics)?;
        self.read_back(&self.velocity_buffer)
    }

    fn workgroup_count(&self) -> u32 {
        self.params.particle_count.div_ceil(WORKGROUP_SIZE)
    }

    fn write_params(&mut self, dt: f32) {
        if self.params.dt != dt {
            self.params.dt = dt;
            self.queue
                .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&self.params));
        }
    }

    fn read_back(&self, source: &wgpu::Buffer) -> Result<Vec<Float4>, SimulationError> {
        let size = source.size();
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let (sender, receiver) = mpsc::channel();
        let slice = staging.slice(..);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| SimulationError::Readback(e.to_string()))?;

        receiver
            .recv()
            .map_err(|e| SimulationError::Readback(e.to_string()))?
            .map_err(|e| SimulationError::Readback(e.to_string()))?;

        let values = {
            let data = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, Float4>(&data).to_vec()
        };
        staging.unmap();

        Ok(values)
    }
}

impl Simulation for GpuSimulation {
    fn particle_count(&self) -> u32 {
        self.params.particle_count
    }

    fn owner(&self) -> BufferOwner {
        self.ownership.owner()
    }

    fn acquire(&mut self) -> Result<(), SimulationError> {
        self.ownership.require(BufferOwner::Graphics)?;

        // Drain outstanding draws that read the buffer. The queue orders work anyway,
        // so an expired watchdog here only delays the handoff.
        match self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: self.device_timeout,
        }) {
            Ok(_) => {}
            Err(wgpu::PollError::Timeout) => {
                log::warn!("Graphics work still pending at acquire");
            }
            Err(e) => return Err(SimulationError::DeviceWait(e.to_string())),
        }

        self.ownership.acquire()
    }

    fn release(&mut self) -> Result<(), SimulationError> {
        self.ownership.release()
    }

    fn dispatch(&mut self, kernel: Kernel, dt: f32) -> Result<Completion, SimulationError> {
        self.ownership.require(BufferOwner::Compute)?;
        self.write_params(dt);

        let pipeline = match kernel {
            Kernel::UpdateVelocity => &self.velocity_pipeline,
            Kernel::UpdatePosition => &self.position_pipeline,
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Simulation Encoder"),
            });

        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.entry_point()),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(pipeline);
            compute_pass.set_bind_group(0, &self.bind_group, &[]);
            compute_pass.dispatch_workgroups(self.workgroup_count(), 1, 1);
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let submission = self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(SimulationError::DeviceFault {
                kernel,
                reason: error.to_string(),
            });
        }

        match self.device.poll(wgpu::PollType::Wait {
            submission_index: Some(submission),
            timeout: self.device_timeout,
        }) {
            Ok(_) => Ok(Completion::Done),
            Err(wgpu::PollError::Timeout) => Ok(Completion::TimedOut),
            Err(e) => Err(SimulationError::DeviceFault {
                kernel,
                reason: e.to_string(),
            }),
        }
    }
}

fn validate_import(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
    particle_count: u32,
) -> Result<(), SimulationError> {
    if particle_count == 0 {
        return Err(SimulationError::SharedBufferImport(
            "particle count must be positive".into(),
        ));
    }

    let expected = u64::from(particle_count) * FLOAT4_SIZE;
    if buffer.size() != expected {
        return Err(SimulationError::SharedBufferImport(format!(
            "buffer holds {} bytes, {} particles need {}",
            buffer.size(),
            particle_count,
            expected
        )));
    }

    if !buffer.usage().contains(SHARED_POSITION_USAGES) {
        return Err(SimulationError::SharedBufferImport(format!(
            "buffer usage {:?} lacks {:?}",
            buffer.usage(),
            SHARED_POSITION_USAGES
        )));
    }

    let limits = device.limits();
    if expected > u64::from(limits.max_storage_buffer_binding_size) {
        return Err(SimulationError::SharedBufferImport(format!(
            "{} bytes exceed the storage binding limit of {}",
            expected, limits.max_storage_buffer_binding_size
        )));
    }
    if particle_count.div_ceil(WORKGROUP_SIZE) > limits.max_compute_workgroups_per_dimension {
        return Err(SimulationError::SharedBufferImport(format!(
            "{} particles exceed the dispatch limit",
            particle_count
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headless_device() -> Option<(wgpu::Device, wgpu::Queue)> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions::default())
                .await
                .ok()?;
            adapter
                .request_device(&wgpu::DeviceDescriptor::default())
                .await
                .ok()
        })
    }

    fn shared_buffer(device: &wgpu::Device, particle_count: u32) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Test Positions"),
            size: u64::from(particle_count) * FLOAT4_SIZE,
            usage: SHARED_POSITION_USAGES | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        })
    }

    #[test]
    fn test_broken_kernel_source_fails_build() {
        let Some((device, queue)) = headless_device() else {
            eprintln!("No GPU adapter available, skipping");
            return;
        };
        let config = SimulationConfig {
            particle_count: 8,
            ..Default::default()
        };
        let buffer = shared_buffer(&device, config.particle_count);

        let result = pollster::block_on(GpuSimulation::with_shader_source(
            device,
            queue,
            buffer,
            &config,
            "@compute @workgroup_size(256) fn update_velocity( { this is not wgsl",
        ));

        assert!(matches!(result, Err(SimulationError::ProgramBuild(_))));
    }

    #[test]
    fn test_missing_entry_point_fails_build() {
        let Some((device, queue)) = headless_device() else {
            eprintln!("No GPU adapter available, skipping");
            return;
        };
        let config = SimulationConfig {
            particle_count: 8,
            ..Default::default()
        };
        let buffer = shared_buffer(&device, config.particle_count);
        let only_velocity = include_str!("shaders/nbody.wgsl").replace(
            "fn update_position(",
            "fn renamed_position(",
        );

        let result = pollster::block_on(GpuSimulation::with_shader_source(
            device,
            queue,
            buffer,
            &config,
            &only_velocity,
        ));

        assert!(matches!(result, Err(SimulationError::ProgramBuild(_))));
    }
}
