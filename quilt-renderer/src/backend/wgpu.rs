//! WebGPU/wgpu compute backend.
//!
//! Each call uploads the quilt into storage buffers, records every dispatch
//! into one command encoder (one compute pass per step) and reads the
//! result back after waiting on the device.

use std::collections::HashMap;
use std::sync::mpsc;

use wgpu::util::DeviceExt;

use quilt_core::InterpolationPlan;

use crate::buffer::{FrameImage, QuiltBuffer};
use crate::composite::LightfieldParams;
use crate::error::{RenderError, RenderResult};
use crate::interpolate::{DispatchPlan, Kernel};

use super::{BackendType, ComputeBackend, WORKGROUP_SIZE};

const INTERPOLATION_SHADER: &str = include_str!("../shaders/interpolation.wgsl");
const LIGHTFIELD_SHADER: &str = include_str!("../shaders/lightfield.wgsl");

/// wgpu-based compute backend.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    interpolation_layout: wgpu::BindGroupLayout,
    kernels: HashMap<Kernel, wgpu::ComputePipeline>,
    lightfield_layout: wgpu::BindGroupLayout,
    lightfield_pipeline: wgpu::ComputePipeline,
}

impl WgpuBackend {
    /// Create a new wgpu backend and compile every kernel.
    ///
    /// # Errors
    ///
    /// Returns an error if no adapter is found or a shader fails to build.
    pub fn new() -> RenderResult<Self> {
        pollster::block_on(Self::initialize_gpu())
    }

    async fn initialize_gpu() -> RenderResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| RenderError::GpuInit("No suitable GPU adapter found".to_string()))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Quilt Compute Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|e| RenderError::GpuInit(e.to_string()))?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let interpolation_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("quilt-interpolation-layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, false),
                storage_entry(2, false),
                storage_entry(3, true),
                storage_entry(4, true),
                storage_entry(5, true),
                storage_entry(6, true),
            ],
        });
        let interpolation_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("quilt-interpolation"),
            source: wgpu::ShaderSource::Wgsl(INTERPOLATION_SHADER.into()),
        });
        let kernels = Kernel::ALL
            .iter()
            .map(|&kernel| {
                let pipeline = compute_pipeline(
                    &device,
                    &interpolation_layout,
                    &interpolation_module,
                    kernel.entry_point(),
                );
                (kernel, pipeline)
            })
            .collect();

        let lightfield_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("quilt-lightfield-layout"),
            entries: &[uniform_entry(0), storage_entry(1, true), storage_entry(2, false)],
        });
        let lightfield_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("quilt-lightfield"),
            source: wgpu::ShaderSource::Wgsl(LIGHTFIELD_SHADER.into()),
        });
        let lightfield_pipeline =
            compute_pipeline(&device, &lightfield_layout, &lightfield_module, "lightfield");

        if let Some(err) = device.pop_error_scope().await {
            return Err(RenderError::Shader(err.to_string()));
        }

        let adapter_name = adapter.get_info().name;
        tracing::info!("wgpu compute backend initialized with adapter: {}", adapter_name);

        Ok(Self {
            device,
            queue,
            adapter_name,
            interpolation_layout,
            kernels,
            lightfield_layout,
            lightfield_pipeline,
        })
    }

    /// Name of the adapter in use.
    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn check_size(&self, what: &str, bytes: u64) -> RenderResult<()> {
        let limits = self.device.limits();
        let max = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
        if bytes > max {
            return Err(RenderError::Resource(format!(
                "{what} needs {bytes} bytes, device allows {max}"
            )));
        }
        Ok(())
    }

    fn storage_buffer(&self, label: &str, contents: &[u8], copy_dst: bool) -> wgpu::Buffer {
        let mut usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;
        if copy_dst {
            usage |= wgpu::BufferUsages::COPY_DST;
        }
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage,
        })
    }

    fn staging_buffer(&self, label: &str, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn read_back(&self, staging: &wgpu::Buffer) -> RenderResult<Vec<u8>> {
        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            if sender.send(res).is_err() {
                tracing::warn!("Read-back receiver dropped before the buffer was mapped");
            }
        });
        if !self.device.poll(wgpu::Maintain::Wait).is_queue_empty() {
            tracing::warn!("GPU queue still has pending submissions after read-back wait");
        }
        receiver
            .recv()
            .map_err(|e| RenderError::Resource(format!("read-back channel closed: {e}")))?
            .map_err(|e| RenderError::Resource(format!("failed to map read-back buffer: {e}")))?;
        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn compute_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    module: &wgpu::ShaderModule,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(entry_point),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(entry_point),
        layout: Some(&pipeline_layout),
        module,
        entry_point: Some(entry_point),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    })
}

impl ComputeBackend for WgpuBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Gpu
    }

    fn name(&self) -> &str {
        "wgpu"
    }

    fn workgroup_size(&self) -> [u32; 3] {
        WORKGROUP_SIZE
    }

    fn interpolate(
        &mut self,
        buffer: &mut QuiltBuffer,
        plan: &InterpolationPlan,
        dispatch: &DispatchPlan,
    ) -> RenderResult<()> {
        let color_bytes = buffer.color().len() as u64;
        let depth_bytes = std::mem::size_of_val(buffer.depth()) as u64;
        self.check_size("quilt color", color_bytes)?;
        self.check_size("quilt depth", depth_bytes)?;

        let color = self.storage_buffer("quilt-color", buffer.color(), true);
        let depth = self.storage_buffer("quilt-depth", bytemuck::cast_slice(buffer.depth()), true);
        let snapshot = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("quilt-depth-snapshot"),
            size: depth_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let positions = self.storage_buffer("view-positions", bytemuck::cast_slice(&plan.view_positions()), false);
        let offsets = self.storage_buffer("view-offsets", bytemuck::cast_slice(&plan.view_offsets()), false);
        let bases = self.storage_buffer("base-positions", bytemuck::cast_slice(&plan.base_positions()), false);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("quilt-interpolation"),
            });

        for step in &dispatch.steps {
            let pipeline = self.kernels.get(&step.kernel).ok_or_else(|| {
                RenderError::Shader(format!("kernel {} not compiled", step.kernel.entry_point()))
            })?;
            let uniforms = dispatch.uniforms.with_phase(step.phase);
            let uniform_buf = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("interpolation-uniforms"),
                contents: bytemuck::bytes_of(&uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let bind = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("interpolation-bind"),
                layout: &self.interpolation_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniform_buf.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: color.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: depth.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: positions.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: offsets.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: bases.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 6,
                        resource: snapshot.as_entire_binding(),
                    },
                ],
            });

            if step.kernel == Kernel::FillGaps {
                encoder.copy_buffer_to_buffer(&depth, 0, &snapshot, 0, depth_bytes);
            }
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(step.kernel.entry_point()),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind, &[]);
                let [x, y, z] = step.groups;
                pass.dispatch_workgroups(x, y, z);
            }
            tracing::trace!(
                "wgpu dispatch {} phase {} groups {:?}",
                step.kernel.entry_point(),
                step.phase,
                step.groups
            );
        }

        let color_staging = self.staging_buffer("quilt-color-readback", color_bytes);
        let depth_staging = self.staging_buffer("quilt-depth-readback", depth_bytes);
        encoder.copy_buffer_to_buffer(&color, 0, &color_staging, 0, color_bytes);
        encoder.copy_buffer_to_buffer(&depth, 0, &depth_staging, 0, depth_bytes);
        self.queue.submit(Some(encoder.finish()));

        let color_data = self.read_back(&color_staging)?;
        let depth_data = self.read_back(&depth_staging)?;
        let (color_out, depth_out) = buffer.planes_mut();
        color_out.copy_from_slice(&color_data);
        let depth_values: &[f32] = bytemuck::try_cast_slice(&depth_data)
            .map_err(|e| RenderError::Resource(format!("depth read-back: {e}")))?;
        depth_out.copy_from_slice(depth_values);
        Ok(())
    }

    fn lightfield(&mut self, buffer: &QuiltBuffer, params: &LightfieldParams) -> RenderResult<FrameImage> {
        let (w, h) = (params.screen_width, params.screen_height);
        let screen_bytes = u64::from(w) * u64::from(h) * 4;
        if screen_bytes == 0 {
            return Ok(FrameImage::new(w, h));
        }
        self.check_size("quilt color", buffer.color().len() as u64)?;
        self.check_size("lightfield output", screen_bytes)?;

        let uniforms = params.uniforms(buffer.width(), buffer.height());
        let uniform_buf = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("lightfield-uniforms"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let quilt = self.storage_buffer("lightfield-quilt", buffer.color(), false);
        let screen = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lightfield-screen"),
            size: screen_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let bind = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("lightfield-bind"),
            layout: &self.lightfield_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: quilt.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: screen.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("quilt-lightfield"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("lightfield"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.lightfield_pipeline);
            pass.set_bind_group(0, &bind, &[]);
            let [gx, gy, _] = WORKGROUP_SIZE;
            pass.dispatch_workgroups(w.div_ceil(gx), h.div_ceil(gy), 1);
        }
        let staging = self.staging_buffer("lightfield-readback", screen_bytes);
        encoder.copy_buffer_to_buffer(&screen, 0, &staging, 0, screen_bytes);
        self.queue.submit(Some(encoder.finish()));

        let pixels = self.read_back(&staging)?;
        FrameImage::from_raw(w, h, pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu::CpuBackend;
    use crate::composite::render_lightfield;
    use crate::interpolate::{InterpolationSettings, InterpolationUniforms, KernelTable};
    use quilt_core::depth::device_depth;
    use quilt_core::{Calibration, QuiltLayout};

    // Skips quietly on machines without an adapter.
    fn gpu() -> Option<WgpuBackend> {
        WgpuBackend::new().ok()
    }

    #[test]
    fn test_gpu_matches_cpu_for_isolated_samples() {
        let Some(mut gpu) = gpu() else { return };
        let layout = QuiltLayout::new(48, 8, 3, 1, 3);
        let mut buffer = QuiltBuffer::new(&layout);
        buffer.begin_frame([0.0; 4], true);
        {
            let (color, depth) = buffer.planes_mut();
            for (x, z) in [(2_usize, 20.0), (9, 12.0)] {
                color[x * 4..x * 4 + 4].copy_from_slice(&[200, 10, 10, 255]);
                depth[x] = device_depth(z, 1.0, 100.0);
            }
        }
        let mut plan = InterpolationPlan::build(&layout, 2, 35.0, 1.0);
        plan.skipped[0].cone_offset = 0.5;
        let settings = InterpolationSettings::default();
        let uniforms = InterpolationUniforms {
            near: 1.0,
            far: 100.0,
            focal_distance: 10.0,
            persp_w: 1.0,
            ..InterpolationUniforms::new(
                &layout,
                &quilt_core::CameraRig::default().center_state(1.0),
                &settings,
                2,
                1,
            )
        };
        let dispatch = DispatchPlan::build(uniforms, KernelTable::resolve(&settings), true, WORKGROUP_SIZE);

        let mut expected = buffer.clone();
        CpuBackend::new()
            .interpolate(&mut expected, &plan, &dispatch)
            .expect("cpu interpolate");
        gpu.interpolate(&mut buffer, &plan, &dispatch)
            .expect("gpu interpolate");
        assert_eq!(buffer.color(), expected.color());
        assert_eq!(buffer.depth(), expected.depth());
    }

    #[test]
    fn test_gpu_lightfield_matches_cpu() {
        let Some(mut gpu) = gpu() else { return };
        let layout = QuiltLayout::new(64, 32, 4, 2, 8);
        let mut buffer = QuiltBuffer::new(&layout);
        for (i, px) in buffer.color_mut().chunks_exact_mut(4).enumerate() {
            px.copy_from_slice(&[(i % 251) as u8, (i % 13) as u8 * 10, (i % 7) as u8 * 30, 255]);
        }
        let cal = Calibration::with_screen(0, 48, 64);
        let params = LightfieldParams::new(&cal, &layout, 0.0);
        let image = gpu.lightfield(&buffer, &params).expect("gpu lightfield");
        assert_eq!(image, render_lightfield(&buffer, &params));
    }
}
