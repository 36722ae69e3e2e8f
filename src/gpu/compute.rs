//! Compute pipelines for GPU ray compaction.
//!
//! Creates the four kernels (evaluate, scan, carry, scatter), owns the scratch
//! buffers for both mask classes, and records the passes into a command encoder.
//!
//! ## Usage
//! ```ignore
//! let (device, queue) = raycompact::gpu::request_device()?;
//! let mut gc = GpuCompaction::new(&device, CompactionConfig::default())?;
//! gc.prepare_buffers(&device, max_rays)?;
//! let result = gc.compact(&device, &queue, &rays_in, &rays_out, count)?;
//! ```

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::device::read_buffer;
use crate::compaction::{CompactionConfig, Compacted};
use crate::ray::PathRay;
use crate::util::{group_sum_levels, padded_len, Error, Result};

/// WGSL sources embedded at compile time.
const COMMON_WGSL: &str = include_str!("shaders/common.wgsl");
const EVALUATE_WGSL: &str = include_str!("shaders/evaluate.wgsl");
const SCAN_WGSL: &str = include_str!("shaders/scan.wgsl");
const CARRY_WGSL: &str = include_str!("shaders/carry.wgsl");
const SCATTER_WGSL: &str = include_str!("shaders/scatter.wgsl");

/// Per-dimension workgroup count limit; larger grids fold into 2-D.
const MAX_GROUPS_PER_DIM: u32 = 65_535;

const RAY_SIZE: u64 = std::mem::size_of::<PathRay>() as u64;

/// Uniform matching the WGSL `PassParams` struct.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PassParams {
    count: u32,
    len: u32,
    groups: u32,
    _pad: u32,
}

impl PassParams {
    fn new(count: u32, len: u32, groups: u32) -> Self {
        Self { count, len, groups, _pad: 0 }
    }
}

/// One compute pipeline plus its bind group layout.
struct Kernel {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

impl Kernel {
    fn new(
        device: &wgpu::Device,
        label: &str,
        source: &str,
        config: &CompactionConfig,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(shader_source(source, config).into()),
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        Self { pipeline, layout }
    }

    fn bind(&self, device: &wgpu::Device, label: &str, resources: &[wgpu::BindingResource<'_>]) -> wgpu::BindGroup {
        let entries: Vec<wgpu::BindGroupEntry> = resources
            .iter()
            .enumerate()
            .map(|(i, resource)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: resource.clone(),
            })
            .collect();
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.layout,
            entries: &entries,
        })
    }
}

/// Kernel source with the shared prelude and the group size baked in.
fn shader_source(kernel: &str, config: &CompactionConfig) -> String {
    format!("{COMMON_WGSL}\n{kernel}")
        .replace("__GROUP_SIZE__", &config.group_size.to_string())
        .replace("__TILE_SIZE__", &config.tile_size().to_string())
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

/// Bind only the first `ray_count` rays, so oversized caller buffers stay within binding limits.
fn ray_binding(buffer: &wgpu::Buffer, ray_count: usize) -> wgpu::BindingResource<'_> {
    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
        buffer,
        offset: 0,
        size: wgpu::BufferSize::new(ray_count as u64 * RAY_SIZE),
    })
}

/// Fold a 1-D group count into a grid within the per-dimension limit.
fn grid(groups: u32) -> (u32, u32) {
    if groups <= MAX_GROUPS_PER_DIM {
        (groups, 1)
    } else {
        (MAX_GROUPS_PER_DIM, groups.div_ceil(MAX_GROUPS_PER_DIM))
    }
}

/// Scan levels for one mask class.
///
/// `levels[0]` is the mask, scanned in place into offsets; `levels[k + 1]`
/// holds the tile sums of `levels[k]`; the last buffer holds the grand total.
struct ScanChain {
    levels: Vec<wgpu::Buffer>,
    lens: Vec<u32>,
    scan_groups: Vec<(wgpu::BindGroup, u32)>,
    carry_groups: Vec<Option<(wgpu::BindGroup, u32)>>,
    // Kept alive for the bind groups above
    _params: Vec<wgpu::Buffer>,
}

impl ScanChain {
    fn new(device: &wgpu::Device, label: &str, len: usize, tile: usize, scan: &Kernel, carry: &Kernel) -> Self {
        let mut lens = vec![len as u32];
        lens.extend(group_sum_levels(len, tile).into_iter().map(|n| n as u32));
        lens.push(1);

        let levels: Vec<wgpu::Buffer> = lens
            .iter()
            .enumerate()
            .map(|(k, &n)| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("{label}_level{k}")),
                    size: u64::from(n) * 4,
                    usage: wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::COPY_SRC
                        | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();

        let tile32 = tile as u32;
        let mut params = Vec::new();
        let mut scan_groups = Vec::new();
        let mut carry_groups = Vec::new();
        for k in 0..lens.len() - 1 {
            let n = lens[k];

            let groups = n.div_ceil(tile32);
            let scan_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label}_scan_params{k}")),
                contents: bytemuck::bytes_of(&PassParams::new(n, n, groups)),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let bg = scan.bind(device, "rc_scan_bg", &[
                levels[k].as_entire_binding(),
                levels[k + 1].as_entire_binding(),
                scan_params.as_entire_binding(),
            ]);
            scan_groups.push((bg, groups));
            params.push(scan_params);

            // Single-tile levels are already global after the local scan
            if n <= tile32 {
                carry_groups.push(None);
                continue;
            }
            let groups = n / tile32 - 1;
            let carry_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label}_carry_params{k}")),
                contents: bytemuck::bytes_of(&PassParams::new(n, n, groups)),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let bg = carry.bind(device, "rc_carry_bg", &[
                levels[k].as_entire_binding(),
                levels[k + 1].as_entire_binding(),
                carry_params.as_entire_binding(),
            ]);
            carry_groups.push(Some((bg, groups)));
            params.push(carry_params);
        }

        Self {
            levels,
            lens,
            scan_groups,
            carry_groups,
            _params: params,
        }
    }

    fn offsets(&self) -> &wgpu::Buffer {
        &self.levels[0]
    }

    fn total(&self) -> &wgpu::Buffer {
        &self.levels[self.levels.len() - 1]
    }

    /// Scan every level top-down, then apply carries bottom-up.
    fn encode(&self, encoder: &mut wgpu::CommandEncoder, scan: &Kernel, carry: &Kernel) {
        for (bg, groups) in &self.scan_groups {
            dispatch(encoder, "rc_scan_pass", scan, bg, *groups);
        }
        for (bg, groups) in self.carry_groups.iter().rev().flatten() {
            dispatch(encoder, "rc_carry_pass", carry, bg, *groups);
        }
    }
}

fn dispatch(encoder: &mut wgpu::CommandEncoder, label: &str, kernel: &Kernel, bg: &wgpu::BindGroup, groups: u32) {
    if groups == 0 {
        return;
    }
    let (x, y) = grid(groups);
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(&kernel.pipeline);
    pass.set_bind_group(0, bg, &[]);
    pass.dispatch_workgroups(x, y, 1);
}

/// Scratch sized by `prepare_buffers`.
struct GpuScratch {
    capacity: usize,
    padded_len: usize,
    active: ScanChain,
    terminated: ScanChain,
    evaluate_params: wgpu::Buffer,
    scatter_params: wgpu::Buffer,
}

/// GPU compaction pipeline state.
pub struct GpuCompaction {
    config: CompactionConfig,
    evaluate: Kernel,
    scan: Kernel,
    carry: Kernel,
    scatter: Kernel,
    scratch: Option<GpuScratch>,
    /// Largest storage buffer the device can bind, in bytes.
    max_binding: u64,
}

impl GpuCompaction {
    /// Build the four pipelines for `config`.
    ///
    /// Fails if the group size is invalid or exceeds the device's workgroup limits.
    pub fn new(device: &wgpu::Device, config: CompactionConfig) -> Result<Self> {
        config.validate()?;

        let limits = device.limits();
        let limit = limits
            .max_compute_invocations_per_workgroup
            .min(limits.max_compute_workgroup_size_x);
        if config.group_size > limit {
            return Err(Error::GroupSizeUnsupported { group_size: config.group_size, limit });
        }
        let shared_bytes = config.tile_size() as u32 * 4;
        if shared_bytes > limits.max_compute_workgroup_storage_size {
            return Err(Error::GroupSizeUnsupported {
                group_size: config.group_size,
                limit: limits.max_compute_workgroup_storage_size / 8,
            });
        }

        // Shader and pipeline errors come back as `Err` instead of reaching the uncaptured handler
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let evaluate = Kernel::new(
            device,
            "rc_evaluate",
            EVALUATE_WGSL,
            &config,
            &[storage_entry(0, true), storage_entry(1, false), storage_entry(2, false), uniform_entry(3)],
        );
        let scan = Kernel::new(
            device,
            "rc_scan",
            SCAN_WGSL,
            &config,
            &[storage_entry(0, false), storage_entry(1, false), uniform_entry(2)],
        );
        let carry = Kernel::new(
            device,
            "rc_carry",
            CARRY_WGSL,
            &config,
            &[storage_entry(0, false), storage_entry(1, true), uniform_entry(2)],
        );
        let scatter = Kernel::new(
            device,
            "rc_scatter",
            SCATTER_WGSL,
            &config,
            &[
                storage_entry(0, true),
                storage_entry(1, false),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, true),
                uniform_entry(5),
            ],
        );

        if let Some(e) = pollster::block_on(device.pop_error_scope()) {
            return Err(Error::gpu(format!("pipeline creation failed: {e}")));
        }

        Ok(Self {
            config,
            evaluate,
            scan,
            carry,
            scatter,
            scratch: None,
            max_binding: limits
                .max_buffer_size
                .min(u64::from(limits.max_storage_buffer_binding_size)),
        })
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Largest ray count `encode`/`compact` accept.
    pub fn capacity(&self) -> usize {
        self.scratch.as_ref().map_or(0, |s| s.capacity)
    }

    /// Size scratch buffers for up to `max_ray_count` rays.
    ///
    /// Reallocates only when the padded length changes.
    #[tracing::instrument(skip(self, device), fields(group_size = self.config.group_size))]
    pub fn prepare_buffers(&mut self, device: &wgpu::Device, max_ray_count: usize) -> Result<()> {
        let tile = self.config.tile_size();
        let len = padded_len(max_ray_count, tile).ok_or(Error::CapacityTooLarge(max_ray_count))?;
        let bytes = len as u64 * 4;
        if bytes > self.max_binding {
            return Err(Error::BufferTooLarge { size: bytes, limit: self.max_binding });
        }

        if let Some(scratch) = self.scratch.as_mut() {
            if scratch.padded_len == len {
                scratch.capacity = max_ray_count;
                return Ok(());
            }
        }

        tracing::debug!(padded_len = len, "allocating GPU compaction scratch");
        let params_buffer = |label: &str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: std::mem::size_of::<PassParams>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };

        self.scratch = Some(GpuScratch {
            capacity: max_ray_count,
            padded_len: len,
            active: ScanChain::new(device, "rc_active", len, tile, &self.scan, &self.carry),
            terminated: ScanChain::new(device, "rc_terminated", len, tile, &self.scan, &self.carry),
            evaluate_params: params_buffer("rc_evaluate_params"),
            scatter_params: params_buffer("rc_scatter_params"),
        });
        Ok(())
    }

    /// Record the full compaction of `input[..ray_count]` into `output`.
    ///
    /// Pass parameters are written through `queue`, so submit this encoder
    /// before encoding another compaction with the same context.
    pub fn encode(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        input: &wgpu::Buffer,
        output: &wgpu::Buffer,
        ray_count: usize,
    ) -> Result<()> {
        let scratch = self.checked_scratch(input, output, ray_count)?;
        if ray_count == 0 {
            return Ok(());
        }

        let group = self.config.group_size;
        let count = ray_count as u32;
        let len = scratch.padded_len as u32;

        let evaluate_groups = len / group;
        queue.write_buffer(
            &scratch.evaluate_params,
            0,
            bytemuck::bytes_of(&PassParams::new(count, len, evaluate_groups)),
        );
        let scatter_groups = count.div_ceil(group);
        queue.write_buffer(
            &scratch.scatter_params,
            0,
            bytemuck::bytes_of(&PassParams::new(count, len, scatter_groups)),
        );

        let evaluate_bg = self.evaluate.bind(
            device,
            "rc_evaluate_bg",
            &[
                ray_binding(input, ray_count),
                scratch.active.offsets().as_entire_binding(),
                scratch.terminated.offsets().as_entire_binding(),
                scratch.evaluate_params.as_entire_binding(),
            ],
        );
        dispatch(encoder, "rc_evaluate_pass", &self.evaluate, &evaluate_bg, evaluate_groups);

        scratch.active.encode(encoder, &self.scan, &self.carry);
        scratch.terminated.encode(encoder, &self.scan, &self.carry);

        let scatter_bg = self.scatter.bind(
            device,
            "rc_scatter_bg",
            &[
                ray_binding(input, ray_count),
                ray_binding(output, ray_count),
                scratch.active.offsets().as_entire_binding(),
                scratch.terminated.offsets().as_entire_binding(),
                scratch.active.total().as_entire_binding(),
                scratch.scatter_params.as_entire_binding(),
            ],
        );
        dispatch(encoder, "rc_scatter_pass", &self.scatter, &scatter_bg, scatter_groups);
        Ok(())
    }

    /// Encode, submit and wait for one compaction; reads back the active count.
    #[tracing::instrument(skip(self, device, queue, input, output))]
    pub fn compact(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        input: &wgpu::Buffer,
        output: &wgpu::Buffer,
        ray_count: usize,
    ) -> Result<Compacted> {
        let scratch = self.checked_scratch(input, output, ray_count)?;
        if ray_count == 0 {
            return Ok(Compacted::default());
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("rc_compact_encoder"),
        });
        self.encode(device, queue, &mut encoder, input, output, ray_count)?;
        queue.submit(Some(encoder.finish()));

        let active_count = read_buffer::<u32>(device, queue, scratch.active.total(), 1)?
            .first()
            .copied()
            .ok_or_else(|| Error::gpu("empty active total readback"))? as usize;

        let result = Compacted {
            active_count,
            terminated_count: ray_count - active_count.min(ray_count),
        };
        tracing::debug!(active = result.active_count, terminated = result.terminated_count, "compacted on GPU");
        Ok(result)
    }

    /// Scanned offset buffers `(active, terminated)` from the last compaction, for inspection.
    pub fn offset_buffers(&self) -> Option<(&wgpu::Buffer, &wgpu::Buffer)> {
        self.scratch
            .as_ref()
            .map(|s| (s.active.offsets(), s.terminated.offsets()))
    }

    /// Number of scan levels per mask, including the grand-total slot.
    pub fn scan_depth(&self) -> usize {
        self.scratch.as_ref().map_or(0, |s| s.active.lens.len())
    }

    fn checked_scratch(&self, input: &wgpu::Buffer, output: &wgpu::Buffer, ray_count: usize) -> Result<&GpuScratch> {
        let scratch = self.scratch.as_ref().ok_or(Error::CapacityExceeded {
            count: ray_count,
            capacity: 0,
        })?;
        if ray_count > scratch.capacity {
            return Err(Error::CapacityExceeded { count: ray_count, capacity: scratch.capacity });
        }
        let required = ray_count as u64 * RAY_SIZE;
        if required > self.max_binding {
            return Err(Error::BufferTooLarge { size: required, limit: self.max_binding });
        }
        if input == output {
            return Err(Error::gpu("input and output ray buffers must not alias"));
        }
        if input.size() < required {
            return Err(Error::InputTooShort {
                len: (input.size() / RAY_SIZE) as usize,
                count: ray_count,
            });
        }
        if output.size() < required {
            return Err(Error::OutputTooSmall {
                len: (output.size() / RAY_SIZE) as usize,
                required: ray_count,
            });
        }
        Ok(scratch)
    }
}
