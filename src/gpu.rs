//! GPU bounding-sphere broad phase.
//!
//! Only the O(n^2) sphere pair test runs on the GPU; the branch-heavy
//! GJK/EPA narrow phase stays on the CPU. Bodies are processed in fixed
//! size batches: every batch against itself (`cs_inner`) and every batch
//! against every later batch (`cs_outer`), so the pair buffer stays small
//! no matter how many bodies there are.

use tracing::debug;

use crate::compute::{compute_workgroup_count, read_buffer_sync, ComputeDispatcher, ComputePipelineBuilder, StorageBuffer};
use crate::context::WgpuContext;

/// Workgroup size matching the WGSL shader.
const WORKGROUP_SIZE: u32 = 64;

/// Maximum pairs one dispatch may emit.
const MAX_PAIRS: u32 = 65536;

/// One bounding sphere, laid out as the shader's vec4.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuSphere {
    pub center: [f32; 3],
    pub radius: f32,
}

/// One overlapping pair of global body indices.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct IndexPair {
    pub index_a: u32,
    pub index_b: u32,
}

/// Batch parameters for one dispatch.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct BatchParams {
    count_a: u32,
    count_b: u32,
    offset_a: u32,
    offset_b: u32,
    max_pairs: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

/// Owns the pipelines and buffers for the sphere-test kernels.
pub struct GpuBroadPhase {
    ctx: WgpuContext,
    inner_pipeline: wgpu::ComputePipeline,
    outer_pipeline: wgpu::ComputePipeline,
    sphere_a_buffer: StorageBuffer,
    sphere_b_buffer: StorageBuffer,
    pair_buffer: StorageBuffer,
    pair_count_buffer: StorageBuffer,
    data_layout: wgpu::BindGroupLayout,
    params_layout: wgpu::BindGroupLayout,
    batch_size: usize,
}

impl GpuBroadPhase {
    /// Compiles the kernels and allocates per-batch buffers.
    pub fn new(ctx: WgpuContext, batch_size: usize) -> anyhow::Result<Self> {
        let batch_size = batch_size.max(1);

        let data_layout = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("broad phase data layout"),
                entries: &[
                    // Spheres A (read)
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: true },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    // Spheres B (read)
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: true },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    // Pairs (read_write)
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: false },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    // Pair count (read_write, atomic)
                    wgpu::BindGroupLayoutEntry {
                        binding: 3,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: false },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let params_layout = ctx
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("broad phase params layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let shader = include_str!("shaders/broad_phase.wgsl");
        let inner_pipeline = ComputePipelineBuilder::new(&ctx)
            .label("broad phase inner")
            .shader(shader)
            .entry_point("cs_inner")
            .bind_group_layout(&data_layout)
            .bind_group_layout(&params_layout)
            .build()?;
        let outer_pipeline = ComputePipelineBuilder::new(&ctx)
            .label("broad phase outer")
            .shader(shader)
            .entry_point("cs_outer")
            .bind_group_layout(&data_layout)
            .bind_group_layout(&params_layout)
            .build()?;

        let sphere_size = (batch_size * std::mem::size_of::<GpuSphere>()) as u64;
        let sphere_a_buffer = StorageBuffer::new(&ctx, sphere_size, Some("sphere buffer a"));
        let sphere_b_buffer = StorageBuffer::new(&ctx, sphere_size, Some("sphere buffer b"));

        let pair_size = (MAX_PAIRS as usize * std::mem::size_of::<IndexPair>()) as u64;
        let pair_buffer = StorageBuffer::new(&ctx, pair_size, Some("pair buffer"));
        let pair_count_buffer = StorageBuffer::new(&ctx, 4, Some("pair count buffer"));

        debug!(batch_size, "gpu broad phase ready");
        Ok(Self {
            ctx,
            inner_pipeline,
            outer_pipeline,
            sphere_a_buffer,
            sphere_b_buffer,
            pair_buffer,
            pair_count_buffer,
            data_layout,
            params_layout,
            batch_size,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Finds all overlapping sphere pairs, returned as global indices into
    /// the input slice with `index_a < index_b`.
    pub fn find_pairs(&self, spheres: &[GpuSphere]) -> anyhow::Result<Vec<IndexPair>> {
        let mut found = Vec::new();
        let batches: Vec<(usize, &[GpuSphere])> = spheres
            .chunks(self.batch_size)
            .enumerate()
            .map(|(i, chunk)| (i * self.batch_size, chunk))
            .collect();

        for (offset, batch) in &batches {
            self.sphere_a_buffer.write(&self.ctx, batch);
            self.run_batch(
                &self.inner_pipeline,
                batch.len() as u32,
                0,
                *offset as u32,
                0,
                &mut found,
            )?;
        }
        for (i, (offset_a, batch_a)) in batches.iter().enumerate() {
            for (offset_b, batch_b) in batches.iter().skip(i + 1) {
                self.sphere_a_buffer.write(&self.ctx, batch_a);
                self.sphere_b_buffer.write(&self.ctx, batch_b);
                self.run_batch(
                    &self.outer_pipeline,
                    batch_a.len() as u32,
                    batch_b.len() as u32,
                    *offset_a as u32,
                    *offset_b as u32,
                    &mut found,
                )?;
            }
        }
        debug!(pairs = found.len(), bodies = spheres.len(), "gpu broad phase pass");
        Ok(found)
    }

    fn run_batch(
        &self,
        pipeline: &wgpu::ComputePipeline,
        count_a: u32,
        count_b: u32,
        offset_a: u32,
        offset_b: u32,
        found: &mut Vec<IndexPair>,
    ) -> anyhow::Result<()> {
        if count_a == 0 {
            return Ok(());
        }
        self.pair_count_buffer.write(&self.ctx, &[0u32]);

        use wgpu::util::DeviceExt;
        let params = BatchParams {
            count_a,
            count_b,
            offset_a,
            offset_b,
            max_pairs: MAX_PAIRS,
            _pad0: 0,
            _pad1: 0,
            _pad2: 0,
        };
        let params_buffer = self
            .ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("broad phase params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let data_bind_group = self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("broad phase data"),
            layout: &self.data_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.sphere_a_buffer.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.sphere_b_buffer.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.pair_buffer.buffer().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.pair_count_buffer.buffer().as_entire_binding(),
                },
            ],
        });
        let params_bind_group = self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("broad phase params"),
            layout: &self.params_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buffer.as_entire_binding(),
            }],
        });

        let dispatcher = ComputeDispatcher::new(&self.ctx);
        let workgroups = compute_workgroup_count(count_a, WORKGROUP_SIZE);
        dispatcher.dispatch(
            pipeline,
            &[&data_bind_group, &params_bind_group],
            [workgroups, 1, 1],
            Some("broad phase"),
        );

        let count: Vec<u32> = read_buffer_sync(&self.ctx, self.pair_count_buffer.buffer(), 4)?;
        let pair_count = count.first().copied().unwrap_or(0).min(MAX_PAIRS);
        if pair_count == 0 {
            return Ok(());
        }
        let read_size = (pair_count as usize * std::mem::size_of::<IndexPair>()) as u64;
        let pairs: Vec<IndexPair> = read_buffer_sync(&self.ctx, self.pair_buffer.buffer(), read_size)?;
        found.extend(pairs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn sphere(x: f32, y: f32, z: f32, r: f32) -> GpuSphere {
        GpuSphere {
            center: [x, y, z],
            radius: r,
        }
    }

    fn pair_set(pairs: &[IndexPair]) -> BTreeSet<(u32, u32)> {
        pairs.iter().map(|p| (p.index_a, p.index_b)).collect()
    }

    fn cpu_pairs(spheres: &[GpuSphere]) -> BTreeSet<(u32, u32)> {
        let mut set = BTreeSet::new();
        for i in 0..spheres.len() {
            for j in i + 1..spheres.len() {
                let (a, b) = (spheres[i], spheres[j]);
                let d: Vec<f32> = (0..3).map(|k| a.center[k] - b.center[k]).collect();
                let dist_sq = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
                let reach = a.radius + b.radius;
                if dist_sq < reach * reach {
                    set.insert((i as u32, j as u32));
                }
            }
        }
        set
    }

    #[test]
    fn sphere_layout_matches_vec4() {
        assert_eq!(std::mem::size_of::<GpuSphere>(), 16);
    }

    #[test]
    fn index_pair_layout() {
        assert_eq!(std::mem::size_of::<IndexPair>(), 8);
    }

    #[test]
    fn batch_params_layout() {
        assert_eq!(std::mem::size_of::<BatchParams>(), 32);
    }

    // Needs a live adapter; silently passes where none exists (CI).
    #[test]
    fn gpu_pairs_match_cpu_reference() {
        let Ok(ctx) = WgpuContext::new_blocking() else {
            eprintln!("no gpu adapter available, skipping");
            return;
        };
        // Batch size 4 forces both inner and outer dispatches.
        let gpu = GpuBroadPhase::new(ctx, 4).unwrap();
        let mut spheres = Vec::new();
        for i in 0..10 {
            spheres.push(sphere(i as f32 * 1.5, 0.0, 0.0, 1.0));
        }
        // A far-away isolated one and a big one overlapping several.
        spheres.push(sphere(100.0, 0.0, 0.0, 1.0));
        spheres.push(sphere(3.0, 1.0, 0.0, 2.5));

        let gpu_set = pair_set(&gpu.find_pairs(&spheres).unwrap());
        assert_eq!(gpu_set, cpu_pairs(&spheres));
    }
}
