// This file is part of Skylight.
//
// Skylight is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Skylight is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Skylight.  If not, see <http://www.gnu.org/licenses/>.

//! The precomputation scheduler.
//!
//! For each wavelength set: transmittance, then direct ground irradiance,
//! then scattering order 2 (ground-only source term, then per-scatterer
//! single scattering interleaved with the per-scatterer source term and
//! order-1 indirect irradiance), then orders 3..N (source term, indirect
//! irradiance, multiple scattering, accumulation). Order progression is
//! strictly sequential; the only interleaved stretch is order 1 + 2, which
//! is what keeps at most two of the 3-D tables in play per pass.
use crate::{
    table_io,
    tables::TableSet,
};
use anyhow::Result;
use atmosphere::AtmosphereDescription;
use gpu::{wgpu, Gpu};
use log::{debug, info};
use shader_gen::{codegen, KernelCache, SourceTable};
use std::{fs, path::PathBuf, time::Instant};
use zerocopy::AsBytes;

// Must match the local_size declared by the kernels.
pub const BLOCK_SIZE: u32 = 8;

/// Debug dumps, mirroring the renderer-facing outputs that are always
/// written. All off by default.
#[derive(Clone, Copy, Debug, Default)]
pub struct DumpFlags {
    pub ground_irradiance: bool,
    pub scattering_density: bool,
    pub delta_scattering: bool,
    pub accumulated_scattering: bool,
    pub png_previews: bool,
}

#[repr(C)]
#[derive(AsBytes, Copy, Clone)]
struct DirectIrradianceParams {
    solar_irradiance: [f32; 4],
}

#[repr(C)]
#[derive(AsBytes, Copy, Clone)]
struct SingleScatteringParams {
    solar_irradiance: [f32; 4],
    layer: u32,
    padding: [u32; 3],
}

#[repr(C)]
#[derive(AsBytes, Copy, Clone)]
struct ScatteringDensityParams {
    ground_albedo: [f32; 4],
    layer: u32,
    padding: [u32; 3],
}

#[repr(C)]
#[derive(AsBytes, Copy, Clone)]
struct LayerParams {
    layer: u32,
    padding: [u32; 3],
}

#[repr(C)]
#[derive(AsBytes, Copy, Clone)]
struct AccumulateParams {
    radiance_to_luminance: [[f32; 4]; 4],
    layer: u32,
    padding: [u32; 3],
}

fn uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
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

fn storage_texture_2d(binding: u32, access: wgpu::StorageTextureAccess) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access,
            format: wgpu::TextureFormat::Rgba32Float,
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        count: None,
    }
}

fn storage_texture_3d(binding: u32, access: wgpu::StorageTextureAccess) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access,
            format: wgpu::TextureFormat::Rgba32Float,
            view_dimension: wgpu::TextureViewDimension::D3,
        },
        count: None,
    }
}

fn buffer_entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

fn texture_entry<'a>(binding: u32, view: &'a wgpu::TextureView) -> wgpu::BindGroupEntry<'a> {
    wgpu::BindGroupEntry {
        binding,
        resource: wgpu::BindingResource::TextureView(view),
    }
}

fn workgroups(size: u32) -> u32 {
    (size + BLOCK_SIZE - 1) / BLOCK_SIZE
}

/// One full-extent dispatch for a 2-D target, synchronised to completion.
fn run_single(
    gpu: &Gpu,
    what: &str,
    pipeline: &wgpu::ComputePipeline,
    bind_group: &wgpu::BindGroup,
    extent: wgpu::Extent3d,
) {
    debug!("{}", what);
    let mut encoder = gpu
        .device()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(what) });
    {
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some(what) });
        cpass.set_pipeline(pipeline);
        cpass.set_bind_group(0, bind_group, &[]);
        cpass.dispatch(workgroups(extent.width), workgroups(extent.height), 1);
    }
    gpu.queue().submit(vec![encoder.finish()]);
    gpu.finish();
}

/// Layer-by-layer dispatches for a 3-D target, with a full GPU fence
/// between layers to bound queue growth and keep debug dumps coherent.
fn run_layers(
    gpu: &Gpu,
    what: &str,
    pipeline: &wgpu::ComputePipeline,
    extent: wgpu::Extent3d,
    mut bind_group_for_layer: impl FnMut(u32) -> Result<wgpu::BindGroup>,
) -> Result<()> {
    debug!("{}", what);
    for layer in 0..extent.depth_or_array_layers {
        let bind_group = bind_group_for_layer(layer)?;
        let mut encoder = gpu
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(what) });
        {
            let mut cpass =
                encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some(what) });
            cpass.set_pipeline(pipeline);
            cpass.set_bind_group(0, &bind_group, &[]);
            cpass.dispatch(workgroups(extent.width), workgroups(extent.height), 1);
        }
        gpu.queue().submit(vec![encoder.finish()]);
        gpu.finish();
        debug!("{}: {} of {} layers done", what, layer + 1, extent.depth_or_array_layers);
    }
    Ok(())
}

/// Additive blending into the multiple-scattering accumulator is disabled
/// only for the very first write, so the target is initialized rather
/// than added to: in radiance mode every set starts its own accumulation
/// at order 2; in luminance mode only the first set does.
pub fn accumulate_blends(order: u32, set_index: usize, radiance_mode: bool) -> bool {
    order > 2 || (set_index > 0 && !radiance_mode)
}

/// The name of the final multiple-scattering output, if this (order, set)
/// is the last accumulation that touches it.
pub fn final_output_file(
    order: u32,
    last_order: u32,
    set_index: usize,
    set_count: usize,
    radiance_mode: bool,
) -> Option<String> {
    if order != last_order {
        return None;
    }
    if radiance_mode {
        Some(table_io::final_scattering_radiance_file(set_index))
    } else if set_index + 1 == set_count {
        Some(table_io::FINAL_SCATTERING_LUMINANCE_FILE.to_owned())
    } else {
        None
    }
}

fn vec4_f32(v: [f64; 4]) -> [f32; 4] {
    [v[0] as f32, v[1] as f32, v[2] as f32, v[3] as f32]
}

pub struct Precompute {
    atmosphere: AtmosphereDescription,
    tables: TableSet,
    sources: SourceTable,
    cache: KernelCache,
    output_dir: PathBuf,
    dump: DumpFlags,
}

impl Precompute {
    /// Validates the description (before any GPU work), creates the
    /// output directory and allocates the table set.
    pub fn new(
        atmosphere: AtmosphereDescription,
        output_dir: PathBuf,
        dump: DumpFlags,
        gpu: &Gpu,
    ) -> Result<Self> {
        atmosphere.validate()?;
        fs::create_dir_all(&output_dir).map_err(|e| table_io::IoError {
            path: output_dir.display().to_string(),
            message: e.to_string(),
        })?;
        let tables = TableSet::allocate(gpu, &atmosphere)?;
        Ok(Self {
            atmosphere,
            tables,
            sources: SourceTable::new(),
            cache: KernelCache::new(),
            output_dir,
            dump,
        })
    }

    pub fn tables(&self) -> &TableSet {
        &self.tables
    }

    pub fn run(&mut self, gpu: &Gpu) -> Result<()> {
        let set_count = self.atmosphere.wavelength_set_count();
        for set_index in 0..set_count {
            let lambdas = self.atmosphere.wavelength_sets[set_index];
            info!(
                "working on wavelengths {:?} nm (set {} of {})",
                lambdas,
                set_index + 1,
                set_count
            );
            self.cache.clear();
            self.generate_sources_for_set(set_index);

            info!("computing parts of scattering order 1");
            self.compute_transmittance(gpu, set_index)?;
            // Ground irradiance accounts for light scattered by the ground
            // into the sky and is also what a renderer shades terrain with.
            self.compute_direct_ground_irradiance(gpu, set_index)?;

            self.compute_scattering_orders(gpu, set_index)?;

            let path = self.output_dir.join(table_io::irradiance_file(set_index));
            table_io::save_texture(gpu, &self.tables.irradiance, &path, self.dump.png_previews)?;
        }
        Ok(())
    }

    fn generate_sources_for_set(&mut self, set_index: usize) {
        let lambdas = self.atmosphere.wavelength_sets[set_index];
        self.sources.set_virtual(
            shader_gen::CONSTANTS_HEADER,
            codegen::constants_header(&self.atmosphere),
        );
        self.sources.set_virtual(
            shader_gen::DENSITIES_HEADER,
            codegen::densities_header(&self.atmosphere),
        );
        self.sources.set_virtual(
            shader_gen::DENSITIES_SHADER,
            codegen::densities_functions_src(&self.atmosphere),
        );
        self.sources.set_virtual(
            shader_gen::TRANSMITTANCE_FUNCTIONS_SHADER,
            codegen::transmittance_functions_src(&self.atmosphere, lambdas),
        );
        self.sources.set_virtual(
            shader_gen::PHASE_FUNCTIONS_SHADER,
            codegen::phase_functions_ground_stub_src(&self.atmosphere),
        );
        self.sources.set_virtual(
            shader_gen::TOTAL_SCATTERING_COEFFICIENT_SHADER,
            codegen::total_scattering_coefficient_src(&self.atmosphere, lambdas),
        );
    }

    fn compute_transmittance(&mut self, gpu: &Gpu, set_index: usize) -> Result<()> {
        let start = Instant::now();
        let layout = gpu.try_create("sky-transmittance-bind-group-layout", |device| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("sky-transmittance-bind-group-layout"),
                entries: &[storage_texture_2d(1, wgpu::StorageTextureAccess::WriteOnly)],
            })
        })?;
        let program = self
            .cache
            .get_or_compile(&self.sources, shader_gen::COMPUTE_TRANSMITTANCE_SHADER)?;
        let pipeline =
            gpu.create_compute_pipeline("sky-transmittance-pipeline", &program.spirv, &layout)?;
        let bind_group = gpu.try_create("sky-transmittance-bind-group", |device| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("sky-transmittance-bind-group"),
                layout: &layout,
                entries: &[texture_entry(1, &self.tables.transmittance.view)],
            })
        })?;
        run_single(
            gpu,
            "computing transmittance",
            &pipeline,
            &bind_group,
            self.tables.transmittance.extent,
        );
        info!("transmittance done in {:?}", start.elapsed());

        let path = self.output_dir.join(table_io::transmittance_file(set_index));
        table_io::save_texture(gpu, &self.tables.transmittance, &path, self.dump.png_previews)
    }

    fn compute_direct_ground_irradiance(&mut self, gpu: &Gpu, set_index: usize) -> Result<()> {
        let start = Instant::now();
        let layout = gpu.try_create("sky-direct-irradiance-bind-group-layout", |device| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("sky-direct-irradiance-bind-group-layout"),
                entries: &[
                    uniform(0),
                    storage_texture_2d(1, wgpu::StorageTextureAccess::ReadOnly),
                    storage_texture_2d(2, wgpu::StorageTextureAccess::WriteOnly),
                    storage_texture_2d(3, wgpu::StorageTextureAccess::WriteOnly),
                ],
            })
        })?;
        let program = self
            .cache
            .get_or_compile(&self.sources, shader_gen::COMPUTE_DIRECT_IRRADIANCE_SHADER)?;
        let pipeline = gpu.create_compute_pipeline(
            "sky-direct-irradiance-pipeline",
            &program.spirv,
            &layout,
        )?;
        let params = gpu.push_data(
            "sky-direct-irradiance-params",
            &DirectIrradianceParams {
                solar_irradiance: vec4_f32(self.atmosphere.solar_irradiance_at_toa[set_index]),
            },
            wgpu::BufferUsages::UNIFORM,
        );
        let bind_group = gpu.try_create("sky-direct-irradiance-bind-group", |device| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("sky-direct-irradiance-bind-group"),
                layout: &layout,
                entries: &[
                    buffer_entry(0, &params),
                    texture_entry(1, &self.tables.transmittance.view),
                    texture_entry(2, &self.tables.delta_irradiance.view),
                    texture_entry(3, &self.tables.irradiance.view),
                ],
            })
        })?;
        run_single(
            gpu,
            "computing direct ground irradiance",
            &pipeline,
            &bind_group,
            self.tables.irradiance.extent,
        );
        info!("direct ground irradiance done in {:?}", start.elapsed());
        self.save_irradiance(gpu, 1, set_index)
    }

    fn compute_scattering_orders(&mut self, gpu: &Gpu, set_index: usize) -> Result<()> {
        // The per-scatterer interleave below is what keeps no more than
        // two of the 3-D tables bound in any single pass.
        self.compute_scattering_density_order2(gpu, set_index)?;
        self.compute_multiple_scattering_from_density(gpu, 2, set_index)?;

        for order in 3..=self.atmosphere.scattering_orders_to_compute {
            info!("working on scattering order {}", order);
            self.compute_scattering_density(gpu, order, set_index)?;
            self.compute_indirect_irradiance(gpu, order, set_index, true)?;
            self.compute_multiple_scattering_from_density(gpu, order, set_index)?;
        }
        Ok(())
    }

    fn compute_scattering_density_order2(&mut self, gpu: &Gpu, set_index: usize) -> Result<()> {
        const ORDER: u32 = 2;
        info!("working on scattering orders 1 and 2");

        self.sources.set_virtual(
            shader_gen::DENSITIES_SHADER,
            codegen::densities_functions_src(&self.atmosphere),
        );
        self.sources.set_virtual(
            shader_gen::PHASE_FUNCTIONS_SHADER,
            codegen::phase_functions_ground_stub_src(&self.atmosphere),
        );
        self.specialize_scattering_density(ORDER, true, false)?;
        self.run_scattering_density(
            gpu,
            set_index,
            "computing scattering density layers for radiation from the ground",
        )?;

        for scatterer_index in 0..self.atmosphere.scatterers.len() {
            info!(
                "processing scatterer {:?}",
                self.atmosphere.scatterers[scatterer_index].name
            );
            self.compute_single_scattering(gpu, set_index, scatterer_index)?;

            self.sources.set_virtual(
                shader_gen::PHASE_FUNCTIONS_SHADER,
                codegen::phase_functions_src(&self.atmosphere, scatterer_index),
            );
            self.specialize_scattering_density(ORDER, false, true)?;
            self.run_scattering_density(gpu, set_index, "computing scattering density layers")?;

            self.compute_indirect_irradiance(gpu, ORDER, set_index, scatterer_index == 0)?;
        }

        if self.dump.scattering_density {
            let path = self
                .output_dir
                .join(table_io::scattering_density_file(ORDER, set_index));
            table_io::save_texture(
                gpu,
                &self.tables.delta_scattering_density,
                &path,
                self.dump.png_previews,
            )?;
        }
        Ok(())
    }

    fn compute_scattering_density(&mut self, gpu: &Gpu, order: u32, set_index: usize) -> Result<()> {
        assert!(order > 2);
        self.specialize_scattering_density(order, false, false)?;
        self.run_scattering_density(gpu, set_index, "computing scattering density layers")?;
        if self.dump.scattering_density {
            let path = self
                .output_dir
                .join(table_io::scattering_density_file(order, set_index));
            table_io::save_texture(
                gpu,
                &self.tables.delta_scattering_density,
                &path,
                self.dump.png_previews,
            )?;
        }
        Ok(())
    }

    fn specialize_scattering_density(
        &mut self,
        order: u32,
        ground_only: bool,
        blend: bool,
    ) -> Result<()> {
        // Baking these into the source statically eliminates the dead
        // branches and keeps the uniform list down to the runtime ones.
        let src = self
            .sources
            .pristine(shader_gen::COMPUTE_SCATTERING_DENSITY_SHADER)?
            .to_owned();
        let src = codegen::replace_token(
            &src,
            shader_gen::GROUND_ONLY_TOKEN,
            if ground_only { "true" } else { "false" },
        );
        let src = codegen::replace_token(&src, shader_gen::SCATTERING_ORDER_TOKEN, &order.to_string());
        let src = codegen::replace_token(
            &src,
            shader_gen::BLEND_OUTPUT_TOKEN,
            if blend { "true" } else { "false" },
        );
        self.sources
            .set_virtual(shader_gen::COMPUTE_SCATTERING_DENSITY_SHADER, src);
        Ok(())
    }

    fn run_scattering_density(&mut self, gpu: &Gpu, set_index: usize, what: &str) -> Result<()> {
        let start = Instant::now();
        let layout = gpu.try_create("sky-scattering-density-bind-group-layout", |device| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("sky-scattering-density-bind-group-layout"),
                entries: &[
                    uniform(0),
                    storage_texture_2d(1, wgpu::StorageTextureAccess::ReadOnly),
                    storage_texture_3d(2, wgpu::StorageTextureAccess::ReadOnly),
                    storage_texture_2d(3, wgpu::StorageTextureAccess::ReadOnly),
                    storage_texture_3d(4, wgpu::StorageTextureAccess::ReadWrite),
                ],
            })
        })?;
        let program = self
            .cache
            .get_or_compile(&self.sources, shader_gen::COMPUTE_SCATTERING_DENSITY_SHADER)?;
        let pipeline = gpu.create_compute_pipeline(
            "sky-scattering-density-pipeline",
            &program.spirv,
            &layout,
        )?;
        let ground_albedo = vec4_f32(self.atmosphere.ground_albedo_for_set(set_index));
        let tables = &self.tables;
        run_layers(
            gpu,
            what,
            &pipeline,
            tables.delta_scattering_density.extent,
            |layer| {
                let params = gpu.push_data(
                    "sky-scattering-density-params",
                    &ScatteringDensityParams {
                        ground_albedo,
                        layer,
                        padding: [0; 3],
                    },
                    wgpu::BufferUsages::UNIFORM,
                );
                Ok(gpu.try_create("sky-scattering-density-bind-group", |device| {
                    device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("sky-scattering-density-bind-group"),
                        layout: &layout,
                        entries: &[
                            buffer_entry(0, &params),
                            texture_entry(1, &tables.transmittance.view),
                            texture_entry(2, &tables.delta_scattering.view),
                            texture_entry(3, &tables.delta_irradiance.view),
                            texture_entry(4, &tables.delta_scattering_density.view),
                        ],
                    })
                })?)
            },
        )?;
        info!("scattering density done in {:?}", start.elapsed());
        Ok(())
    }

    fn compute_single_scattering(
        &mut self,
        gpu: &Gpu,
        set_index: usize,
        scatterer_index: usize,
    ) -> Result<()> {
        let start = Instant::now();
        let lambdas = self.atmosphere.wavelength_sets[set_index];
        self.sources.set_virtual(
            shader_gen::DENSITIES_SHADER,
            codegen::single_scattering_densities_src(&self.atmosphere, scatterer_index, lambdas),
        );

        let layout = gpu.try_create("sky-single-scattering-bind-group-layout", |device| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("sky-single-scattering-bind-group-layout"),
                entries: &[
                    uniform(0),
                    storage_texture_2d(1, wgpu::StorageTextureAccess::ReadOnly),
                    storage_texture_3d(2, wgpu::StorageTextureAccess::WriteOnly),
                ],
            })
        })?;
        let program = self
            .cache
            .get_or_compile(&self.sources, shader_gen::COMPUTE_SINGLE_SCATTERING_SHADER)?;
        let pipeline = gpu.create_compute_pipeline(
            "sky-single-scattering-pipeline",
            &program.spirv,
            &layout,
        )?;
        let solar_irradiance = vec4_f32(self.atmosphere.solar_irradiance_at_toa[set_index]);
        let tables = &self.tables;
        run_layers(
            gpu,
            "computing single scattering layers",
            &pipeline,
            tables.delta_scattering.extent,
            |layer| {
                let params = gpu.push_data(
                    "sky-single-scattering-params",
                    &SingleScatteringParams {
                        solar_irradiance,
                        layer,
                        padding: [0; 3],
                    },
                    wgpu::BufferUsages::UNIFORM,
                );
                Ok(gpu.try_create("sky-single-scattering-bind-group", |device| {
                    device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("sky-single-scattering-bind-group"),
                        layout: &layout,
                        entries: &[
                            buffer_entry(0, &params),
                            texture_entry(1, &tables.transmittance.view),
                            texture_entry(2, &tables.delta_scattering.view),
                        ],
                    })
                })?)
            },
        )?;
        info!("single scattering done in {:?}", start.elapsed());

        // Persisted via the renderer-facing path: the consumer samples the
        // per-species table and applies its phase function at display time.
        let name = self.atmosphere.scatterers[scatterer_index].name.clone();
        let path = self
            .output_dir
            .join(table_io::single_scattering_file(&name, set_index));
        table_io::save_texture(gpu, &self.tables.delta_scattering, &path, self.dump.png_previews)
    }

    fn compute_indirect_irradiance(
        &mut self,
        gpu: &Gpu,
        order: u32,
        set_index: usize,
        overwrite_delta: bool,
    ) -> Result<()> {
        let start = Instant::now();
        let src = self
            .sources
            .pristine(shader_gen::COMPUTE_INDIRECT_IRRADIANCE_SHADER)?
            .to_owned();
        let src = codegen::replace_token(
            &src,
            shader_gen::SCATTERING_ORDER_TOKEN,
            &(order - 1).to_string(),
        );
        let src = codegen::replace_token(
            &src,
            shader_gen::BLEND_DELTA_TOKEN,
            if overwrite_delta { "false" } else { "true" },
        );
        self.sources
            .set_virtual(shader_gen::COMPUTE_INDIRECT_IRRADIANCE_SHADER, src);

        let layout = gpu.try_create("sky-indirect-irradiance-bind-group-layout", |device| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("sky-indirect-irradiance-bind-group-layout"),
                entries: &[
                    storage_texture_3d(2, wgpu::StorageTextureAccess::ReadOnly),
                    storage_texture_2d(3, wgpu::StorageTextureAccess::ReadWrite),
                    storage_texture_2d(4, wgpu::StorageTextureAccess::ReadWrite),
                ],
            })
        })?;
        let program = self
            .cache
            .get_or_compile(&self.sources, shader_gen::COMPUTE_INDIRECT_IRRADIANCE_SHADER)?;
        let pipeline = gpu.create_compute_pipeline(
            "sky-indirect-irradiance-pipeline",
            &program.spirv,
            &layout,
        )?;
        let bind_group = gpu.try_create("sky-indirect-irradiance-bind-group", |device| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("sky-indirect-irradiance-bind-group"),
                layout: &layout,
                entries: &[
                    texture_entry(2, &self.tables.delta_scattering.view),
                    texture_entry(3, &self.tables.delta_irradiance.view),
                    texture_entry(4, &self.tables.irradiance.view),
                ],
            })
        })?;
        run_single(
            gpu,
            "computing indirect irradiance",
            &pipeline,
            &bind_group,
            self.tables.irradiance.extent,
        );
        info!("indirect irradiance done in {:?}", start.elapsed());
        self.save_irradiance(gpu, order, set_index)
    }

    fn compute_multiple_scattering_from_density(
        &mut self,
        gpu: &Gpu,
        order: u32,
        set_index: usize,
    ) -> Result<()> {
        let start = Instant::now();
        let layout = gpu.try_create("sky-multiple-scattering-bind-group-layout", |device| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("sky-multiple-scattering-bind-group-layout"),
                entries: &[
                    uniform(0),
                    storage_texture_2d(1, wgpu::StorageTextureAccess::ReadOnly),
                    storage_texture_3d(2, wgpu::StorageTextureAccess::ReadOnly),
                    storage_texture_3d(3, wgpu::StorageTextureAccess::WriteOnly),
                ],
            })
        })?;
        let program = self
            .cache
            .get_or_compile(&self.sources, shader_gen::COMPUTE_MULTIPLE_SCATTERING_SHADER)?;
        let pipeline = gpu.create_compute_pipeline(
            "sky-multiple-scattering-pipeline",
            &program.spirv,
            &layout,
        )?;
        let tables = &self.tables;
        run_layers(
            gpu,
            "computing multiple scattering layers",
            &pipeline,
            tables.delta_scattering.extent,
            |layer| {
                let params = gpu.push_data(
                    "sky-multiple-scattering-params",
                    &LayerParams {
                        layer,
                        padding: [0; 3],
                    },
                    wgpu::BufferUsages::UNIFORM,
                );
                Ok(gpu.try_create("sky-multiple-scattering-bind-group", |device| {
                    device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("sky-multiple-scattering-bind-group"),
                        layout: &layout,
                        entries: &[
                            buffer_entry(0, &params),
                            texture_entry(1, &tables.transmittance.view),
                            texture_entry(2, &tables.delta_scattering_density.view),
                            texture_entry(3, &tables.delta_scattering.view),
                        ],
                    })
                })?)
            },
        )?;
        info!("multiple scattering done in {:?}", start.elapsed());

        if self.dump.delta_scattering {
            let path = self
                .output_dir
                .join(table_io::delta_scattering_file(order, set_index));
            table_io::save_texture(gpu, &self.tables.delta_scattering, &path, self.dump.png_previews)?;
        }
        self.accumulate_multiple_scattering(gpu, order, set_index)
    }

    fn accumulate_multiple_scattering(
        &mut self,
        gpu: &Gpu,
        order: u32,
        set_index: usize,
    ) -> Result<()> {
        let set_count = self.atmosphere.wavelength_set_count();
        let radiance_mode = self.atmosphere.save_result_as_radiance;
        let blend = accumulate_blends(order, set_index, radiance_mode);

        let src = self
            .sources
            .pristine(shader_gen::COPY_SCATTERING_SHADER)?
            .to_owned();
        let src = codegen::replace_token(
            &src,
            shader_gen::BLEND_OUTPUT_TOKEN,
            if blend { "true" } else { "false" },
        );
        self.sources
            .set_virtual(shader_gen::COPY_SCATTERING_SHADER, src);

        let radiance_to_luminance = if radiance_mode {
            spectral::identity_gpu_columns()
        } else {
            let lambdas = self.atmosphere.wavelength_sets[set_index];
            spectral::to_gpu_columns(&spectral::radiance_to_luminance(
                lambdas,
                set_index,
                set_count,
                self.atmosphere.lambda_first(),
                self.atmosphere.lambda_last(),
            ))
        };

        let layout = gpu.try_create("sky-accumulate-bind-group-layout", |device| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("sky-accumulate-bind-group-layout"),
                entries: &[
                    uniform(0),
                    storage_texture_3d(1, wgpu::StorageTextureAccess::ReadOnly),
                    storage_texture_3d(2, wgpu::StorageTextureAccess::ReadWrite),
                ],
            })
        })?;
        let program = self
            .cache
            .get_or_compile(&self.sources, shader_gen::COPY_SCATTERING_SHADER)?;
        let pipeline =
            gpu.create_compute_pipeline("sky-accumulate-pipeline", &program.spirv, &layout)?;
        let tables = &self.tables;
        run_layers(
            gpu,
            "blending multiple scattering layers into accumulator",
            &pipeline,
            tables.multiple_scattering.extent,
            |layer| {
                let params = gpu.push_data(
                    "sky-accumulate-params",
                    &AccumulateParams {
                        radiance_to_luminance,
                        layer,
                        padding: [0; 3],
                    },
                    wgpu::BufferUsages::UNIFORM,
                );
                Ok(gpu.try_create("sky-accumulate-bind-group", |device| {
                    device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("sky-accumulate-bind-group"),
                        layout: &layout,
                        entries: &[
                            buffer_entry(0, &params),
                            texture_entry(1, &tables.delta_scattering.view),
                            texture_entry(2, &tables.multiple_scattering.view),
                        ],
                    })
                })?)
            },
        )?;

        if self.dump.accumulated_scattering {
            let path = self
                .output_dir
                .join(table_io::multiple_scattering_to_order_file(order, set_index));
            table_io::save_texture(
                gpu,
                &self.tables.multiple_scattering,
                &path,
                self.dump.png_previews,
            )?;
        }
        if let Some(name) = final_output_file(
            order,
            self.atmosphere.scattering_orders_to_compute,
            set_index,
            set_count,
            radiance_mode,
        ) {
            let path = self.output_dir.join(name);
            table_io::save_texture(
                gpu,
                &self.tables.multiple_scattering,
                &path,
                self.dump.png_previews,
            )?;
        }
        Ok(())
    }

    fn save_irradiance(&self, gpu: &Gpu, order: u32, set_index: usize) -> Result<()> {
        if !self.dump.ground_irradiance {
            return Ok(());
        }
        // Irradiance dumps are indexed by the order of the light they
        // carry, one below the scattering order under construction.
        let delta_path = self
            .output_dir
            .join(table_io::irradiance_delta_file(order - 1, set_index));
        table_io::save_texture(gpu, &self.tables.delta_irradiance, &delta_path, self.dump.png_previews)?;
        let accum_path = self
            .output_dir
            .join(table_io::irradiance_accum_file(order - 1, set_index));
        table_io::save_texture(gpu, &self.tables.irradiance, &accum_path, self.dump.png_previews)
    }
}
