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
use atmosphere::AtmosphereDescription;
use gpu::{wgpu, Gpu, GpuResourceError};

/// One render target with its default view.
pub struct Target {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub extent: wgpu::Extent3d,
}

impl Target {
    fn allocate(
        gpu: &Gpu,
        label: &str,
        extent: wgpu::Extent3d,
        dimension: wgpu::TextureDimension,
    ) -> Result<Self, GpuResourceError> {
        let texture = gpu.try_create(label, |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: extent,
                mip_level_count: 1,
                sample_count: 1,
                dimension,
                format: wgpu::TextureFormat::Rgba32Float,
                usage: wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
            })
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            format: None,
            dimension: None,
            aspect: wgpu::TextureAspect::All,
            base_mip_level: 0,
            mip_level_count: None,
            base_array_layer: 0,
            array_layer_count: None,
        });
        Ok(Self {
            texture,
            view,
            extent,
        })
    }
}

/// The fixed set of tables the pipeline works through: three 2-D targets
/// and three 3-D targets, allocated once and reused across every
/// wavelength set and scattering order. No pass touches more than two of
/// the 3-D targets, which bounds the working set to two 4-D tables.
pub struct TableSet {
    pub transmittance: Target,
    pub delta_irradiance: Target,
    pub irradiance: Target,
    pub delta_scattering: Target,
    pub delta_scattering_density: Target,
    pub multiple_scattering: Target,
}

impl TableSet {
    pub fn allocate(gpu: &Gpu, atm: &AtmosphereDescription) -> Result<Self, GpuResourceError> {
        let transmittance_extent = wgpu::Extent3d {
            width: atm.transmittance_texture_size[0],
            height: atm.transmittance_texture_size[1],
            depth_or_array_layers: 1,
        };
        let irradiance_extent = wgpu::Extent3d {
            width: atm.irradiance_texture_size[0],
            height: atm.irradiance_texture_size[1],
            depth_or_array_layers: 1,
        };
        let scattering_extent = wgpu::Extent3d {
            width: atm.scattering_texture_width(),
            height: atm.scattering_texture_height(),
            depth_or_array_layers: atm.scattering_texture_depth(),
        };

        Ok(Self {
            transmittance: Target::allocate(
                gpu,
                "sky-transmittance-texture",
                transmittance_extent,
                wgpu::TextureDimension::D2,
            )?,
            delta_irradiance: Target::allocate(
                gpu,
                "sky-delta-irradiance-texture",
                irradiance_extent,
                wgpu::TextureDimension::D2,
            )?,
            irradiance: Target::allocate(
                gpu,
                "sky-irradiance-texture",
                irradiance_extent,
                wgpu::TextureDimension::D2,
            )?,
            delta_scattering: Target::allocate(
                gpu,
                "sky-delta-scattering-texture",
                scattering_extent,
                wgpu::TextureDimension::D3,
            )?,
            delta_scattering_density: Target::allocate(
                gpu,
                "sky-delta-scattering-density-texture",
                scattering_extent,
                wgpu::TextureDimension::D3,
            )?,
            multiple_scattering: Target::allocate(
                gpu,
                "sky-multiple-scattering-texture",
                scattering_extent,
                wgpu::TextureDimension::D3,
            )?,
        })
    }
}
