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

//! Table persistence: GPU readback and raw float32 dumps.
//!
//! The on-disk format is raw little-endian float32, channel-interleaved;
//! 2-D tables are W x H x 4 floats row-major with the origin at the lower
//! left (GPU convention), 3-D tables W x H x D x 4 floats, depth
//! outermost. File names encode the table role, the scattering order for
//! debug dumps, and the wavelength set index.
use crate::tables::Target;
use anyhow::Result;
use gpu::{wgpu, Gpu};
use image::{ImageBuffer, Rgb};
use log::{debug, info};
use std::{fs, num::NonZeroU32, path::Path};
use thiserror::Error;

/// Output directory not writable, disk full, or a short file on re-read.
#[derive(Debug, Error)]
#[error("io failure on {path}: {message}")]
pub struct IoError {
    pub path: String,
    pub message: String,
}

impl IoError {
    fn new(path: &Path, message: impl ToString) -> Self {
        Self {
            path: path.display().to_string(),
            message: message.to_string(),
        }
    }
}

pub fn transmittance_file(set: usize) -> String {
    format!("transmittance-wlset{}.f32", set)
}

pub fn irradiance_delta_file(order: u32, set: usize) -> String {
    format!("irradiance-delta-order{}-wlset{}.f32", order, set)
}

pub fn irradiance_accum_file(order: u32, set: usize) -> String {
    format!("irradiance-accum-order{}-wlset{}.f32", order, set)
}

pub fn irradiance_file(set: usize) -> String {
    format!("irradiance-wlset{}.f32", set)
}

pub fn scattering_density_file(order: u32, set: usize) -> String {
    format!("scattering-density{}-wlset{}.f32", order, set)
}

pub fn delta_scattering_file(order: u32, set: usize) -> String {
    format!("delta-scattering-order{}-wlset{}.f32", order, set)
}

pub fn multiple_scattering_to_order_file(order: u32, set: usize) -> String {
    format!("multiple-scattering-to-order{}-wlset{}.f32", order, set)
}

pub fn single_scattering_file(species: &str, set: usize) -> String {
    format!("single-scattering-{}-wlset{}.f32", species, set)
}

pub fn final_scattering_radiance_file(set: usize) -> String {
    format!("multiple-scattering-wlset{}.f32", set)
}

pub const FINAL_SCATTERING_LUMINANCE_FILE: &str = "multiple-scattering-xyzw.f32";

/// Read a target back as raw bytes, stripping the 256-byte row pitch the
/// copy requires.
pub fn read_texture_bytes(gpu: &Gpu, target: &Target) -> Result<Vec<u8>> {
    let extent = target.extent;
    let unpadded_bytes_per_row = extent.width * 16;
    let padded_bytes_per_row =
        (unpadded_bytes_per_row + wgpu::COPY_BYTES_PER_ROW_ALIGNMENT - 1)
            / wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let rows = extent.height * extent.depth_or_array_layers;
    let buffer_size = u64::from(padded_bytes_per_row) * u64::from(rows);

    let staging_buffer = gpu.device().create_buffer(&wgpu::BufferDescriptor {
        label: Some("sky-table-download-buffer"),
        size: buffer_size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = gpu
        .device()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("sky-table-download-command-encoder"),
        });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture: &target.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &staging_buffer,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: NonZeroU32::new(padded_bytes_per_row),
                rows_per_image: NonZeroU32::new(extent.height),
            },
        },
        extent,
    );
    gpu.queue().submit(vec![encoder.finish()]);

    let map_future = staging_buffer.slice(..).map_async(wgpu::MapMode::Read);
    gpu.device().poll(wgpu::Maintain::Wait);
    futures::executor::block_on(map_future).expect("failed to map table readback buffer");

    let mapping = staging_buffer.slice(..).get_mapped_range();
    let mut bytes = Vec::with_capacity((unpadded_bytes_per_row * rows) as usize);
    for row in 0..rows {
        let start = (row * padded_bytes_per_row) as usize;
        bytes.extend_from_slice(&mapping[start..start + unpadded_bytes_per_row as usize]);
    }
    drop(mapping);
    staging_buffer.unmap();
    Ok(bytes)
}

/// Read a target back as f32 samples (channel-interleaved).
pub fn read_texture(gpu: &Gpu, target: &Target) -> Result<Vec<f32>> {
    let bytes = read_texture_bytes(gpu, target)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

pub fn save_texture(gpu: &Gpu, target: &Target, path: &Path, png_preview: bool) -> Result<()> {
    let bytes = read_texture_bytes(gpu, target)?;
    fs::write(path, &bytes).map_err(|e| IoError::new(path, e))?;
    info!("wrote {} ({} bytes)", path.display(), bytes.len());
    if png_preview {
        save_png_previews(&bytes, target.extent, path)?;
    }
    Ok(())
}

/// Write raw samples straight to disk; the save-time dimensions must
/// match the sample count so the file round-trips.
pub fn write_raw(path: &Path, samples: &[f32], dims: &[u32]) -> Result<()> {
    let expected: u64 = dims.iter().map(|&d| u64::from(d)).product::<u64>() * 4;
    anyhow::ensure!(
        expected == samples.len() as u64,
        "dimension mismatch: {:?} declares {} samples but {} were given",
        dims,
        expected,
        samples.len()
    );
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    fs::write(path, &bytes).map_err(|e| IoError::new(path, e))?;
    Ok(())
}

pub fn read_raw(path: &Path) -> Result<Vec<f32>> {
    let bytes = fs::read(path).map_err(|e| IoError::new(path, e))?;
    if bytes.len() % 4 != 0 {
        return Err(IoError::new(path, "length is not a whole number of f32 samples").into());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

// Tone-mapped preview images next to the raw dump, one per layer.
fn save_png_previews(bytes: &[u8], extent: wgpu::Extent3d, raw_path: &Path) -> Result<()> {
    const EXPOSURE: f32 = 683.0 * 0.0001;
    let samples: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    let layer_pixels = (extent.width * extent.height) as usize;
    for layer in 0..extent.depth_or_array_layers as usize {
        let mut rgb = Vec::with_capacity(layer_pixels * 3);
        for i in 0..layer_pixels {
            let base = (layer * layer_pixels + i) * 4;
            for c in 0..3 {
                let mut v = (1.0 - (-samples[base + c] * EXPOSURE).exp()).powf(1.0 / 2.2);
                if v.is_nan() {
                    v = 0.0;
                }
                rgb.push((v.clamp(0.0, 1.0) * 255.0) as u8);
            }
        }
        let name = if extent.depth_or_array_layers > 1 {
            format!("{}-layer{:02}.png", raw_path.display(), layer)
        } else {
            format!("{}.png", raw_path.display())
        };
        let img = ImageBuffer::<Rgb<u8>, _>::from_raw(extent.width, extent.height, rgb)
            .expect("sized above");
        img.save(&name)
            .map_err(|e| IoError::new(Path::new(&name), e))?;
        debug!("wrote preview {}", name);
    }
    Ok(())
}
