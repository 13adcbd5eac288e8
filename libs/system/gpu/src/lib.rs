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

//! Headless GPU device wrapper.
//!
//! The table generator is an offscreen batch tool: no window, no swap
//! chain, no present. This crate owns the instance/adapter/device/queue
//! and the few helpers the precompute passes need: uniform uploads,
//! compute pipeline creation with captured validation errors, and a full
//! device barrier between passes.

// Note: re-export so dependents name texture descriptors and usages
// against the same wgpu version.
pub use wgpu;

use futures::executor::block_on;
use log::{info, trace};
use std::borrow::Cow;
use thiserror::Error;
use wgpu::util::DeviceExt;
use zerocopy::AsBytes;

/// Allocation failed, a created resource failed validation, or the
/// context itself could not be brought up.
#[derive(Debug, Error)]
#[error("gpu resource failure in {what}: {message}")]
pub struct GpuResourceError {
    pub what: String,
    pub message: String,
}

impl GpuResourceError {
    fn new(what: &str, message: String) -> Self {
        Self {
            what: what.to_owned(),
            message,
        }
    }
}

pub struct Gpu {
    _instance: wgpu::Instance,
    _adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl Gpu {
    pub fn new() -> Result<Self, GpuResourceError> {
        match block_on(Self::new_async(false))? {
            Some(gpu) => Ok(gpu),
            None => Err(GpuResourceError::new(
                "adapter request",
                "no suitable graphics adapter".to_owned(),
            )),
        }
    }

    /// Like `new`, but reports the absence of an adapter as `None` so test
    /// suites can skip instead of failing on GPU-less machines. Accepts a
    /// software fallback adapter when one is offered.
    pub fn for_test() -> Result<Option<Self>, GpuResourceError> {
        block_on(Self::new_async(true))
    }

    async fn new_async(allow_fallback: bool) -> Result<Option<Self>, GpuResourceError> {
        let instance = wgpu::Instance::new(wgpu::Backends::PRIMARY);
        let mut adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await;
        if adapter.is_none() && allow_fallback {
            adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::LowPower,
                    compatible_surface: None,
                    force_fallback_adapter: true,
                })
                .await;
        }
        let adapter = match adapter {
            Some(adapter) => adapter,
            None => return Ok(None),
        };
        info!("gpu adapter: {:?}", adapter.get_info());

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("skylight-device"),
                    features: adapter.features(),
                    limits: adapter.limits(),
                },
                None,
            )
            .await
            .map_err(|e| GpuResourceError::new("device request", e.to_string()))?;

        Ok(Some(Self {
            _instance: instance,
            _adapter: adapter,
            device,
            queue,
        }))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn push_data<T: AsBytes>(
        &self,
        label: &str,
        data: &T,
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        trace!("uploading {} ({} bytes)", label, data.as_bytes().len());
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: data.as_bytes(),
                usage,
            })
    }

    pub fn push_slice<T: AsBytes>(
        &self,
        label: &str,
        data: &[T],
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        let contents = data
            .iter()
            .flat_map(|v| v.as_bytes())
            .copied()
            .collect::<Vec<u8>>();
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: &contents,
                usage,
            })
    }

    /// Run `f` inside a validation error scope, mapping any captured error
    /// to `GpuResourceError`. The scheduler wraps texture, bind group and
    /// pipeline creation in this; it is the moral equivalent of checking
    /// framebuffer completeness after every binding.
    pub fn try_create<T>(
        &self,
        what: &str,
        f: impl FnOnce(&wgpu::Device) -> T,
    ) -> Result<T, GpuResourceError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        if let Some(err) = block_on(self.device.pop_error_scope()) {
            return Err(GpuResourceError::new(what, err.to_string()));
        }
        Ok(value)
    }

    /// Build a compute pipeline from SPIR-V words against an explicit bind
    /// group layout. The kernel's entry point is always `main`.
    pub fn create_compute_pipeline(
        &self,
        label: &str,
        spirv: &[u32],
        bind_group_layout: &wgpu::BindGroupLayout,
    ) -> Result<wgpu::ComputePipeline, GpuResourceError> {
        self.try_create(label, |device| {
            let module = device.create_shader_module(&wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::SpirV(Cow::Borrowed(spirv)),
            });
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[bind_group_layout],
                push_constant_ranges: &[],
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                module: &module,
                entry_point: "main",
            })
        })
    }

    /// Full GPU barrier: block until all submitted work has retired.
    pub fn finish(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_device_comes_up_or_skips() -> Result<(), GpuResourceError> {
        let gpu = match Gpu::for_test()? {
            Some(gpu) => gpu,
            None => return Ok(()),
        };
        let _buf = gpu.push_slice("test-upload", &[1u32, 2, 3, 4], wgpu::BufferUsages::UNIFORM);
        gpu.finish();
        Ok(())
    }
}
