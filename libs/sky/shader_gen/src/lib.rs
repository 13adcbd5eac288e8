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

//! Assembly of the GPU kernels the precompute scheduler dispatches.
//!
//! Kernel source is assembled from static templates plus generated
//! strings: a constants header, per-species density functions, the
//! per-wavelength-set transmittance functions, a phase-function
//! dispatcher, and token substitutions that bake the scattering order and
//! blend flags into each variant. Everything lives in an explicit
//! `SourceTable` owned by the scheduler; compiled programs are cached and
//! evicted whenever one of their sources is rewritten.
pub mod codegen;

mod cache;
mod error;
mod include;
mod source_table;

pub use crate::{
    cache::{assemble_program, compile_program, link_set, numbered_listing, CompiledProgram, KernelCache},
    error::{ShaderError, ShaderIncludeError},
    include::{resolve_includes, Resolver, MAX_INCLUDE_DEPTH},
    source_table::SourceTable,
};

// Virtual files: generated strings overlaid on the table.
pub const CONSTANTS_HEADER: &str = "const.h.glsl";
pub const DENSITIES_HEADER: &str = "densities.h.glsl";
pub const DENSITIES_SHADER: &str = "densities.comp";
pub const PHASE_FUNCTIONS_SHADER: &str = "phase-functions.comp";
pub const TRANSMITTANCE_FUNCTIONS_SHADER: &str = "transmittance-functions.comp";
pub const TOTAL_SCATTERING_COEFFICIENT_SHADER: &str = "total-scattering-coefficient.comp";

// Static kernel entry points.
pub const COMPUTE_TRANSMITTANCE_SHADER: &str = "compute-transmittance.comp";
pub const COMPUTE_DIRECT_IRRADIANCE_SHADER: &str = "compute-direct-irradiance.comp";
pub const COMPUTE_SINGLE_SCATTERING_SHADER: &str = "compute-single-scattering.comp";
pub const COMPUTE_SCATTERING_DENSITY_SHADER: &str = "compute-scattering-density.comp";
pub const COMPUTE_INDIRECT_IRRADIANCE_SHADER: &str = "compute-indirect-irradiance.comp";
pub const COMPUTE_MULTIPLE_SCATTERING_SHADER: &str = "compute-multiple-scattering.comp";
pub const COPY_SCATTERING_SHADER: &str = "copy-scattering-texture.comp";

// Specialization tokens substituted into kernel source before compilation.
pub const SCATTERING_ORDER_TOKEN: &str = "SCATTERING_ORDER";
pub const GROUND_ONLY_TOKEN: &str = "RADIATION_IS_FROM_GROUND_ONLY";
pub const BLEND_OUTPUT_TOKEN: &str = "BLEND_OUTPUT";
pub const BLEND_DELTA_TOKEN: &str = "BLEND_DELTA";
