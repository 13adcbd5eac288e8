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

//! Precomputed atmosphere lookup tables.
//!
//! The method follows Bruneton & Neyret, "Precomputed Atmospheric
//! Scattering" (2008), generalized to a user-declared list of scatterer
//! and absorber species whose kernels are generated and specialized at
//! run time.
pub mod table_io;

mod precompute;
mod tables;

pub use crate::{
    precompute::{accumulate_blends, final_output_file, DumpFlags, Precompute, BLOCK_SIZE},
    tables::{TableSet, Target},
};
