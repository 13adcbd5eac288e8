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
use anyhow::{Context, Result};
use atmosphere::AtmosphereDescription;
use gpu::Gpu;
use sky_tables::{DumpFlags, Precompute};
use std::{fs, path::PathBuf, time::Instant};
use structopt::StructOpt;

/// Precompute the atmosphere lookup tables for a sky renderer.
#[derive(Debug, StructOpt)]
struct Opt {
    /// Atmosphere description (JSON)
    #[structopt(short, long)]
    config: PathBuf,

    /// Directory the tables are written to
    #[structopt(short, long)]
    output: PathBuf,

    /// Keep the final scattering table as per-set spectral radiance
    /// instead of projecting to CIE XYZW luminance
    #[structopt(long)]
    radiance: bool,

    /// Dump per-order irradiance textures
    #[structopt(long)]
    dump_ground_irradiance: bool,

    /// Dump per-order scattering density textures
    #[structopt(long)]
    dump_scattering_density: bool,

    /// Dump per-order delta scattering textures
    #[structopt(long)]
    dump_delta_scattering: bool,

    /// Dump the accumulator after every order
    #[structopt(long)]
    dump_accumulated_scattering: bool,

    /// Write tone-mapped PNG previews next to the raw dumps
    #[structopt(long)]
    png_previews: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let text = fs::read_to_string(&opt.config)
        .with_context(|| format!("reading atmosphere description {}", opt.config.display()))?;
    let mut atmosphere: AtmosphereDescription = serde_json::from_str(&text)
        .with_context(|| format!("parsing atmosphere description {}", opt.config.display()))?;
    if opt.radiance {
        atmosphere.save_result_as_radiance = true;
    }

    let dump = DumpFlags {
        ground_irradiance: opt.dump_ground_irradiance,
        scattering_density: opt.dump_scattering_density,
        delta_scattering: opt.dump_delta_scattering,
        accumulated_scattering: opt.dump_accumulated_scattering,
        png_previews: opt.png_previews,
    };

    let gpu = Gpu::new()?;
    let precompute_start = Instant::now();
    let mut precompute = Precompute::new(atmosphere, opt.output, dump, &gpu)?;
    precompute.run(&gpu)?;
    println!("Precompute time: {:?}", precompute_start.elapsed());

    Ok(())
}
