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
use crate::error::ShaderIncludeError;
use log::trace;
use std::collections::HashMap;

/// The virtual-source table: every logical shader filename maps either to
/// an embedded static source or to a generated string overlaid on top of
/// it. The scheduler owns one instance and rewrites the generated entries
/// between passes; every overwrite bumps a generation counter that the
/// kernel cache uses to evict derived artifacts.
pub struct SourceTable {
    embedded: HashMap<&'static str, &'static str>,
    generated: HashMap<String, String>,
    generations: HashMap<String, u64>,
    next_generation: u64,
}

const EMBEDDED_SOURCES: &[(&str, &str)] = &[
    (
        "common-functions.h.glsl",
        include_str!("../shaders/common-functions.h.glsl"),
    ),
    (
        "common-functions.comp",
        include_str!("../shaders/common-functions.comp"),
    ),
    (
        "texture-coordinates.h.glsl",
        include_str!("../shaders/texture-coordinates.h.glsl"),
    ),
    (
        "texture-coordinates.comp",
        include_str!("../shaders/texture-coordinates.comp"),
    ),
    (
        "phase-functions.h.glsl",
        include_str!("../shaders/phase-functions.h.glsl"),
    ),
    (
        "transmittance-functions.h.glsl",
        include_str!("../shaders/transmittance-functions.h.glsl"),
    ),
    (
        "total-scattering-coefficient.h.glsl",
        include_str!("../shaders/total-scattering-coefficient.h.glsl"),
    ),
    (
        "transmittance-sampling.h.glsl",
        include_str!("../shaders/transmittance-sampling.h.glsl"),
    ),
    (
        "scattering-sampling.h.glsl",
        include_str!("../shaders/scattering-sampling.h.glsl"),
    ),
    (
        "compute-transmittance.comp",
        include_str!("../shaders/compute-transmittance.comp"),
    ),
    (
        "compute-direct-irradiance.comp",
        include_str!("../shaders/compute-direct-irradiance.comp"),
    ),
    (
        "compute-single-scattering.comp",
        include_str!("../shaders/compute-single-scattering.comp"),
    ),
    (
        "compute-scattering-density.comp",
        include_str!("../shaders/compute-scattering-density.comp"),
    ),
    (
        "compute-indirect-irradiance.comp",
        include_str!("../shaders/compute-indirect-irradiance.comp"),
    ),
    (
        "compute-multiple-scattering.comp",
        include_str!("../shaders/compute-multiple-scattering.comp"),
    ),
    (
        "copy-scattering-texture.comp",
        include_str!("../shaders/copy-scattering-texture.comp"),
    ),
];

impl Default for SourceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceTable {
    pub fn new() -> Self {
        Self {
            embedded: EMBEDDED_SOURCES.iter().copied().collect(),
            generated: HashMap::new(),
            generations: HashMap::new(),
            next_generation: 1,
        }
    }

    /// Current text of a logical file: the generated overlay when present,
    /// the embedded static source otherwise.
    pub fn source(&self, name: &str) -> Result<&str, ShaderIncludeError> {
        if let Some(src) = self.generated.get(name) {
            return Ok(src);
        }
        self.embedded
            .get(name)
            .copied()
            .ok_or_else(|| ShaderIncludeError::UnknownSource(name.to_owned()))
    }

    /// The pristine embedded source, bypassing any generated overlay; the
    /// token-specialization passes start from this.
    pub fn pristine(&self, name: &str) -> Result<&str, ShaderIncludeError> {
        self.embedded
            .get(name)
            .copied()
            .ok_or_else(|| ShaderIncludeError::UnknownSource(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.generated.contains_key(name) || self.embedded.contains_key(name)
    }

    /// Overwrite a virtual file. The new generation invalidates every
    /// compiled artifact derived from this name.
    pub fn set_virtual(&mut self, name: &str, source: String) {
        trace!("virtual source {} rewritten", name);
        self.generated.insert(name.to_owned(), source);
        self.generations
            .insert(name.to_owned(), self.next_generation);
        self.next_generation += 1;
    }

    /// Generation of a file: 0 for untouched embedded sources, otherwise
    /// the serial of the last overwrite.
    pub fn generation(&self, name: &str) -> u64 {
        self.generations.get(name).copied().unwrap_or(0)
    }
}
