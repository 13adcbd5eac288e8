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

//! The atmosphere model: an ordered list of scatterer and absorber
//! species, each with an altitude-dependent number density and a spectral
//! cross-section, plus the wavelength schedule and table dimensions the
//! precompute pipeline works through.
mod description;
mod species;

pub use crate::{
    description::{AtmosphereDescription, ConfigInvalid},
    species::{Absorber, CrossSection, Scatterer},
};
