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

//! Generators for the virtual kernel sources: the constants header, the
//! per-species density and phase functions, the per-wavelength-set
//! transmittance functions with baked cross-sections, and the token
//! substitution that specializes kernels per scattering order.
use atmosphere::AtmosphereDescription;
use regex::Regex;
use std::fmt::Write;

/// A float literal that GLSL parses back to the same value.
pub fn glsl_float(v: f64) -> String {
    format!("{:e}", v)
}

pub fn glsl_vec4(v: [f64; 4]) -> String {
    format!(
        "vec4({}, {}, {}, {})",
        glsl_float(v[0]),
        glsl_float(v[1]),
        glsl_float(v[2]),
        glsl_float(v[3])
    )
}

/// Replace every whole-word occurrence of `token`. Used to bake the
/// scattering order and the ground-only/blend flags into kernel source so
/// the GPU compiler sees constants and eliminates the dead branches.
pub fn replace_token(src: &str, token: &str, replacement: &str) -> String {
    let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(token))).expect("valid token");
    pattern.replace_all(src, replacement).into_owned()
}

/// The constants header, `const.h.glsl`. Regenerated whenever the
/// atmosphere geometry or table dimensions change; once per run in
/// practice.
pub fn constants_header(atm: &AtmosphereDescription) -> String {
    let mut src = String::new();
    writeln!(
        src,
        "const float earthRadius = {}; // metres",
        glsl_float(atm.earth_radius_m)
    )
    .ok();
    writeln!(
        src,
        "const float atmosphereHeight = {}; // metres",
        glsl_float(atm.atmosphere_height_m)
    )
    .ok();
    writeln!(
        src,
        "const float sunAngularRadius = {};",
        glsl_float(atm.sun_angular_radius_rad)
    )
    .ok();
    writeln!(src, "const float PI = 3.1415926535897932;").ok();
    writeln!(
        src,
        "const vec4 scatteringTextureSize = vec4({}.0, {}.0, {}.0, {}.0);",
        atm.scattering_texture_size[0],
        atm.scattering_texture_size[1],
        atm.scattering_texture_size[2],
        atm.scattering_texture_size[3]
    )
    .ok();
    writeln!(
        src,
        "const vec2 transmittanceTextureSize = vec2({}.0, {}.0);",
        atm.transmittance_texture_size[0], atm.transmittance_texture_size[1]
    )
    .ok();
    writeln!(
        src,
        "const vec2 irradianceTextureSize = vec2({}.0, {}.0);",
        atm.irradiance_texture_size[0], atm.irradiance_texture_size[1]
    )
    .ok();
    writeln!(
        src,
        "const int radialIntegrationPoints = {};",
        atm.radial_integration_points
    )
    .ok();
    writeln!(
        src,
        "const int numTransmittanceIntegrationPoints = {};",
        atm.transmittance_integration_points
    )
    .ok();
    writeln!(
        src,
        "const int angularIntegrationPoints = {};",
        atm.angular_integration_points
    )
    .ok();
    src
}

/// `densities.h.glsl`: documents the generated symbols. The assembled
/// translation unit orders the generated definitions ahead of their uses,
/// so the header carries no code of its own.
pub fn densities_header(atm: &AtmosphereDescription) -> String {
    let mut src = String::from("// Generated in densities.comp:\n");
    for scatterer in &atm.scatterers {
        writeln!(
            src,
            "//   float scattererNumberDensity_{}(float altitude)",
            scatterer.name
        )
        .ok();
    }
    for absorber in &atm.absorbers {
        writeln!(
            src,
            "//   float absorberNumberDensity_{}(float altitude)",
            absorber.name
        )
        .ok();
    }
    src
}

fn density_functions(atm: &AtmosphereDescription) -> String {
    let mut src = String::new();
    for scatterer in &atm.scatterers {
        writeln!(
            src,
            "float scattererNumberDensity_{}(float altitude)\n{{\n{}\n}}",
            scatterer.name,
            scatterer.number_density.trim()
        )
        .ok();
    }
    for absorber in &atm.absorbers {
        writeln!(
            src,
            "float absorberNumberDensity_{}(float altitude)\n{{\n{}\n}}",
            absorber.name,
            absorber.number_density.trim()
        )
        .ok();
    }
    src
}

const DENSITIES_HEAD: &str = "#include \"const.h.glsl\"\n#include \"common-functions.h.glsl\"\n\n";

/// `densities.comp` as used by every pass that only needs the per-species
/// number densities.
pub fn densities_functions_src(atm: &AtmosphereDescription) -> String {
    format!("{}{}", DENSITIES_HEAD, density_functions(atm))
}

/// `densities.comp` specialized for the single-scattering pass of one
/// scatterer: adds the `scattererDensity`/`scatteringCrossSection` pair
/// the kernel integrates, with the set's cross-section baked in.
pub fn single_scattering_densities_src(
    atm: &AtmosphereDescription,
    scatterer_index: usize,
    lambdas: [f64; 4],
) -> String {
    let scatterer = &atm.scatterers[scatterer_index];
    let mut src = densities_functions_src(atm);
    writeln!(
        src,
        "float scattererDensity(float altitude) {{ return scattererNumberDensity_{}(altitude); }}",
        scatterer.name
    )
    .ok();
    writeln!(
        src,
        "vec4 scatteringCrossSection() {{ return {}; }}",
        glsl_vec4(scatterer.cross_section.sample(lambdas))
    )
    .ok();
    src
}

const OPTICAL_DEPTH_TEMPLATE: &str = r#"
vec4 opticalDepthToAtmosphereBorder_##agentSpecies(float altitude, float cosZenithAngle, vec4 crossSection)
{
    float integrationInterval = distanceToAtmosphereBorder(cosZenithAngle, altitude);
    float dl = integrationInterval / float(numTransmittanceIntegrationPoints - 1);
    float endAltitude = altitudeAfterDistance(cosZenithAngle, altitude, integrationInterval);
    /* Trapezoid rule on a uniform grid: f0/2 + f1 + ... + f(N-2) + f(N-1)/2. */
    float densitySum = (agent##NumberDensity_##agentSpecies(altitude) +
                        agent##NumberDensity_##agentSpecies(endAltitude)) / 2.0;
    for (int n = 1; n < numTransmittanceIntegrationPoints - 1; ++n)
    {
        float dist = float(n) * dl;
        densitySum += agent##NumberDensity_##agentSpecies(altitudeAfterDistance(cosZenithAngle, altitude, dist));
    }
    return densitySum * dl * crossSection;
}
"#;

/// `transmittance-functions.comp`: one optical-depth integrator per
/// species, expanded from the template above, summed with the species'
/// cross-sections for this wavelength set compiled in as literals.
pub fn transmittance_functions_src(atm: &AtmosphereDescription, lambdas: [f64; 4]) -> String {
    let mut src = String::from(
        "#include \"const.h.glsl\"\n#include \"common-functions.h.glsl\"\n#include \"densities.h.glsl\"\n",
    );
    let mut compute = String::from(
        "\n// Assumes the ray does not intersect the ground.\n\
         vec4 computeTransmittanceToAtmosphereBorder(float cosZenithAngle, float altitude)\n\
         {\n    vec4 depth = vec4(0.0)\n",
    );
    for scatterer in &atm.scatterers {
        src.push_str(
            &OPTICAL_DEPTH_TEMPLATE
                .replace("##agentSpecies", &scatterer.name)
                .replace("agent##", "scatterer"),
        );
        writeln!(
            compute,
            "        + opticalDepthToAtmosphereBorder_{}(altitude, cosZenithAngle, {})",
            scatterer.name,
            glsl_vec4(scatterer.cross_section.sample(lambdas))
        )
        .ok();
    }
    for absorber in &atm.absorbers {
        src.push_str(
            &OPTICAL_DEPTH_TEMPLATE
                .replace("##agentSpecies", &absorber.name)
                .replace("agent##", "absorber"),
        );
        writeln!(
            compute,
            "        + opticalDepthToAtmosphereBorder_{}(altitude, cosZenithAngle, {})",
            absorber.name,
            glsl_vec4(absorber.cross_section.sample(lambdas))
        )
        .ok();
    }
    compute.push_str("        ;\n    return exp(-depth);\n}\n");
    src.push_str(&compute);
    src
}

const PHASE_HEAD: &str = "#include \"const.h.glsl\"\n#include \"common-functions.h.glsl\"\n\n";

fn phase_function_definitions(atm: &AtmosphereDescription) -> String {
    let mut src = String::new();
    for scatterer in &atm.scatterers {
        writeln!(
            src,
            "vec4 phaseFunction_{}(float dotViewSun)\n{{\n{}\n}}",
            scatterer.name,
            scatterer.phase_function.trim()
        )
        .ok();
    }
    src
}

/// `phase-functions.comp` with `currentPhaseFunction` forwarding to the
/// named scatterer.
pub fn phase_functions_src(atm: &AtmosphereDescription, scatterer_index: usize) -> String {
    let scatterer = &atm.scatterers[scatterer_index];
    format!(
        "{}{}vec4 currentPhaseFunction(float dotViewSun) {{ return phaseFunction_{}(dotViewSun); }}\n",
        PHASE_HEAD,
        phase_function_definitions(atm),
        scatterer.name
    )
}

/// `phase-functions.comp` for the ground-only scattering-density pass.
/// The stub keeps the assembled unit self-contained; calls to it are
/// statically unreachable once RADIATION_IS_FROM_GROUND_ONLY is true.
pub fn phase_functions_ground_stub_src(atm: &AtmosphereDescription) -> String {
    format!(
        "{}{}vec4 currentPhaseFunction(float dotViewSun) {{ return vec4(3.4028235e38); }}\n",
        PHASE_HEAD,
        phase_function_definitions(atm)
    )
}

/// `total-scattering-coefficient.comp`: the source-term kernel multiplies
/// incident radiance by this sum over scatterers.
pub fn total_scattering_coefficient_src(atm: &AtmosphereDescription, lambdas: [f64; 4]) -> String {
    let mut src = String::from(
        "#include \"const.h.glsl\"\n#include \"common-functions.h.glsl\"\n#include \"densities.h.glsl\"\n#include \"phase-functions.h.glsl\"\n\n",
    );
    src.push_str(
        "vec4 totalScatteringCoefficient(float altitude, float scatteringAngleCosine)\n{\n    return vec4(0.0)\n",
    );
    for scatterer in &atm.scatterers {
        writeln!(
            src,
            "        + {} * scattererNumberDensity_{}(altitude) * phaseFunction_{}(scatteringAngleCosine)",
            glsl_vec4(scatterer.cross_section.sample(lambdas)),
            scatterer.name,
            scatterer.name
        )
        .ok();
    }
    src.push_str("        ;\n}\n");
    src
}

#[cfg(test)]
mod tests {
    use super::*;
    use atmosphere::{Absorber, CrossSection, Scatterer};

    fn two_species() -> AtmosphereDescription {
        AtmosphereDescription {
            earth_radius_m: 6.371e6,
            atmosphere_height_m: 120e3,
            sun_angular_radius_rad: 0.004675,
            scatterers: vec![
                Scatterer {
                    name: "rayleigh".to_owned(),
                    number_density: "return 2.68e25 * exp(-altitude / 8000.0);".to_owned(),
                    cross_section: CrossSection::PowerLaw {
                        wavelength_nm: 550.0,
                        cross_section_m2: 2.0e-31,
                        angstrom_exponent: 4.0,
                    },
                    phase_function: "return vec4(3.0 / (16.0 * PI) * (1.0 + sqr(dotViewSun)));"
                        .to_owned(),
                },
                Scatterer {
                    name: "mie".to_owned(),
                    number_density: "return 1.0e8 * exp(-altitude / 1200.0);".to_owned(),
                    cross_section: CrossSection::PowerLaw {
                        wavelength_nm: 550.0,
                        cross_section_m2: 2.0e-14,
                        angstrom_exponent: 0.0,
                    },
                    phase_function: "return vec4(1.0 / (4.0 * PI));".to_owned(),
                },
            ],
            absorbers: vec![Absorber {
                name: "ozone".to_owned(),
                number_density: "return 3.0e18 * exp(-sqr((altitude - 25000.0) / 15000.0));"
                    .to_owned(),
                cross_section: CrossSection::Spectrum {
                    wavelengths_nm: vec![440.0, 550.0, 680.0],
                    cross_sections_m2: vec![1.2e-25, 3.0e-25, 1.5e-25],
                },
            }],
            wavelength_sets: vec![[440.0, 550.0, 610.0, 680.0]],
            solar_irradiance_at_toa: vec![[1.9, 1.9, 1.8, 1.5]],
            ground_albedo: vec![],
            scattering_orders_to_compute: 4,
            scattering_texture_size: [8, 4, 32, 8],
            transmittance_texture_size: [64, 32],
            irradiance_texture_size: [16, 8],
            radial_integration_points: 16,
            transmittance_integration_points: 32,
            angular_integration_points: 16,
            save_result_as_radiance: false,
        }
    }

    #[test]
    fn constants_header_carries_geometry_and_sizes() {
        let src = constants_header(&two_species());
        assert!(src.contains("const float earthRadius = 6.371e6;"));
        assert!(src.contains("scatteringTextureSize = vec4(8.0, 4.0, 32.0, 8.0);"));
        assert!(src.contains("const int numTransmittanceIntegrationPoints = 32;"));
    }

    #[test]
    fn density_functions_follow_declaration_order() {
        let src = densities_functions_src(&two_species());
        let rayleigh = src.find("scattererNumberDensity_rayleigh").unwrap();
        let mie = src.find("scattererNumberDensity_mie").unwrap();
        let ozone = src.find("absorberNumberDensity_ozone").unwrap();
        assert!(rayleigh < mie && mie < ozone);
        // The generic variant does not pick a species.
        assert!(!src.contains("float scattererDensity(float altitude)"));
    }

    #[test]
    fn single_scattering_densities_bake_the_species() {
        let atm = two_species();
        let src = single_scattering_densities_src(&atm, 1, [440.0, 550.0, 610.0, 680.0]);
        assert!(src.contains(
            "float scattererDensity(float altitude) { return scattererNumberDensity_mie(altitude); }"
        ));
        // Flat Angstrom exponent: the same literal for every component.
        assert!(src.contains("vec4 scatteringCrossSection() { return vec4(2e-14, 2e-14, 2e-14, 2e-14); }"));
    }

    #[test]
    fn transmittance_template_tokens_are_fully_expanded() {
        let atm = two_species();
        let src = transmittance_functions_src(&atm, [440.0, 550.0, 610.0, 680.0]);
        assert!(!src.contains("agent##"));
        assert!(!src.contains("##agentSpecies"));
        assert!(src.contains("opticalDepthToAtmosphereBorder_rayleigh"));
        assert!(src.contains("scattererNumberDensity_rayleigh(altitude)"));
        assert!(src.contains("absorberNumberDensity_ozone(altitude)"));
        assert!(src.contains("return exp(-depth);"));
        // Cross sections are literals, not uniforms: check the sampled
        // Rayleigh quartic at 550nm.
        assert!(src.contains("2e-31"));
    }

    #[test]
    fn phase_dispatcher_specializes_and_stubs() {
        let atm = two_species();
        let specialized = phase_functions_src(&atm, 0);
        assert!(specialized.contains("return phaseFunction_rayleigh(dotViewSun);"));
        assert!(specialized.contains("vec4 phaseFunction_mie(float dotViewSun)"));
        let stub = phase_functions_ground_stub_src(&atm);
        assert!(stub.contains("return vec4(3.4028235e38);"));
    }

    #[test]
    fn total_scattering_sums_scatterers_only() {
        let atm = two_species();
        let src = total_scattering_coefficient_src(&atm, [440.0, 550.0, 610.0, 680.0]);
        assert!(src.contains("scattererNumberDensity_rayleigh(altitude) * phaseFunction_rayleigh"));
        assert!(src.contains("scattererNumberDensity_mie(altitude) * phaseFunction_mie"));
        assert!(!src.contains("ozone"));
    }

    #[test]
    fn token_replacement_is_word_bounded() {
        let src = "int a = SCATTERING_ORDER; int b = SCATTERING_ORDER_MAX;";
        let out = replace_token(src, "SCATTERING_ORDER", "3");
        assert_eq!(out, "int a = 3; int b = SCATTERING_ORDER_MAX;");
    }

    #[test]
    fn float_literals_round_trip() {
        assert_eq!(glsl_float(0.0), "0e0");
        assert_eq!(glsl_float(5.8e-6), "5.8e-6");
        let parsed: f64 = glsl_float(1.0 / 3.0).parse().unwrap();
        assert_eq!(parsed, 1.0 / 3.0);
    }
}
