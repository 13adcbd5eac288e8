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

//! Kernel program assembly and compilation.
//!
//! A program is assembled as a single translation unit: the companion
//! sources discovered through `#include` scanning (definitions) are
//! concatenated dependencies-first ahead of the main kernel source, then
//! includes are spliced and the result is run through the GLSL front-end
//! wgpu itself embeds. Parsing failure is a compile error carrying a
//! numbered listing of the assembled source; validation or SPIR-V
//! emission failure is a link error. Compiled programs are cached by main
//! logical filename and evicted when any source they were assembled from
//! is rewritten.
use crate::{
    error::{ShaderError, ShaderIncludeError},
    include::{Resolver, HEADER_SUFFIX, MAX_INCLUDE_DEPTH},
    source_table::SourceTable,
    CONSTANTS_HEADER,
};
use log::{debug, trace};
use regex::Regex;
use std::collections::{HashMap, HashSet};

const TRANSLATION_UNIT_PRELUDE: &str = "#version 450 core\n";

#[derive(Debug)]
pub struct CompiledProgram {
    pub spirv: Vec<u32>,
    pub translation_unit: String,
    dependencies: Vec<(String, u64)>,
}

#[derive(Default)]
pub struct KernelCache {
    programs: HashMap<String, CompiledProgram>,
}

impl KernelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every compiled program; called at the top of each wavelength
    /// set before the virtual sources are regenerated.
    pub fn clear(&mut self) {
        self.programs.clear();
    }

    pub fn get_or_compile(
        &mut self,
        table: &SourceTable,
        main: &str,
    ) -> Result<&CompiledProgram, ShaderError> {
        let stale = match self.programs.get(main) {
            Some(program) => program
                .dependencies
                .iter()
                .any(|(name, generation)| table.generation(name) != *generation),
            None => true,
        };
        if stale {
            debug!("compiling kernel program {}", main);
            let program = compile_program(table, main)?;
            self.programs.insert(main.to_owned(), program);
        } else {
            trace!("kernel program {} reused from cache", main);
        }
        Ok(self.programs.get(main).expect("inserted above"))
    }
}

/// Companion sources to concatenate with `main`, dependencies first: for
/// every included `<name>.h.glsl` whose `<name>.comp` exists in the table,
/// that companion and, recursively, its own companions. The constants
/// header has no companion source.
pub fn link_set(table: &SourceTable, main: &str) -> Result<Vec<String>, ShaderIncludeError> {
    let mut visited = HashSet::new();
    let mut chain = vec![main.to_owned()];
    let mut ordered = Vec::new();
    collect_companions(table, main, main, &mut visited, &mut chain, &mut ordered)?;
    Ok(ordered)
}

fn collect_companions(
    table: &SourceTable,
    filename: &str,
    root: &str,
    visited: &mut HashSet<String>,
    chain: &mut Vec<String>,
    ordered: &mut Vec<String>,
) -> Result<(), ShaderIncludeError> {
    if chain.len() > MAX_INCLUDE_DEPTH {
        return Err(ShaderIncludeError::TooDeep {
            max: MAX_INCLUDE_DEPTH,
            chain: chain.join(" -> "),
        });
    }
    let pattern = Regex::new(r#"^#include "([^"]+)\.h\.glsl"$"#).expect("static pattern");
    let source = table.source(filename)?.to_owned();
    for line in source.lines() {
        let captures = match pattern.captures(line.trim()) {
            Some(captures) => captures,
            None => continue,
        };
        let base = captures.get(1).expect("one capture group").as_str();
        let header = format!("{}{}", base, HEADER_SUFFIX);
        if header == CONSTANTS_HEADER {
            continue;
        }
        let companion = format!("{}.comp", base);
        if companion == root || !table.contains(&companion) || visited.contains(&companion) {
            continue;
        }
        visited.insert(companion.clone());
        chain.push(companion.clone());
        collect_companions(table, &companion, root, visited, chain, ordered)?;
        chain.pop();
        ordered.push(companion);
    }
    Ok(())
}

/// Concatenate the program's translation unit and splice includes. Every
/// file section is delimited by a `#line` reset so compiler diagnostics
/// and the failure listing track the original files.
pub fn assemble_program(
    table: &SourceTable,
    main: &str,
) -> Result<(String, Vec<(String, u64)>), ShaderError> {
    let companions = link_set(table, main)?;
    let mut resolver = Resolver::new(table);
    let mut unit = String::from(TRANSLATION_UNIT_PRELUDE);
    for name in &companions {
        unit.push_str(&format!("#line 1 0 // {}\n", name));
        unit.push_str(&resolver.resolve(name)?);
    }
    unit.push_str(&format!("#line 1 0 // {}\n", main));
    unit.push_str(&resolver.resolve(main)?);
    Ok((unit, resolver.dependencies().to_vec()))
}

pub fn compile_program(table: &SourceTable, main: &str) -> Result<CompiledProgram, ShaderError> {
    let (unit, dependencies) = assemble_program(table, main)?;

    let mut parser = naga::front::glsl::Parser::default();
    let options = naga::front::glsl::Options {
        stage: naga::ShaderStage::Compute,
        defines: Default::default(),
    };
    let module = match parser.parse(&options, &unit) {
        Ok(module) => module,
        Err(errors) => {
            let messages = errors
                .iter()
                .map(|e| format!("{:?}", e))
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ShaderError::Compile {
                name: main.to_owned(),
                messages,
                listing: numbered_listing(&unit),
            });
        }
    };

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| ShaderError::Link {
        name: main.to_owned(),
        message: format!("{:?}", e),
    })?;

    let spirv = naga::back::spv::write_vec(
        &module,
        &info,
        &naga::back::spv::Options::default(),
        None,
    )
    .map_err(|e| ShaderError::Link {
        name: main.to_owned(),
        message: e.to_string(),
    })?;

    Ok(CompiledProgram {
        spirv,
        translation_unit: unit,
        dependencies,
    })
}

/// Number the lines of an assembled source the way the GPU front-end
/// counts them: `#line N` directives reset the counter so each fragment
/// is numbered against its original file.
pub fn numbered_listing(src: &str) -> String {
    let line_count = src.lines().count().max(1);
    let width = line_count.to_string().len();
    let marker = Regex::new(r"^\s*#\s*line\s+([0-9]+)\b").expect("static pattern");
    let mut out = String::new();
    let mut number = 1usize;
    for line in src.lines() {
        out.push_str(&format!("{:>width$} {}\n", number, line, width = width));
        if let Some(captures) = marker.captures(line) {
            number = captures[1].parse::<usize>().unwrap_or(1).saturating_sub(1);
        }
        number += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIVIAL_KERNEL: &str = "\
layout(local_size_x = 8, local_size_y = 8, local_size_z = 1) in;\n\
layout(binding = 1, rgba32f) writeonly uniform image2D outputTexture;\n\
void main()\n{\n    imageStore(outputTexture, ivec2(gl_GlobalInvocationID.xy), vec4(brightness()));\n}\n";

    fn trivial_table() -> SourceTable {
        let mut table = SourceTable::new();
        table.set_virtual("brightness.comp", "float brightness() { return 0.5; }\n".to_owned());
        table.set_virtual(
            "trivial.comp",
            format!("#include \"brightness.h.glsl\"\n{}", TRIVIAL_KERNEL),
        );
        table.set_virtual("brightness.h.glsl", "// float brightness()\n".to_owned());
        table
    }

    #[test]
    fn link_set_discovers_companions_dependencies_first() {
        let mut table = SourceTable::new();
        table.set_virtual("a.h.glsl", "// a\n".to_owned());
        table.set_virtual("b.h.glsl", "// b\n".to_owned());
        table.set_virtual("a.comp", "#include \"b.h.glsl\"\nfloat a() { return b(); }\n".to_owned());
        table.set_virtual("b.comp", "float b() { return 1.0; }\n".to_owned());
        table.set_virtual(
            "main.comp",
            "#include \"const.h.glsl\"\n#include \"a.h.glsl\"\nvoid main() {}\n".to_owned(),
        );
        table.set_virtual(CONSTANTS_HEADER, "// constants\n".to_owned());
        let set = link_set(&table, "main.comp").unwrap();
        // b.comp is a's dependency and comes first; the constants header
        // contributes no companion.
        assert_eq!(set, vec!["b.comp".to_owned(), "a.comp".to_owned()]);
    }

    #[test]
    fn headers_without_companions_are_skipped() {
        let mut table = SourceTable::new();
        table.set_virtual("lonely.h.glsl", "// nothing\n".to_owned());
        table.set_virtual(
            "main.comp",
            "#include \"lonely.h.glsl\"\nvoid main() {}\n".to_owned(),
        );
        assert!(link_set(&table, "main.comp").unwrap().is_empty());
    }

    #[test]
    fn trivial_program_compiles_to_spirv() {
        let table = trivial_table();
        let mut cache = KernelCache::new();
        let program = cache.get_or_compile(&table, "trivial.comp").unwrap();
        assert!(!program.spirv.is_empty());
        // SPIR-V magic number leads the module.
        assert_eq!(program.spirv[0], 0x0723_0203);
        assert!(program.translation_unit.contains("float brightness()"));
    }

    #[test]
    fn cache_reuses_until_a_source_is_rewritten() {
        let mut table = trivial_table();
        let mut cache = KernelCache::new();
        cache.get_or_compile(&table, "trivial.comp").unwrap();

        // Unrelated rewrite: still cached.
        table.set_virtual("unrelated.comp", "float unrelated() { return 0.0; }\n".to_owned());
        let unit_before = cache
            .get_or_compile(&table, "trivial.comp")
            .unwrap()
            .translation_unit
            .clone();

        // Rewriting a dependency forces recompilation against the new text.
        table.set_virtual("brightness.comp", "float brightness() { return 1.0; }\n".to_owned());
        let unit_after = cache
            .get_or_compile(&table, "trivial.comp")
            .unwrap()
            .translation_unit
            .clone();
        assert_ne!(unit_before, unit_after);
        assert!(unit_after.contains("return 1.0;"));
    }

    #[test]
    fn parse_failure_is_a_compile_error_with_listing() {
        let mut table = SourceTable::new();
        table.set_virtual("broken.comp", "void main() { this is not glsl }\n".to_owned());
        let mut cache = KernelCache::new();
        let err = cache.get_or_compile(&table, "broken.comp").unwrap_err();
        match err {
            ShaderError::Compile { name, listing, .. } => {
                assert_eq!(name, "broken.comp");
                assert!(listing.contains("this is not glsl"));
                assert!(listing.lines().next().unwrap().trim_start().starts_with('1'));
            }
            other => panic!("expected a compile error, got {:?}", other),
        }
    }

    #[test]
    fn listing_honors_line_directives() {
        let src = "first\n#line 10 0 // other\nafter-directive\nnext\n";
        let listing = numbered_listing(src);
        let lines: Vec<&str> = listing.lines().collect();
        assert!(lines[0].starts_with("1 "));
        assert!(lines[1].starts_with("2 "));
        // The directive resets the counter: the following line is 10.
        assert!(lines[2].trim_start().starts_with("10 "));
        assert!(lines[3].trim_start().starts_with("11 "));
    }
}
