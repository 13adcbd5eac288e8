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
use crate::{error::ShaderIncludeError, source_table::SourceTable};
use regex::Regex;
use std::collections::HashSet;

pub const MAX_INCLUDE_DEPTH: usize = 50;
pub const HEADER_SUFFIX: &str = ".h.glsl";

fn include_pattern() -> Regex {
    Regex::new(r#"^#include "([^"]+)"$"#).expect("static pattern")
}

/// Splices `#include "<name>.h.glsl"` lines. `#line` markers are inserted
/// on both sides of every splice so the GPU front-end reports errors
/// against the original files. A header is spliced at most once per
/// resolver (the output is concatenated into a single translation unit,
/// where a second copy of a header's definitions would collide); repeats
/// are left as a comment. Cycles and chains deeper than
/// `MAX_INCLUDE_DEPTH` fail with `ShaderIncludeError` naming the chain.
pub struct Resolver<'a> {
    table: &'a SourceTable,
    pattern: Regex,
    spliced: HashSet<String>,
    header_number: usize,
    dependencies: Vec<(String, u64)>,
}

impl<'a> Resolver<'a> {
    pub fn new(table: &'a SourceTable) -> Self {
        Self {
            table,
            pattern: include_pattern(),
            spliced: HashSet::new(),
            header_number: 1,
            dependencies: Vec::new(),
        }
    }

    /// Every file consulted so far, with the table generation observed.
    pub fn dependencies(&self) -> &[(String, u64)] {
        &self.dependencies
    }

    pub fn resolve(&mut self, name: &str) -> Result<String, ShaderIncludeError> {
        let text = self.record(name)?;
        let mut out = String::with_capacity(text.len());
        let mut stack = vec![name.to_owned()];
        self.splice(&text, name, &mut stack, &mut out)?;
        Ok(out)
    }

    fn record(&mut self, name: &str) -> Result<String, ShaderIncludeError> {
        let text = self.table.source(name)?.to_owned();
        self.dependencies
            .push((name.to_owned(), self.table.generation(name)));
        Ok(text)
    }

    fn splice(
        &mut self,
        text: &str,
        filename: &str,
        stack: &mut Vec<String>,
        out: &mut String,
    ) -> Result<(), ShaderIncludeError> {
        for (index, line) in text.lines().enumerate() {
            let line_number = index + 1;
            let trimmed = line.trim();
            if !trimmed.starts_with("#include \"") {
                out.push_str(line);
                out.push('\n');
                continue;
            }
            let captures = self.pattern.captures(trimmed).ok_or_else(|| {
                ShaderIncludeError::MalformedDirective {
                    file: filename.to_owned(),
                    line: line_number,
                }
            })?;
            let include_name = captures.get(1).expect("one capture group").as_str();
            if !include_name.ends_with(HEADER_SUFFIX) {
                return Err(ShaderIncludeError::BadSuffix {
                    file: filename.to_owned(),
                    line: line_number,
                });
            }
            if stack.iter().any(|f| f == include_name) {
                return Err(ShaderIncludeError::Cycle {
                    name: include_name.to_owned(),
                    chain: stack.join(" -> "),
                });
            }
            if stack.len() > MAX_INCLUDE_DEPTH {
                return Err(ShaderIncludeError::TooDeep {
                    max: MAX_INCLUDE_DEPTH,
                    chain: stack.join(" -> "),
                });
            }
            if self.spliced.contains(include_name) {
                out.push_str(&format!("// #include \"{}\" spliced above\n", include_name));
                continue;
            }
            let header = self.record(include_name)?;
            out.push_str(&format!(
                "#line 1 {} // {}\n",
                self.header_number, include_name
            ));
            self.header_number += 1;
            stack.push(include_name.to_owned());
            self.splice(&header, include_name, stack, out)?;
            stack.pop();
            self.spliced.insert(include_name.to_owned());
            out.push_str(&format!("#line {} 0 // {}\n", line_number + 1, filename));
        }
        Ok(())
    }
}

/// Convenience wrapper: resolve one file with a fresh resolver.
pub fn resolve_includes(table: &SourceTable, name: &str) -> Result<String, ShaderIncludeError> {
    Resolver::new(table).resolve(name)
}
