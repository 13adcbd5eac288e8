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
use thiserror::Error;

/// Cyclic or too-deep include graph, or a malformed directive.
#[derive(Debug, Error)]
pub enum ShaderIncludeError {
    #[error("{file}:{line}: syntax error in #include directive")]
    MalformedDirective { file: String, line: usize },
    #[error("{file}:{line}: file to include must have suffix \".h.glsl\"")]
    BadSuffix { file: String, line: usize },
    #[error("cyclic include of {name:?} via {chain}")]
    Cycle { name: String, chain: String },
    #[error("include recursion depth exceeded {max} via {chain}")]
    TooDeep { max: usize, chain: String },
    #[error("unknown shader source {0:?}")]
    UnknownSource(String),
}

/// Any failure on the way from assembled source to SPIR-V.
#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("shader include error: {0}")]
    Include(#[from] ShaderIncludeError),
    /// The GLSL front-end rejected the assembled source. The listing is
    /// the full translation unit with line numbers honoring embedded
    /// `#line` directives, so the failing generated expression can be
    /// located in its original file.
    #[error("failed to compile {name}:\n{messages}\nSource of the shader:\n{listing}")]
    Compile {
        name: String,
        messages: String,
        listing: String,
    },
    #[error("failed to link {name}: {message}")]
    Link { name: String, message: String },
}
