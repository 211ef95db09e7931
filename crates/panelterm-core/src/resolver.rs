//! Tool-path resolution seam
//!
//! Binary discovery and download belong to a separate subsystem; the
//! multiplexer only needs an absolute path for the program it is asked to
//! run. `PathResolver` is the default lookup through the environment.

use std::path::{Path, PathBuf};

use crate::error::{MuxError, Result};

/// Resolves a program name to an absolute executable path.
pub trait ToolResolver: Send + Sync {
    fn resolve(&self, program: &str) -> Result<PathBuf>;
}

/// Default resolver: explicit paths pass through, bare names go through
/// the `PATH` lookup.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathResolver;

impl ToolResolver for PathResolver {
    fn resolve(&self, program: &str) -> Result<PathBuf> {
        let candidate = Path::new(program);
        if candidate.components().count() > 1 {
            if candidate.exists() {
                return Ok(candidate.to_path_buf());
            }
            return Err(MuxError::ToolNotFound(program.to_string()));
        }

        which::which(program).map_err(|_| MuxError::ToolNotFound(program.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_common_shell() {
        let resolver = PathResolver;
        let path = resolver.resolve("sh").unwrap();
        assert!(path.is_absolute());
    }

    #[test]
    fn missing_tool_is_an_error() {
        let resolver = PathResolver;
        let err = resolver.resolve("panelterm-no-such-binary").unwrap_err();
        assert!(matches!(err, MuxError::ToolNotFound(name) if name.contains("no-such-binary")));
    }

    #[test]
    fn explicit_path_passes_through() {
        let resolver = PathResolver;
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tool");
        std::fs::write(&file, b"#!/bin/sh\n").unwrap();
        let resolved = resolver.resolve(file.to_str().unwrap()).unwrap();
        assert_eq!(resolved, file);
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let resolver = PathResolver;
        let err = resolver.resolve("/nonexistent/dir/tool").unwrap_err();
        assert!(matches!(err, MuxError::ToolNotFound(_)));
    }
}
