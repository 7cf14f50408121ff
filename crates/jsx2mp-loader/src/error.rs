use std::path::{Path, PathBuf};

use crate::{CompileError, OutputError, PlatformDescriptor, ResolveError, StyleError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    ResolveError(#[from] ResolveError),
    /// The compiler error as raised, kept intact in debug mode.
    #[error("{0}")]
    CompileError(#[from] CompileError),
    /// A sanitized compile failure message.
    #[error("{0}")]
    CompileFailed(String),
    #[error("{0}")]
    StyleError(#[from] StyleError),
    #[error("{0}")]
    OutputError(#[from] OutputError),
    #[error("failed to create output directory `{}`: {}", .0.display(), .1)]
    OutputDir(PathBuf, #[source] std::io::Error),
    #[error("failed to read `{}`: {}", .0.display(), .1)]
    ReadSource(PathBuf, #[source] std::io::Error),
}

/// The log line announcing that an app failed to compile.
pub fn failure_banner(platform: &PlatformDescriptor, resource: &Path) -> String {
    format!(
        "[{}] Error occured when handling App {}",
        platform.name,
        resource.display()
    )
}
