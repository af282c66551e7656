//! Error types for the target graph.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building or executing a target graph.
///
/// Graph construction errors (duplicate names, unknown dependencies) are
/// raised before any command runs.
#[derive(Error, Debug)]
pub enum BuildError {
    /// A target with the same name was already registered.
    #[error("Duplicated target '{0}'")]
    DuplicateTarget(String),

    /// A dependency references a target that was never registered.
    #[error("Dependency '{dep}' of target '{target}' does not exist")]
    UnknownDependency { target: String, dep: String },

    /// A requested target or alias source is not registered.
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    /// A command ran but did not produce one of its declared outputs.
    #[error("File or folder '{}' not found after running '{command}'", .path.display())]
    MissingOutput { path: PathBuf, command: String },

    /// The target depends on itself, directly or transitively.
    #[error("Cyclic dependency on {target}")]
    Cycle { target: String },

    /// A program needed to build a target is not on PATH.
    #[error("Cannot find necessary program: {0}")]
    MissingProgram(String),

    /// A native library needed to build a target was not found.
    #[error("Required library {0} was not found")]
    MissingLibrary(String),

    /// The package link could not be created or removed.
    #[error("Creating link {link}: {message}")]
    Link { link: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
