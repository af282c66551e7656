//! Error reports for the Scipion command line.
//!
//! Uses miette for rich error diagnostics with codes and help text.

// These fields are used by thiserror/miette derive macros
#![allow(unused_assignments)]

pub use miette::{Diagnostic, Report, Result};
use thiserror::Error;

/// A Scipion error with rich diagnostics.
#[derive(Error, Diagnostic, Debug)]
pub enum ScipionError {
    #[error("Installation failed: {message}")]
    #[diagnostic(
        code(scipion::build::failed),
        help("Run the same command again; steps whose outputs exist are skipped")
    )]
    BuildFailed { message: String },

    #[error("Cannot find necessary program: {program}")]
    #[diagnostic(
        code(scipion::build::missing_program),
        help("Install {program} and make sure it is on your PATH")
    )]
    MissingProgram { program: String },

    #[error("Required library {library} was not found")]
    #[diagnostic(
        code(scipion::build::missing_library),
        help("Install the development package of {library}, it must be visible to pkg-config")
    )]
    MissingLibrary { library: String },

    #[error("Cyclic dependency on {target}")]
    #[diagnostic(
        code(scipion::build::cycle),
        help("A plugin declares binaries that depend on each other")
    )]
    DependencyCycle { target: String },

    #[error("Invalid plugin binaries: {message}")]
    #[diagnostic(code(scipion::plugin::manifest))]
    InvalidManifest { message: String },

    #[error("Python interpreter problem: {message}")]
    #[diagnostic(
        code(scipion::platform::python),
        help("Set SCIPION_PYTHON, or `python` / `site_packages` in scipion.toml")
    )]
    Python { message: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(scipion::config::error))]
    Config { message: String },

    #[error("Network error: {message}")]
    #[diagnostic(
        code(scipion::network::error),
        help("Check your internet connection and try again")
    )]
    NetworkError { message: String },

    #[error("{0}")]
    #[diagnostic(code(scipion::generic))]
    Generic(String),
}

impl ScipionError {
    pub fn build(message: impl Into<String>) -> Self {
        Self::BuildFailed {
            message: message.into(),
        }
    }

    pub fn missing_program(program: impl Into<String>) -> Self {
        Self::MissingProgram {
            program: program.into(),
        }
    }

    pub fn missing_library(library: impl Into<String>) -> Self {
        Self::MissingLibrary {
            library: library.into(),
        }
    }

    pub fn manifest(message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            message: message.into(),
        }
    }

    pub fn python(message: impl Into<String>) -> Self {
        Self::Python {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }
}

/// Setup miette for pretty error output.
pub fn setup() {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))
    .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_messages() {
        let err = ScipionError::missing_program("cmake");
        assert_eq!(err.to_string(), "Cannot find necessary program: cmake");
        assert_eq!(err.code().unwrap().to_string(), "scipion::build::missing_program");
        assert_eq!(
            err.help().unwrap().to_string(),
            "Install cmake and make sure it is on your PATH"
        );

        let err = ScipionError::network("connection refused");
        assert_eq!(err.code().unwrap().to_string(), "scipion::network::error");
    }
}
