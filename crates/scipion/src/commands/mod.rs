//! CLI command implementations.
//!
//! Handlers return `Ok(false)` when some requested plugin or binary could
//! not be handled; the process then exits with status 1 once the whole
//! batch is done.

pub mod ui;
mod binaries;
mod plugins;
mod update;
mod version;

pub use binaries::{install_bins, list_bins, uninstall_bins};
pub use plugins::{install_devel_plugins, install_plugins, list_plugins, uninstall_plugins, PluginRequest};
pub use update::update;

use indicatif::{ProgressBar, ProgressStyle};
use scipion_build::BuildError;
use scipion_diagnostics::ScipionError;
use scipion_plugin::PluginError;
use std::time::Duration;

/// Engine flags shared by the install commands.
#[derive(clap::Args, Debug, Clone)]
pub struct EngineFlags {
    /// Number of processors used to compile
    #[arg(short = 'j', default_value_t = 1)]
    pub jobs: usize,

    /// Print the commands without running them
    #[arg(long)]
    pub show: bool,

    /// Print the dependency tree instead of installing
    #[arg(long = "show-tree")]
    pub show_tree: bool,

    /// Print the dependency tree as a Graphviz graph
    #[arg(long)]
    pub dot: bool,
}

/// The report shown for a failed install step.
pub(crate) fn diagnose(err: PluginError) -> ScipionError {
    match err {
        PluginError::Build(err) => diagnose_build(err),
        PluginError::Registry(err) => ScipionError::network(err.to_string()),
        err @ PluginError::Manifest { .. } => ScipionError::manifest(err.to_string()),
        err => ScipionError::Generic(err.to_string()),
    }
}

pub(crate) fn diagnose_build(err: BuildError) -> ScipionError {
    match err {
        BuildError::MissingProgram(program) => ScipionError::missing_program(program),
        BuildError::MissingLibrary(library) => ScipionError::missing_library(library),
        BuildError::Cycle { target } => ScipionError::DependencyCycle { target },
        err => ScipionError::build(err.to_string()),
    }
}

/// Spinner shown while waiting on the network.
pub(crate) fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
