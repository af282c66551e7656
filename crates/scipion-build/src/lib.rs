//! Target graph engine for installing Scipion binaries.
//!
//! An [`Environment`] holds named [`Target`]s, each an ordered list of
//! [`Command`]s declaring the files they produce. Executing the environment
//! runs the requested (or default) targets after their dependencies. A
//! command whose declared outputs already exist is skipped, so an
//! interrupted install resumes where it stopped.
//!
//! The builders on [`Environment`] cover the usual shapes of a binary:
//! autotools/cmake libraries, pip modules and versioned packages linked
//! into the shared binaries folder.

pub mod command;
pub mod command_def;
pub mod environment;
pub mod error;
pub mod layout;
pub mod link;
pub mod target;

pub use command::{Command, CommandStatus, Step, StepFn};
pub use command_def::{CommandDef, CondaCommandDef};
pub use environment::{
    DownloadOptions, EnvOptions, Environment, LibraryOptions, PackageEntry, PackageOptions,
    PipModuleOptions, VOID_TGZ,
};
pub use error::BuildError;
pub use layout::Layout;
pub use link::{create_package_link, remove_package};
pub use target::Target;
