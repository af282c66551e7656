//! Named build nodes.

use crate::{BuildError, Command};
use console::style;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// A named node of the graph: ordered commands plus dependencies.
///
/// Commands marked final decide whether the whole target can be skipped:
/// when all their outputs exist the target is already installed.
#[derive(Debug, Clone)]
pub struct Target {
    name: String,
    default: bool,
    always: bool,
    commands: Vec<Command>,
    finals: Vec<usize>,
    deps: Vec<String>,
    build_path: Option<PathBuf>,
    target_path: Option<PathBuf>,
}

impl Target {
    pub fn new(name: impl Into<String>, default: bool) -> Self {
        Self {
            name: name.into(),
            default,
            always: false,
            commands: Vec::new(),
            finals: Vec::new(),
            deps: Vec::new(),
            build_path: None,
            target_path: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_default(&self) -> bool {
        self.default
    }

    pub fn set_default(&mut self, default: bool) {
        self.default = default;
    }

    pub fn is_always(&self) -> bool {
        self.always
    }

    pub fn set_always(&mut self, always: bool) {
        self.always = always;
    }

    pub fn add_command(&mut self, cmd: Command) -> &mut Self {
        self.commands.push(cmd);
        self
    }

    /// Add a command whose outputs mark the target as installed.
    pub fn add_final_command(&mut self, cmd: Command) -> &mut Self {
        self.finals.push(self.commands.len());
        self.commands.push(cmd);
        self
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn final_commands(&self) -> impl Iterator<Item = &Command> {
        self.finals.iter().map(|&i| &self.commands[i])
    }

    /// Dependency names, checked by the environment on registration.
    pub fn deps(&self) -> &[String] {
        &self.deps
    }

    pub(crate) fn push_dep(&mut self, dep: String) {
        if !self.deps.contains(&dep) {
            self.deps.push(dep);
        }
    }

    /// Folder where the sources are extracted, for download targets.
    pub fn build_path(&self) -> Option<&Path> {
        self.build_path.as_deref()
    }

    /// Folder the package outputs are relative to, for download targets.
    pub fn target_path(&self) -> Option<&Path> {
        self.target_path.as_deref()
    }

    pub(crate) fn set_paths(&mut self, build_path: PathBuf, target_path: PathBuf) {
        self.build_path = Some(build_path);
        self.target_path = Some(target_path);
    }

    /// True when every final command has its outputs in place.
    ///
    /// A target without final commands is never considered installed.
    pub fn exists_all(&self) -> bool {
        !self.finals.is_empty() && self.final_commands().all(Command::exists_all)
    }

    /// Run all commands in order unless the target is already installed.
    pub fn execute(&self, show_only: bool) -> Result<(), BuildError> {
        let start = Instant::now();

        println!("{}", style(format!("Installing {} ...", self.name)).green());
        if !self.always && self.exists_all() {
            println!("  All targets exist, skipping.");
        } else {
            for cmd in &self.commands {
                cmd.execute(show_only)?;
            }
        }

        if !show_only {
            println!("{}", style(format_elapsed(start.elapsed())).green());
        }
        Ok(())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// `Done (1.25 seconds)` under a minute, `Done (3 m 07 s)` above.
pub(crate) fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        format!("Done ({:.2} seconds)", secs)
    } else {
        let whole = elapsed.as_secs();
        format!("Done ({} m {:02} s)", whole / 60, whole % 60)
    }
}
