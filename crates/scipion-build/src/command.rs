//! A single unit of work with declared outputs.

use crate::BuildError;
use console::style;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// In-process step, e.g. creating a package link.
pub type StepFn = Arc<dyn Fn() -> Result<(), BuildError> + Send + Sync>;

/// What a [`Command`] runs.
#[derive(Clone)]
pub enum Step {
    /// Shell text run with `sh -c`. Lines separated by `\n` run one after another.
    Shell(String),
    /// A function called in-process. It does not see the command's working
    /// directory, so it must work with absolute paths.
    Call { label: String, func: StepFn },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Shell(text) => write!(f, "{}", text),
            Step::Call { label, .. } => write!(f, "{}", label),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Shell(text) => f.debug_tuple("Shell").field(text).finish(),
            Step::Call { label, .. } => f.debug_struct("Call").field("label", label).finish(),
        }
    }
}

/// Result of [`Command::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// All declared outputs were already present.
    Skipped,
    /// The step ran (or was echoed in dry-run mode).
    Executed,
}

/// A step plus the paths it is expected to leave on disk.
///
/// The outputs are the only success signal: exit codes of shell steps are
/// logged but ignored, a missing output after running is an error.
#[derive(Debug, Clone)]
pub struct Command {
    step: Step,
    targets: Vec<PathBuf>,
    cwd: Option<PathBuf>,
    out: Option<PathBuf>,
    always: bool,
    environ: BTreeMap<String, String>,
}

impl Command {
    pub fn shell(cmd: impl Into<String>) -> Self {
        Self::from_step(Step::Shell(cmd.into()))
    }

    pub fn call<F>(label: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> Result<(), BuildError> + Send + Sync + 'static,
    {
        Self::from_step(Step::Call {
            label: label.into(),
            func: Arc::new(func),
        })
    }

    fn from_step(step: Step) -> Self {
        Self {
            step,
            targets: Vec::new(),
            cwd: None,
            out: None,
            always: false,
            environ: BTreeMap::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<PathBuf>) -> Self {
        self.targets.push(target.into());
        self
    }

    pub fn with_targets<I, P>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.targets.extend(targets.into_iter().map(Into::into));
        self
    }

    /// Run shell steps inside `dir`.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Redirect stdout and stderr of shell steps to `log`.
    pub fn with_output(mut self, log: impl Into<PathBuf>) -> Self {
        self.out = Some(log.into());
        self
    }

    pub fn always(mut self, always: bool) -> Self {
        self.always = always;
        self
    }

    /// Variables added on top of the inherited environment.
    pub fn with_environ(mut self, environ: BTreeMap<String, String>) -> Self {
        self.environ.extend(environ);
        self
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn environ(&self) -> &BTreeMap<String, String> {
        &self.environ
    }

    pub fn is_always(&self) -> bool {
        self.always
    }

    /// True if every declared output exists (glob patterns allowed).
    pub fn exists_all(&self) -> bool {
        self.targets.iter().all(|t| path_exists(t))
    }

    /// Run the step unless its outputs already exist.
    ///
    /// With `show_only` the step is echoed but neither run nor verified.
    pub fn execute(&self, show_only: bool) -> Result<CommandStatus, BuildError> {
        if !self.always && !self.targets.is_empty() && self.exists_all() {
            println!("  Skipping command: {}", style(&self.step).cyan());
            println!("  All targets {} exist.", self.targets_display());
            return Ok(CommandStatus::Skipped);
        }

        if let Some(cwd) = &self.cwd {
            println!("{}", style(format!("cd {}", cwd.display())).cyan());
        }

        let mut last = String::new();
        match &self.step {
            Step::Shell(text) => {
                for line in text.split('\n') {
                    let line = match &self.out {
                        Some(out) => format!("{} > {} 2>&1", line, out.display()),
                        None => line.to_string(),
                    };
                    println!("{}", style(&line).cyan());
                    if !show_only {
                        self.run_shell(&line)?;
                    }
                    last = line;
                }
            }
            Step::Call { label, func } => {
                println!("{}", style(label).cyan());
                if !show_only {
                    func()?;
                }
                last = label.clone();
            }
        }

        if !show_only {
            if let Some(missing) = self.targets.iter().find(|t| !path_exists(t)) {
                return Err(BuildError::MissingOutput {
                    path: missing.clone(),
                    command: last,
                });
            }
        }

        Ok(CommandStatus::Executed)
    }

    fn run_shell(&self, line: &str) -> Result<(), BuildError> {
        let mut cmd = std::process::Command::new("sh");
        cmd.arg("-c").arg(line).envs(&self.environ);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let status = cmd.status()?;
        if !status.success() {
            debug!("'{}' exited with {}", line, status);
        }
        Ok(())
    }

    fn targets_display(&self) -> String {
        let names: Vec<String> = self.targets.iter().map(|t| t.display().to_string()).collect();
        format!("[{}]", names.join(", "))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command: {}, targets: {}", self.step, self.targets_display())
    }
}

/// Existence check that does not follow symlinks and accepts glob patterns.
pub(crate) fn path_exists(path: &Path) -> bool {
    let text = path.to_string_lossy();
    if text.contains(['*', '?', '[']) {
        match glob::glob(&text) {
            Ok(mut paths) => paths.any(|p| p.is_ok()),
            Err(_) => false,
        }
    } else {
        path.symlink_metadata().is_ok()
    }
}
