//! Helpers for plugins composing chained shell commands.
//!
//! The result feeds `LibraryOptions::commands` / `PackageOptions::commands`:
//! a list of `(shell text, outputs)` pairs.

use std::path::{Path, PathBuf};

/// A list of shell commands, each with the files it produces.
///
/// ```
/// use scipion_build::CommandDef;
///
/// let mut def = CommandDef::new("git clone https://github.com/org/tool.git", ["tool"]);
/// def.cd("tool").append("make", ["tool/bin/tool"], "&&");
/// assert_eq!(def.commands()[0].0, "git clone https://github.com/org/tool.git && cd tool && make");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandDef {
    cmds: Vec<(String, Vec<PathBuf>)>,
}

impl CommandDef {
    pub fn new<I, P>(cmd: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut def = Self { cmds: Vec::new() };
        def.start(cmd, targets);
        def
    }

    /// Start a new command; further appends go to it.
    pub fn start<I, P>(&mut self, cmd: impl Into<String>, targets: I) -> &mut Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.cmds.push((cmd.into(), Vec::new()));
        self.add_target(targets)
    }

    /// Whether the current command has no text yet.
    pub fn is_empty(&self) -> bool {
        self.cmds.last().map_or(true, |(cmd, _)| cmd.is_empty())
    }

    pub fn add_target<I, P>(&mut self, targets: I) -> &mut Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        if self.cmds.is_empty() {
            self.cmds.push((String::new(), Vec::new()));
        }
        if let Some((_, current)) = self.cmds.last_mut() {
            current.extend(targets.into_iter().map(Into::into));
        }
        self
    }

    /// Append `cmd` to the current command, joined with `sep`.
    pub fn append<I, P>(&mut self, cmd: &str, targets: I, sep: &str) -> &mut Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        if self.cmds.is_empty() {
            self.cmds.push((String::new(), Vec::new()));
        }
        if let Some((current, _)) = self.cmds.last_mut() {
            if current.is_empty() {
                *current = cmd.to_string();
            } else {
                *current = format!("{} {} {}", current, sep, cmd);
            }
        }
        self.add_target(targets)
    }

    pub fn cd(&mut self, folder: impl AsRef<Path>) -> &mut Self {
        self.append(&format!("cd {}", folder.as_ref().display()), no_targets(), "&&")
    }

    /// Append `touch file`; the touched file becomes an output when `is_target`.
    pub fn touch(&mut self, file: &str, is_target: bool) -> &mut Self {
        let targets: Vec<PathBuf> = if is_target {
            vec![PathBuf::from(file)]
        } else {
            Vec::new()
        };
        self.append(&format!("touch {}", file), targets, "&&")
    }

    pub fn commands(&self) -> &[(String, Vec<PathBuf>)] {
        &self.cmds
    }

    pub fn into_commands(self) -> Vec<(String, Vec<PathBuf>)> {
        self.cmds
    }
}

fn no_targets() -> Vec<PathBuf> {
    Vec::new()
}

/// [`CommandDef`] with conda environment helpers.
#[derive(Debug, Clone)]
pub struct CondaCommandDef {
    def: CommandDef,
    env_name: String,
    activation_cmd: String,
}

impl CondaCommandDef {
    /// Marker touched once the environment has been created.
    pub const ENV_CREATED: &'static str = "env_created.txt";

    pub fn new(env_name: impl Into<String>, activation_cmd: &str) -> Self {
        Self {
            def: CommandDef::new("", no_targets()),
            env_name: env_name.into(),
            activation_cmd: activation_cmd.replace("&&", "").trim().to_string(),
        }
    }

    /// `conda create` (or `conda env create -f yml`) followed by the marker.
    pub fn create(&mut self, extra: &str, yml: Option<&str>) -> &mut Self {
        let activation = self.activation_cmd.clone();
        let create = match yml {
            Some(yml) => format!("conda env create -y -n {} -f {} {}", self.env_name, yml, extra),
            None => format!("conda create -y -n {} {}", self.env_name, extra),
        };
        self.append_raw(&activation);
        self.append_raw(create.trim_end());
        self.def.touch(Self::ENV_CREATED, true);
        self
    }

    pub fn activate(&mut self, with_activation_cmd: bool) -> &mut Self {
        if with_activation_cmd {
            let activation = self.activation_cmd.clone();
            self.append_raw(&activation);
        }
        let activate = format!("conda activate {}", self.env_name);
        self.append_raw(&activate)
    }

    pub fn pip_install(&mut self, packages: &str) -> &mut Self {
        self.append_raw(&format!("python -m pip install {}", packages))
    }

    /// `conda install`; activates the environment first on an empty command.
    pub fn conda_install(&mut self, packages: &str) -> &mut Self {
        if self.def.is_empty() {
            self.activate(true);
        }
        self.append_raw(&format!("conda install {}", packages))
    }

    pub fn touch(&mut self, file: &str) -> &mut Self {
        self.def.touch(file, true);
        self
    }

    fn append_raw(&mut self, cmd: &str) -> &mut Self {
        if !cmd.is_empty() {
            self.def.append(cmd, no_targets(), "&&");
        }
        self
    }

    pub fn commands(&self) -> &[(String, Vec<PathBuf>)] {
        self.def.commands()
    }

    pub fn into_commands(self) -> Vec<(String, Vec<PathBuf>)> {
        self.def.into_commands()
    }
}
