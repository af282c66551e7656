//! The target graph and its builders.

use crate::{create_package_link, BuildError, Command, Layout, Target};
use scipion_platform::{check_lib, cuda_environ, program_in_path, PlatformInfo};
use scipion_types::ext_name;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Tarball name meaning "nothing to extract, just create the build folder".
pub const VOID_TGZ: &str = "void.tgz";

/// Global parameters of one install run.
#[derive(Debug, Clone)]
pub struct EnvOptions {
    /// Echo commands without running them (`--show`)
    pub show_only: bool,
    /// Print the dependency tree instead of executing (`--show-tree`)
    pub show_tree: bool,
    /// With `show_tree`, print a Graphviz graph instead (`--dot`)
    pub dot: bool,
    /// Passed to `make -j`
    pub processors: usize,
    /// Explicitly requested targets; defaults are used when empty
    pub targets: Vec<String>,
    /// Interpreter used for pip modules
    pub python: String,
    /// Shared library extension (`so`, `dylib`)
    pub lib_suffix: String,
    pub cuda_lib: PathBuf,
    pub cuda_bin: PathBuf,
}

impl Default for EnvOptions {
    fn default() -> Self {
        Self {
            show_only: false,
            show_tree: false,
            dot: false,
            processors: 1,
            targets: Vec::new(),
            python: "python3".to_string(),
            lib_suffix: PlatformInfo::detect().lib_suffix().to_string(),
            cuda_lib: PathBuf::from("/usr/local/cuda/lib64"),
            cuda_bin: PathBuf::from("/usr/local/cuda/bin"),
        }
    }
}

/// Where and how a target gets its sources.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Tarball name; `<name>.tgz` by default
    pub tar: Option<String>,
    /// Full URL; `file:` URLs are linked instead of downloaded
    pub url: Option<String>,
    /// Folder on the software server; `external` for libraries, `em` for packages
    pub url_suffix: Option<String>,
    /// Where the tarball is saved and extracted
    pub download_dir: Option<PathBuf>,
    /// Extracted folder; the tarball name without extension by default
    pub build_dir: Option<String>,
    /// Folder package outputs are relative to; `build_dir` by default
    pub target_dir: Option<String>,
    /// Create `build_dir` and extract inside it
    pub create_build_dir: bool,
    /// Output of the extraction step; `build_dir` by default
    pub target: Option<String>,
}

/// Options of [`Environment::add_library`].
#[derive(Debug, Clone)]
pub struct LibraryOptions {
    pub default: bool,
    pub deps: Vec<String>,
    pub download: DownloadOptions,
    /// File produced by configure/cmake
    pub config_target: String,
    pub config_always: bool,
    pub flags: Vec<String>,
    /// Outputs of `make install`; `<software>/lib/lib<name>.<suffix>` by default
    pub targets: Option<Vec<PathBuf>>,
    /// Run `make clean` and remove the makefile afterwards
    pub clean: bool,
    pub cmake: bool,
    pub needed_progs: Vec<String>,
    pub lib_checks: Vec<String>,
    /// Replace configure/make with these `(command, outputs)` pairs
    pub commands: Vec<(String, Vec<PathBuf>)>,
    /// Folder configure runs in, inside the tmp folder
    pub config_dir: Option<String>,
}

impl Default for LibraryOptions {
    fn default() -> Self {
        Self {
            default: true,
            deps: Vec::new(),
            download: DownloadOptions::default(),
            config_target: "Makefile".to_string(),
            config_always: false,
            flags: Vec::new(),
            targets: None,
            clean: false,
            cmake: false,
            needed_progs: Vec::new(),
            lib_checks: Vec::new(),
            commands: Vec::new(),
            config_dir: None,
        }
    }
}

/// Options of [`Environment::add_pip_module`].
#[derive(Debug, Clone)]
pub struct PipModuleOptions {
    pub version: String,
    /// Full command replacing `<python> -m pip install name==version`
    pub pip_cmd: Option<String>,
    /// Entry expected in site-packages (glob allowed); the module name by default
    pub target: Option<String>,
    pub default: bool,
    pub deps: Vec<String>,
}

impl Default for PipModuleOptions {
    fn default() -> Self {
        Self {
            version: String::new(),
            pip_cmd: None,
            target: None,
            default: true,
            deps: Vec::new(),
        }
    }
}

/// Options of [`Environment::add_package`].
#[derive(Debug, Clone, Default)]
pub struct PackageOptions {
    pub version: Option<String>,
    /// `(command, outputs)` pairs; outputs are relative to the package folder
    pub commands: Vec<(String, Vec<PathBuf>)>,
    pub needed_progs: Vec<String>,
    pub lib_checks: Vec<String>,
    pub deps: Vec<String>,
    pub default: bool,
    /// Prepend the CUDA folders to `LD_LIBRARY_PATH` and `PATH`
    pub update_cuda: bool,
    /// Extra variables for the install commands
    pub vars: BTreeMap<String, String>,
    /// Make this version the one the unversioned name installs,
    /// whatever versions are added after it
    pub preferred: bool,
    pub download: DownloadOptions,
}

/// One version registered through [`Environment::add_package`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    pub name: String,
    pub version: String,
}

/// A graph of named targets plus the install parameters.
///
/// Targets are kept in insertion order, which is the order defaults are
/// installed in. Aliases map extra names onto existing targets.
#[derive(Debug)]
pub struct Environment {
    layout: Layout,
    options: EnvOptions,
    targets: Vec<Target>,
    index: HashMap<String, usize>,
    packages: BTreeMap<String, Vec<PackageEntry>>,
    preferred: HashSet<String>,
}

impl Environment {
    pub fn new(layout: Layout, options: EnvOptions) -> Self {
        Self {
            layout,
            options,
            targets: Vec::new(),
            index: HashMap::new(),
            packages: BTreeMap::new(),
            preferred: HashSet::new(),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn options(&self) -> &EnvOptions {
        &self.options
    }

    pub fn show_only(&self) -> bool {
        self.options.show_only
    }

    pub fn processors(&self) -> usize {
        self.options.processors
    }

    pub fn lib_suffix(&self) -> &str {
        &self.options.lib_suffix
    }

    /// `<software>/lib/lib<name>.<suffix>`
    pub fn lib(&self, name: &str) -> PathBuf {
        self.layout.lib(name, &self.options.lib_suffix)
    }

    fn is_requested(&self, name: &str) -> bool {
        self.options.targets.iter().any(|t| t == name)
    }

    // ------------------------------------------------------------------
    // Graph
    // ------------------------------------------------------------------

    fn register(&mut self, target: Target) -> Result<&mut Target, BuildError> {
        if self.index.contains_key(target.name()) {
            return Err(BuildError::DuplicateTarget(target.name().to_string()));
        }
        if let Some(dep) = target.deps().iter().find(|d| !self.index.contains_key(*d)) {
            return Err(BuildError::UnknownDependency {
                target: target.name().to_string(),
                dep: dep.clone(),
            });
        }

        debug!("Target added: {} ({} commands)", target.name(), target.commands().len());
        let idx = self.targets.len();
        self.index.insert(target.name().to_string(), idx);
        self.targets.push(target);
        Ok(&mut self.targets[idx])
    }

    /// Register an empty target.
    pub fn add_target(&mut self, name: &str, default: bool) -> Result<&mut Target, BuildError> {
        self.register(Target::new(name, default))
    }

    /// Make `alias` resolve to the existing target `name`.
    pub fn add_target_alias(&mut self, name: &str, alias: &str) -> Result<(), BuildError> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| BuildError::UnknownTarget(name.to_string()))?;
        self.index.insert(alias.to_string(), idx);
        Ok(())
    }

    /// Add dependencies to `name`; each must already be registered.
    pub fn add_deps<S: AsRef<str>>(&mut self, name: &str, deps: &[S]) -> Result<(), BuildError> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| BuildError::UnknownTarget(name.to_string()))?;
        for dep in deps {
            let dep = dep.as_ref();
            if !self.index.contains_key(dep) {
                return Err(BuildError::UnknownDependency {
                    target: name.to_string(),
                    dep: dep.to_string(),
                });
            }
            self.targets[idx].push_dep(dep.to_string());
        }
        Ok(())
    }

    pub fn has_target(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Target registered as `name` or aliased to it.
    pub fn target(&self, name: &str) -> Option<&Target> {
        self.index.get(name).map(|&i| &self.targets[i])
    }

    pub fn target_mut(&mut self, name: &str) -> Option<&mut Target> {
        let idx = *self.index.get(name)?;
        Some(&mut self.targets[idx])
    }

    /// Targets in insertion order, aliases excluded.
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Set the default flag of every registered target.
    pub fn set_default(&mut self, default: bool) {
        for target in &mut self.targets {
            target.set_default(default);
        }
    }

    // ------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------

    /// Target with a download (or `file:` link) step and an extraction step.
    fn download_untar(
        &self,
        name: &str,
        default: bool,
        deps: &[String],
        opts: &DownloadOptions,
    ) -> Result<(Target, PathBuf), BuildError> {
        let tar = opts.tar.clone().unwrap_or_else(|| format!("{}.tgz", name));
        let url_suffix = opts.url_suffix.as_deref().unwrap_or("external");
        let url = opts
            .url
            .clone()
            .unwrap_or_else(|| format!("{}/{}/{}", self.layout.url_software(), url_suffix, tar));
        let download_dir = opts
            .download_dir
            .clone()
            .unwrap_or_else(|| self.layout.tmp_folder());
        let build_dir = opts
            .build_dir
            .clone()
            .unwrap_or_else(|| build_dir_from_tar(&tar));
        let target_dir = opts.target_dir.clone().unwrap_or_else(|| build_dir.clone());

        let tar_file = download_dir.join(&tar);
        let build_path = download_dir.join(&build_dir);

        let mut target = Target::new(name, default);
        for dep in deps {
            target.push_dep(dep.clone());
        }
        target.set_paths(build_path.clone(), download_dir.join(&target_dir));

        // An empty leftover from an interrupted download would count as done.
        if let Ok(meta) = fs::metadata(&tar_file) {
            if meta.is_file() && meta.len() == 0 {
                debug!("Removing empty {}", tar_file.display());
                fs::remove_file(&tar_file)?;
            }
        }

        if let Some(source) = url.strip_prefix("file:") {
            target.add_command(
                Command::shell(format!("ln -s {} {}", source, tar))
                    .with_target(&tar_file)
                    .in_dir(&download_dir),
            );
        } else {
            let tar_file = tar_file.display();
            target.add_command(
                Command::shell(format!(
                    "wget -nv -c -O {tar}.part {url}\nmv -v {tar}.part {tar}",
                    tar = tar_file,
                    url = url
                ))
                .with_target(download_dir.join(&tar)),
            );
        }

        let mut tar_cmd = format!("tar -xf {}", tar);
        if opts.create_build_dir {
            tar_cmd = if tar == VOID_TGZ {
                format!("mkdir {}", build_path.display())
            } else {
                format!("mkdir {} && {} -C {}", build_path.display(), tar_cmd, build_dir)
            };
        }

        let extracted = download_dir.join(opts.target.as_deref().unwrap_or(&build_dir));
        target.add_command(
            Command::shell(tar_cmd)
                .with_target(extracted)
                .in_dir(&download_dir),
        );

        Ok((target, build_path))
    }

    /// Download, configure (autotools or cmake), build and install a library.
    ///
    /// Needed programs are checked when the library is a default target or
    /// was requested explicitly.
    pub fn add_library(&mut self, name: &str, opts: LibraryOptions) -> Result<&mut Target, BuildError> {
        if opts.default || self.is_requested(name) {
            for prog in &opts.needed_progs {
                if !program_in_path(prog) {
                    return Err(BuildError::MissingProgram(prog.clone()));
                }
            }
            for lib in &opts.lib_checks {
                if !check_lib(lib) {
                    warn!("Library {} not found, building {} may fail", lib, name);
                }
            }
        }

        let (mut target, build_path) = self.download_untar(name, opts.default, &opts.deps, &opts.download)?;

        if !opts.commands.is_empty() {
            for (cmd, outputs) in opts.commands {
                target.add_final_command(Command::shell(cmd).with_targets(outputs));
            }
            return self.register(target);
        }

        let build_dir = opts.download.build_dir.clone().unwrap_or_else(|| {
            build_dir_from_tar(opts.download.tar.as_deref().unwrap_or(&format!("{}.tgz", name)))
        });
        let config_dir = opts.config_dir.clone().unwrap_or(build_dir);
        let config_path = self.layout.tmp_folder().join(config_dir);
        let make_file = config_path.join(&opts.config_target);
        let prefix = absolute(self.layout.software());
        let environ = compile_flags(&prefix, |k| std::env::var(k).ok());

        let mut flags = opts.flags;
        if !opts.cmake {
            flags.push(format!("--prefix={}", prefix.display()));
            flags.push(format!("--libdir={}/lib", prefix.display()));
            target.add_command(
                Command::shell(format!("./configure {}", flags.join(" ")))
                    .with_target(&make_file)
                    .in_dir(&config_path)
                    .with_output(self.layout.log(&format!("{}_configure.log", name)))
                    .always(opts.config_always)
                    .with_environ(environ),
            );
        } else {
            if (opts.default || self.is_requested(name))
                && !program_in_path("cmake")
                && !self.is_requested("cmake")
            {
                return Err(BuildError::MissingProgram("cmake".to_string()));
            }
            flags.push(format!("-DCMAKE_INSTALL_PREFIX:PATH={} .", prefix.display()));
            target.add_command(
                Command::shell(format!("cmake {}", flags.join(" ")))
                    .with_target(&make_file)
                    .in_dir(&config_path)
                    .with_output(self.layout.log(&format!("{}_cmake.log", name)))
                    .with_environ(environ),
            );
        }

        target.add_command(
            Command::shell(format!("make -j {}", self.options.processors))
                .in_dir(&build_path)
                .with_output(self.layout.log(&format!("{}_make.log", name))),
        );

        let outputs = opts.targets.unwrap_or_else(|| vec![self.lib(name)]);
        target.add_final_command(
            Command::shell("make install")
                .with_targets(outputs)
                .in_dir(&build_path)
                .with_output(self.layout.log(&format!("{}_make_install.log", name))),
        );

        if opts.clean {
            target.add_command(
                Command::shell("make clean")
                    .in_dir(&build_path)
                    .with_output(self.layout.log(&format!("{}_make_clean.log", name))),
            );
            target.add_command(Command::shell(format!("rm {}", make_file.display())));
        }

        self.register(target)
    }

    /// A pip install that always runs; pip decides whether there is work to do.
    pub fn add_pip_module(&mut self, name: &str, opts: PipModuleOptions) -> Result<&mut Target, BuildError> {
        let entry = opts.target.unwrap_or_else(|| name.to_string());
        let pip_cmd = opts.pip_cmd.unwrap_or_else(|| {
            if opts.version.is_empty() {
                format!("{} -m pip install {}", self.options.python, name)
            } else {
                format!("{} -m pip install {}=={}", self.options.python, name, opts.version)
            }
        });

        let mut target = Target::new(name, opts.default);
        target.set_always(true);
        for dep in opts.deps {
            target.push_dep(dep);
        }
        target.add_final_command(
            Command::shell(pip_cmd)
                .with_target(self.layout.site_packages().join(entry))
                .always(true),
        );

        self.register(target)
    }

    /// A versioned binary installed under the shared binaries folder.
    ///
    /// The target is named `<name>-<version>`; `<name>` is aliased to it, so
    /// the last version added is the one the bare name installs unless some
    /// version was marked `preferred`. Installing creates the link
    /// `<em>/<name> -> <name>-<version>`.
    pub fn add_package(&mut self, name: &str, opts: PackageOptions) -> Result<&mut Target, BuildError> {
        if self.is_requested(name) {
            for prog in &opts.needed_progs {
                if !program_in_path(prog) {
                    return Err(BuildError::MissingProgram(prog.clone()));
                }
            }
        }

        let (version, ext) = match &opts.version {
            Some(v) => (v.clone(), ext_name(name, v)),
            None => (String::new(), name.to_string()),
        };

        let missing_libs: Vec<String> = opts
            .lib_checks
            .iter()
            .filter(|lib| !check_lib(lib))
            .cloned()
            .collect();

        let mut environ = if opts.update_cuda {
            cuda_environ(name, &self.options.cuda_lib, &self.options.cuda_bin)
        } else {
            BTreeMap::new()
        };
        environ.extend(opts.vars);

        let mut download = opts.download;
        let tar = download.tar.clone().unwrap_or_else(|| format!("{}.tgz", ext));
        if tar == VOID_TGZ {
            download.build_dir = Some(ext.clone());
            download.create_build_dir = true;
        }
        let build_dir = download.build_dir.clone().unwrap_or_else(|| build_dir_from_tar(&tar));
        let target_dir = download.target_dir.clone().unwrap_or_else(|| build_dir.clone());
        download.tar = Some(tar);
        download.build_dir = Some(build_dir);
        download
            .download_dir
            .get_or_insert_with(|| self.layout.em_folder().to_path_buf());
        download.url_suffix.get_or_insert_with(|| "em".to_string());

        let (mut target, build_path) = self.download_untar(&ext, opts.default, &opts.deps, &download)?;
        let target_path = target
            .target_path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| build_path.clone());

        if missing_libs.is_empty() {
            for (cmd, outputs) in opts.commands {
                if outputs.is_empty() || outputs.iter().any(|o| o.as_os_str().is_empty()) {
                    warn!("Target empty for command {}", cmd);
                }
                let outputs: Vec<PathBuf> = outputs.iter().map(|o| target_path.join(o)).collect();
                target.add_final_command(
                    Command::shell(cmd)
                        .with_targets(outputs)
                        .in_dir(&build_path)
                        .with_environ(environ.clone()),
                );
            }
        } else {
            for lib in missing_libs {
                let output = target_path.join(&lib);
                target.add_final_command(
                    Command::call(format!("check library {}", lib), move || {
                        Err(BuildError::MissingLibrary(lib.clone()))
                    })
                    .with_target(output),
                );
            }
        }

        // A package extracted into a folder with its bare name already has
        // the unversioned path, only the versioned link is created.
        let em = self.layout.em_folder().to_path_buf();
        let link_bare = ext != name && target_dir != name;
        let mut link_outputs = vec![em.join(&ext), em.join(&target_dir)];
        if link_bare {
            link_outputs.push(em.join(name));
        }
        let (link_name, package) = (ext.clone(), name.to_string());
        target.add_final_command(
            Command::call(format!("Link '{} -> {}'", ext, target_dir), move || {
                create_package_link(&em, &link_name, &target_dir)?;
                if link_bare {
                    create_package_link(&em, &package, &link_name)?;
                }
                Ok(())
            })
            .with_targets(link_outputs),
        );

        let idx = self.targets.len();
        self.register(target)?;
        self.packages
            .entry(name.to_string())
            .or_default()
            .push(PackageEntry {
                name: name.to_string(),
                version,
            });

        if opts.preferred {
            self.add_target_alias(&ext, name)?;
            self.preferred.insert(name.to_string());
        } else if !self.preferred.contains(name) {
            self.add_target_alias(&ext, name)?;
        }

        Ok(&mut self.targets[idx])
    }

    // ------------------------------------------------------------------
    // Inventory
    // ------------------------------------------------------------------

    /// Packages by name with every registered version.
    pub fn packages(&self) -> &BTreeMap<String, Vec<PackageEntry>> {
        &self.packages
    }

    pub fn has_package(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    pub fn package(&self, name: &str) -> Option<&[PackageEntry]> {
        self.packages.get(name).map(Vec::as_slice)
    }

    /// Whether a package version seems installed: its folder exists under
    /// the binaries folder or a site-packages entry starts with its name.
    pub fn is_installed(&self, name: &str, version: &str) -> bool {
        let ext = if version.is_empty() {
            name.to_string()
        } else {
            ext_name(name, version)
        };
        if self.layout.em(&ext).exists() {
            return true;
        }
        fs::read_dir(self.layout.site_packages())
            .map(|entries| {
                entries
                    .flatten()
                    .any(|e| e.file_name().to_string_lossy().starts_with(&ext))
            })
            .unwrap_or(false)
    }

    /// Table of packages and versions, `[X]` marking installed ones.
    pub fn render_help(&self) -> String {
        let mut out = String::new();
        if self.packages.is_empty() {
            return out;
        }

        out.push_str("Available binaries: ([ ] not installed, [X] seems already installed)\n\n");
        for (name, versions) in &self.packages {
            let _ = write!(out, "{:<25}", name);
            for entry in versions {
                let mark = if self.is_installed(&entry.name, &entry.version) {
                    'X'
                } else {
                    ' '
                };
                let _ = write!(out, "{:<8}[{}]{:5}", entry.version, mark, "");
            }
            out.push('\n');
        }
        out
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    fn resolve(&self, names: &[String]) -> Result<Vec<usize>, BuildError> {
        names
            .iter()
            .map(|n| {
                self.index
                    .get(n)
                    .copied()
                    .ok_or_else(|| BuildError::UnknownTarget(n.clone()))
            })
            .collect()
    }

    /// Requested targets, or every default target in insertion order.
    fn requested(&self) -> Result<Vec<usize>, BuildError> {
        if self.options.targets.is_empty() {
            Ok((0..self.targets.len())
                .filter(|&i| self.targets[i].is_default())
                .collect())
        } else {
            self.resolve(&self.options.targets)
        }
    }

    /// Names of the targets [`execute`](Self::execute) would start from.
    pub fn requested_targets(&self) -> Result<Vec<String>, BuildError> {
        Ok(self
            .requested()?
            .into_iter()
            .map(|i| self.targets[i].name().to_string())
            .collect())
    }

    fn dep_indices(&self, idx: usize) -> Result<Vec<usize>, BuildError> {
        let target = &self.targets[idx];
        target
            .deps()
            .iter()
            .map(|d| {
                self.index.get(d).copied().ok_or_else(|| BuildError::UnknownDependency {
                    target: target.name().to_string(),
                    dep: d.clone(),
                })
            })
            .collect()
    }

    /// Install the requested targets, or print the tree when asked to.
    pub fn execute(&self) -> Result<(), BuildError> {
        let requested = self.requested()?;

        if self.options.show_tree {
            let out = if self.options.dot {
                self.dot_of(&requested)?
            } else {
                self.tree_of(&requested, None)?
            };
            print!("{}", out);
            return Ok(());
        }

        if !self.options.show_only {
            self.layout.create_dirs()?;
        }
        self.execute_indices(&requested).map(|_| ())
    }

    /// Execute `names` and their dependencies, returning the execution order.
    pub fn execute_targets(&self, names: &[String]) -> Result<Vec<String>, BuildError> {
        let list = self.resolve(names)?;
        self.execute_indices(&list)
    }

    fn execute_indices(&self, list: &[usize]) -> Result<Vec<String>, BuildError> {
        let mut executed = HashSet::new();
        let mut exploring = HashSet::new();
        let mut order = Vec::new();
        let mut stack: Vec<usize> = list.iter().rev().copied().collect();

        while let Some(idx) = stack.pop() {
            if executed.contains(&idx) {
                continue;
            }

            let pending: Vec<usize> = self
                .dep_indices(idx)?
                .into_iter()
                .filter(|d| !executed.contains(d))
                .collect();

            if pending.is_empty() {
                self.targets[idx].execute(self.options.show_only)?;
                executed.insert(idx);
                exploring.remove(&idx);
                order.push(self.targets[idx].name().to_string());
            } else {
                if !exploring.insert(idx) {
                    return Err(BuildError::Cycle {
                        target: self.targets[idx].name().to_string(),
                    });
                }
                stack.push(idx);
                stack.extend(pending);
            }
        }

        Ok(order)
    }

    /// Indented dependency tree of `names`, down to `max_level` (unlimited if `None`).
    pub fn render_tree(&self, names: &[String], max_level: Option<usize>) -> Result<String, BuildError> {
        let list = self.resolve(names)?;
        self.tree_of(&list, max_level)
    }

    fn tree_of(&self, list: &[usize], max_level: Option<usize>) -> Result<String, BuildError> {
        let mut out = String::new();
        let mut nodes: Vec<(usize, usize)> = list.iter().rev().map(|&i| (0, i)).collect();

        while let Some((level, idx)) = nodes.pop() {
            let target = &self.targets[idx];
            if level > self.targets.len() {
                return Err(BuildError::Cycle {
                    target: target.name().to_string(),
                });
            }
            let _ = writeln!(out, "{}- {}", "  ".repeat(level), target.name());
            if max_level.is_some_and(|max| level >= max) {
                continue;
            }
            let deps = self.dep_indices(idx)?;
            nodes.extend(deps.into_iter().rev().map(|d| (level + 1, d)));
        }

        Ok(out)
    }

    /// Graphviz graph of `names` and their direct dependencies.
    pub fn render_dot(&self, names: &[String]) -> Result<String, BuildError> {
        let list = self.resolve(names)?;
        self.dot_of(&list)
    }

    fn dot_of(&self, list: &[usize]) -> Result<String, BuildError> {
        let mut out = String::from("digraph libraries {\n");
        for &idx in list {
            let target = &self.targets[idx];
            if target.deps().is_empty() {
                let _ = writeln!(out, "  \"{}\"", target.name());
            } else {
                for dep in target.deps() {
                    let _ = writeln!(out, "  \"{}\" -> \"{}\"", target.name(), dep);
                }
            }
        }
        out.push_str("}\n");
        Ok(out)
    }
}

/// Extraction folder implied by a tarball name (`fftw-3.3.4.tar.gz` gives `fftw-3.3.4`).
pub(crate) fn build_dir_from_tar(tar: &str) -> String {
    let name = tar.rsplit_once(".tar.gz").map_or(tar, |(stem, _)| stem);
    let name = name.rsplit_once(".tgz").map_or(name, |(stem, _)| stem);
    let name = name.split_once(".tar").map_or(name, |(stem, _)| stem);
    name.to_string()
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// `CPPFLAGS`/`LDFLAGS` pointing at the install prefix, ahead of any inherited value.
fn compile_flags<F>(prefix: &Path, env: F) -> BTreeMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut environ = BTreeMap::new();
    for (var, value) in [
        ("CPPFLAGS", format!("-I{}/include", prefix.display())),
        ("LDFLAGS", format!("-L{}/lib", prefix.display())),
    ] {
        environ.insert(
            var.to_string(),
            format!("{} {}", value, env(var).unwrap_or_default()),
        );
    }
    environ
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Step;
    use std::sync::{Arc, Mutex};

    fn env_in(dir: &Path) -> Environment {
        Environment::new(Layout::rooted_at(dir), EnvOptions::default())
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &str) -> Command {
        let log = Arc::clone(log);
        let name = name.to_string();
        Command::call(format!("record {}", name), move || {
            log.lock().unwrap().push(name.clone());
            Ok(())
        })
    }

    fn recording_target(env: &mut Environment, log: &Arc<Mutex<Vec<String>>>, name: &str, deps: &[&str]) {
        env.add_target(name, false).unwrap().add_command(recorder(log, name));
        env.add_deps(name, deps).unwrap();
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_duplicate_target() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        env.add_target("fftw3", true).unwrap();
        assert!(matches!(
            env.add_target("fftw3", true),
            Err(BuildError::DuplicateTarget(name)) if name == "fftw3"
        ));
    }

    #[test]
    fn test_unknown_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        let opts = LibraryOptions {
            default: false,
            deps: vec!["fftw3".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            env.add_library("xmipp", opts),
            Err(BuildError::UnknownDependency { dep, .. }) if dep == "fftw3"
        ));
        assert!(!env.has_target("xmipp"));
    }

    #[test]
    fn test_alias_requires_target() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        assert!(matches!(
            env.add_target_alias("relion-3.0", "relion"),
            Err(BuildError::UnknownTarget(_))
        ));
    }

    #[test]
    fn test_dependencies_run_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        let log = Arc::new(Mutex::new(Vec::new()));

        recording_target(&mut env, &log, "c", &[]);
        recording_target(&mut env, &log, "b", &["c"]);
        recording_target(&mut env, &log, "a", &["b"]);

        let order = env.execute_targets(&names(&["a"])).unwrap();
        assert_eq!(order, names(&["c", "b", "a"]));
        assert_eq!(*log.lock().unwrap(), names(&["c", "b", "a"]));
    }

    #[test]
    fn test_each_target_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        let log = Arc::new(Mutex::new(Vec::new()));

        recording_target(&mut env, &log, "c", &[]);
        recording_target(&mut env, &log, "b", &["c"]);
        recording_target(&mut env, &log, "a", &["b"]);

        env.execute_targets(&names(&["b", "a", "c"])).unwrap();
        assert_eq!(*log.lock().unwrap(), names(&["c", "b", "a"]));
    }

    #[test]
    fn test_cycle_detection() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        let log = Arc::new(Mutex::new(Vec::new()));

        recording_target(&mut env, &log, "a", &[]);
        recording_target(&mut env, &log, "b", &["a"]);
        env.add_deps("a", &["b"]).unwrap();

        match env.execute_targets(&names(&["a"])) {
            Err(BuildError::Cycle { target }) => assert!(target == "a" || target == "b"),
            other => panic!("expected a cycle, got {:?}", other),
        }
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_last_added_version_wins_alias() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());

        for version in ["1.0", "2.0"] {
            env.add_package(
                "tool",
                PackageOptions {
                    version: Some(version.to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        }

        assert_eq!(env.target("tool").unwrap().name(), "tool-2.0");
        assert_eq!(
            env.package("tool").unwrap(),
            &[
                PackageEntry { name: "tool".into(), version: "1.0".into() },
                PackageEntry { name: "tool".into(), version: "2.0".into() },
            ]
        );
    }

    #[test]
    fn test_preferred_version_keeps_alias() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());

        for (version, preferred) in [("1.0", false), ("2.0", true), ("3.0b1", false)] {
            env.add_package(
                "tool",
                PackageOptions {
                    version: Some(version.to_string()),
                    preferred,
                    ..Default::default()
                },
            )
            .unwrap();
        }

        assert_eq!(env.target("tool").unwrap().name(), "tool-2.0");
    }

    #[test]
    fn test_void_package_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        let em = env.layout().em_folder().to_path_buf();

        let target = env
            .add_package(
                "motioncor2",
                PackageOptions {
                    version: Some("1.4.0".to_string()),
                    download: DownloadOptions {
                        tar: Some(VOID_TGZ.to_string()),
                        ..Default::default()
                    },
                    commands: vec![("chmod +x bin/motioncor2".to_string(), vec![PathBuf::from("bin")])],
                    ..Default::default()
                },
            )
            .unwrap();

        let cmds = target.commands();
        assert_eq!(cmds.len(), 4);
        assert!(cmds[0].step().to_string().contains("http://localhost/software/em/void.tgz"));
        assert_eq!(cmds[0].targets(), &[em.join("void.tgz")]);
        assert_eq!(cmds[1].step().to_string(), format!("mkdir {}", em.join("motioncor2-1.4.0").display()));
        assert_eq!(cmds[2].targets(), &[em.join("motioncor2-1.4.0").join("bin")]);
        assert_eq!(cmds[2].cwd(), Some(em.join("motioncor2-1.4.0").as_path()));
        assert!(matches!(cmds[3].step(), Step::Call { .. }));
        assert_eq!(
            cmds[3].targets(),
            &[em.join("motioncor2-1.4.0"), em.join("motioncor2-1.4.0"), em.join("motioncor2")]
        );
        assert!(!target.is_default());
    }

    #[test]
    fn test_file_url_is_linked() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        let opts = LibraryOptions {
            download: DownloadOptions {
                url: Some("file:/data/mirror/fftw-3.3.4.tgz".to_string()),
                tar: Some("fftw-3.3.4.tgz".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let target = env.add_library("fftw3", opts).unwrap();
        assert_eq!(
            target.commands()[0].step().to_string(),
            "ln -s /data/mirror/fftw-3.3.4.tgz fftw-3.3.4.tgz"
        );
        assert_eq!(target.commands()[1].step().to_string(), "tar -xf fftw-3.3.4.tgz");
    }

    #[test]
    fn test_library_autotools_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = Environment::new(
            Layout::rooted_at(dir.path()),
            EnvOptions {
                processors: 4,
                lib_suffix: "so".to_string(),
                ..Default::default()
            },
        );
        let software = env.layout().software().to_path_buf();

        let opts = LibraryOptions {
            flags: vec!["--enable-threads".to_string()],
            clean: true,
            ..Default::default()
        };
        let target = env.add_library("fftw3", opts).unwrap();
        let steps: Vec<String> = target.commands().iter().map(|c| c.step().to_string()).collect();

        assert_eq!(
            steps[2],
            format!(
                "./configure --enable-threads --prefix={0} --libdir={0}/lib",
                software.display()
            )
        );
        assert_eq!(steps[3], "make -j 4");
        assert_eq!(steps[4], "make install");
        assert_eq!(steps[5], "make clean");
        assert_eq!(target.commands()[4].targets(), &[software.join("lib/libfftw3.so")]);
        assert_eq!(
            target.commands()[2].environ().get("CPPFLAGS").unwrap().split_whitespace().next(),
            Some(format!("-I{}/include", software.display()).as_str())
        );
        assert_eq!(target.final_commands().count(), 1);
    }

    #[test]
    fn test_library_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        let opts = LibraryOptions {
            needed_progs: vec!["scipion-no-such-compiler".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            env.add_library("hdf5", opts.clone()),
            Err(BuildError::MissingProgram(p)) if p == "scipion-no-such-compiler"
        ));

        // not a default target and not requested: no check
        let opts = LibraryOptions { default: false, ..opts };
        assert!(env.add_library("hdf5", opts).is_ok());
    }

    #[test]
    fn test_library_custom_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        let opts = LibraryOptions {
            commands: vec![("cp -r sqlite3 lib".to_string(), vec![PathBuf::from("lib/sqlite3")])],
            ..Default::default()
        };
        let target = env.add_library("sqlite3", opts).unwrap();
        assert_eq!(target.commands().len(), 3);
        assert_eq!(target.final_commands().count(), 1);
    }

    #[test]
    fn test_pip_module() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        let site = env.layout().site_packages().to_path_buf();

        let target = env
            .add_pip_module(
                "numpy",
                PipModuleOptions {
                    version: "1.24.0".to_string(),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(target.is_always());
        let cmd = &target.commands()[0];
        assert_eq!(cmd.step().to_string(), "python3 -m pip install numpy==1.24.0");
        assert_eq!(cmd.targets(), &[site.join("numpy")]);
        assert!(cmd.is_always());
    }

    #[test]
    fn test_zero_size_tarball_removed() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        let em = env.layout().em_folder().to_path_buf();
        fs::create_dir_all(&em).unwrap();
        fs::write(em.join("gctf-1.06.tgz"), b"").unwrap();

        env.add_package(
            "gctf",
            PackageOptions {
                version: Some("1.06".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert!(!em.join("gctf-1.06.tgz").exists());
    }

    #[test]
    fn test_missing_library_fails_install() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        let em = env.layout().em_folder().to_path_buf();
        fs::create_dir_all(em.join("cistem-1.0")).unwrap();
        fs::write(em.join("cistem-1.0.tgz"), b"tarball").unwrap();

        env.add_package(
            "cistem",
            PackageOptions {
                version: Some("1.0".to_string()),
                lib_checks: vec!["scipion-no-such-lib".to_string()],
                commands: vec![("make".to_string(), vec![PathBuf::from("bin/cistem")])],
                ..Default::default()
            },
        )
        .unwrap();

        match env.execute_targets(&names(&["cistem"])) {
            Err(BuildError::MissingLibrary(lib)) => assert_eq!(lib, "scipion-no-such-lib"),
            other => panic!("expected MissingLibrary, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_package_install_and_uninstall_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        let em = env.layout().em_folder().to_path_buf();
        env.layout().create_dirs().unwrap();
        // downloaded already
        fs::write(em.join(VOID_TGZ), b"void").unwrap();

        env.add_package(
            "tool",
            PackageOptions {
                version: Some("2.0".to_string()),
                download: DownloadOptions {
                    tar: Some(VOID_TGZ.to_string()),
                    ..Default::default()
                },
                commands: vec![("touch tool.bin".to_string(), vec![PathBuf::from("tool.bin")])],
                ..Default::default()
            },
        )
        .unwrap();

        env.execute_targets(&names(&["tool"])).unwrap();
        assert!(em.join("tool-2.0/tool.bin").exists());
        assert_eq!(fs::read_link(em.join("tool")).unwrap(), PathBuf::from("tool-2.0"));
        assert!(env.is_installed("tool", "2.0"));

        // a second run finds everything in place
        env.execute_targets(&names(&["tool"])).unwrap();

        assert!(crate::remove_package(&em, "tool-2.0").unwrap());
        assert!(fs::symlink_metadata(em.join("tool-2.0")).is_err());
        assert!(fs::symlink_metadata(em.join("tool")).is_err());
        assert!(!env.is_installed("tool", "2.0"));
    }

    #[cfg(unix)]
    #[test]
    fn test_package_extracted_into_bare_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        let em = env.layout().em_folder().to_path_buf();
        env.layout().create_dirs().unwrap();
        // downloaded and extracted already
        fs::write(em.join("gautomatch-0.56.tgz"), b"tgz").unwrap();
        fs::create_dir_all(em.join("gautomatch")).unwrap();

        env.add_package(
            "gautomatch",
            PackageOptions {
                version: Some("0.56".to_string()),
                download: DownloadOptions {
                    build_dir: Some("gautomatch".to_string()),
                    ..Default::default()
                },
                commands: vec![("touch gautomatch.bin".to_string(), vec![PathBuf::from("gautomatch.bin")])],
                ..Default::default()
            },
        )
        .unwrap();

        env.execute_targets(&names(&["gautomatch"])).unwrap();
        assert!(em.join("gautomatch/gautomatch.bin").exists());
        assert_eq!(fs::read_link(em.join("gautomatch-0.56")).unwrap(), PathBuf::from("gautomatch"));
        assert!(!fs::symlink_metadata(em.join("gautomatch")).unwrap().file_type().is_symlink());

        // a second run finds everything in place
        env.execute_targets(&names(&["gautomatch"])).unwrap();

        assert!(crate::remove_package(&em, "gautomatch-0.56").unwrap());
        assert!(fs::symlink_metadata(em.join("gautomatch-0.56")).is_err());
        assert!(fs::symlink_metadata(em.join("gautomatch")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_dashed_package_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        let em = env.layout().em_folder().to_path_buf();
        env.layout().create_dirs().unwrap();
        fs::write(em.join(VOID_TGZ), b"void").unwrap();

        env.add_package(
            "cryolo-gpu",
            PackageOptions {
                version: Some("1.7".to_string()),
                download: DownloadOptions {
                    tar: Some(VOID_TGZ.to_string()),
                    ..Default::default()
                },
                commands: vec![("touch cryolo.bin".to_string(), vec![PathBuf::from("cryolo.bin")])],
                ..Default::default()
            },
        )
        .unwrap();

        env.execute_targets(&names(&["cryolo-gpu"])).unwrap();
        assert_eq!(fs::read_link(em.join("cryolo-gpu")).unwrap(), PathBuf::from("cryolo-gpu-1.7"));

        assert!(crate::remove_package(&em, "cryolo-gpu-1.7").unwrap());
        assert!(fs::symlink_metadata(em.join("cryolo-gpu-1.7")).is_err());
        assert!(fs::symlink_metadata(em.join("cryolo-gpu")).is_err());
    }

    #[test]
    fn test_render_help_marks_installed() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        for version in ["1.0", "2.0"] {
            env.add_package(
                "tool",
                PackageOptions {
                    version: Some(version.to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        }
        fs::create_dir_all(env.layout().em("tool-1.0")).unwrap();

        let help = env.render_help();
        assert!(help.starts_with("Available binaries: ([ ] not installed, [X] seems already installed)\n\n"));
        let line = help.lines().nth(2).unwrap();
        assert_eq!(
            line,
            format!("{:<25}{:<8}[X]{:5}{:<8}[ ]{:5}", "tool", "1.0", "", "2.0", "")
        );
    }

    #[test]
    fn test_render_help_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(env_in(dir.path()).render_help(), "");
    }

    #[test]
    fn test_render_tree_and_dot() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        let log = Arc::new(Mutex::new(Vec::new()));
        recording_target(&mut env, &log, "fftw3", &[]);
        recording_target(&mut env, &log, "tiff", &[]);
        recording_target(&mut env, &log, "xmipp", &["fftw3", "tiff"]);

        let tree = env.render_tree(&names(&["xmipp"]), None).unwrap();
        assert_eq!(tree, "- xmipp\n  - fftw3\n  - tiff\n");

        let shallow = env.render_tree(&names(&["xmipp"]), Some(0)).unwrap();
        assert_eq!(shallow, "- xmipp\n");

        let dot = env.render_dot(&names(&["xmipp", "tiff"])).unwrap();
        assert_eq!(
            dot,
            "digraph libraries {\n  \"xmipp\" -> \"fftw3\"\n  \"xmipp\" -> \"tiff\"\n  \"tiff\"\n}\n"
        );
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_requested_targets() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_in(dir.path());
        env.add_target("a", true).unwrap();
        env.add_target("b", false).unwrap();
        env.add_target("c", true).unwrap();
        assert_eq!(env.requested_targets().unwrap(), names(&["a", "c"]));

        env.set_default(false);
        assert!(env.requested_targets().unwrap().is_empty());

        let env = Environment::new(
            Layout::rooted_at(dir.path()),
            EnvOptions {
                targets: names(&["missing"]),
                ..EnvOptions::default()
            },
        );
        assert!(matches!(env.requested_targets(), Err(BuildError::UnknownTarget(_))));
    }

    #[test]
    fn test_build_dir_from_tar() {
        assert_eq!(build_dir_from_tar("fftw-3.3.4.tar.gz"), "fftw-3.3.4");
        assert_eq!(build_dir_from_tar("relion-3.0.tgz"), "relion-3.0");
        assert_eq!(build_dir_from_tar("sqlite.tar"), "sqlite");
        assert_eq!(build_dir_from_tar("plain"), "plain");
    }

    #[test]
    fn test_compile_flags_prepend() {
        let flags = compile_flags(Path::new("/sw"), |k| {
            (k == "LDFLAGS").then(|| "-L/opt/lib".to_string())
        });
        assert_eq!(flags["CPPFLAGS"], "-I/sw/include ");
        assert_eq!(flags["LDFLAGS"], "-L/sw/lib -L/opt/lib");
    }
}
