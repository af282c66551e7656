//! Scipion - install plugins and the binaries they depend on.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use miette::Result;
use std::io;
use std::path::PathBuf;

mod commands;
mod session;

use commands::EngineFlags;
use session::Session;

#[derive(Parser)]
#[command(name = "scipion")]
#[command(version, about = "Install Scipion plugins and their binaries", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct GlobalOptions {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress log output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Path to scipion.toml
    #[arg(long, global = true, env = "SCIPION_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Install plugins, and their default binaries
    #[command(visible_alias = "installp")]
    InstallPlugin {
        /// Plugin pip name, optionally followed by a version (repeatable)
        #[arg(
            short = 'p',
            long = "plugin",
            num_args = 1..=2,
            value_names = ["NAME", "VERSION"],
            action = clap::ArgAction::Append
        )]
        plugin: Vec<Vec<String>>,

        /// Install the pip modules only, without binaries
        #[arg(long = "noBin")]
        no_bin: bool,

        /// List plugins that have a newer compatible release
        #[arg(long = "checkUpdates")]
        check_updates: bool,

        /// Treat each -p value as a local path or a git URL
        #[arg(long)]
        devel: bool,

        #[command(flatten)]
        engine: EngineFlags,
    },

    /// Uninstall plugins and their binaries
    #[command(visible_alias = "uninstallp")]
    UninstallPlugin {
        /// Plugin pip name (repeatable)
        #[arg(short = 'p', long = "plugin")]
        plugin: Vec<String>,

        /// Keep the plugin binaries
        #[arg(long = "noBin")]
        no_bin: bool,
    },

    /// Install binaries by name, optionally versioned (relion-4.0)
    #[command(name = "installb")]
    InstallBin {
        bins: Vec<String>,

        #[command(flatten)]
        engine: EngineFlags,
    },

    /// Uninstall binaries by name, optionally versioned (relion-4.0)
    #[command(name = "uninstallb")]
    UninstallBin {
        #[arg(required = true)]
        bins: Vec<String>,
    },

    /// List the binaries every installed plugin defines
    #[command(name = "listb")]
    ListBin,

    /// List the plugins of the catalog
    Plugins {
        /// Only installed plugins, with their binaries
        #[arg(long)]
        bins: bool,

        /// Flag installed plugins with a newer release
        #[arg(long)]
        updates: bool,
    },

    /// Update the Scipion core distributions
    Update {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup error handling
    scipion_diagnostics::setup();

    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.global.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    if !cli.global.quiet {
        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_target(false)
            .init();
    }

    if cli.global.no_color {
        console::set_colors_enabled(false);
    }

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        let bin_name = cmd.get_name().to_string();
        generate(shell, &mut cmd, bin_name, &mut io::stdout());
        return Ok(());
    }

    let session = Session::load(cli.global.config.as_deref())?;

    let ok = match cli.command {
        Commands::InstallPlugin {
            plugin,
            no_bin,
            check_updates,
            devel,
            engine,
        } => {
            let requests = commands::PluginRequest::parse_all(plugin);
            if check_updates {
                commands::list_plugins(&session, false, true).await?
            } else if devel {
                commands::install_devel_plugins(&session, &requests, no_bin, &engine)?
            } else {
                commands::install_plugins(&session, &requests, no_bin, &engine).await?
            }
        }
        Commands::UninstallPlugin { plugin, no_bin } => commands::uninstall_plugins(&session, &plugin, no_bin)?,
        Commands::InstallBin { bins, engine } => commands::install_bins(&session, &bins, &engine)?,
        Commands::UninstallBin { bins } => commands::uninstall_bins(&session, &bins)?,
        Commands::ListBin => commands::list_bins(&session),
        Commands::Plugins { bins, updates } => commands::list_plugins(&session, bins, updates).await?,
        Commands::Update { yes } => commands::update(&session, yes).await?,
        Commands::Completions { .. } => true,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
