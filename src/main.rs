//! stagebuild - Gentoo stage tarball and binary kernel builder.
//!
//! Builds stage3/stage4 tarballs, binary kernel packages and binary package
//! sets per architecture, then promotes them into an artifact repository.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use commands::Session;
use stagebuild::config::Settings;
use stagebuild::phase::PhaseSet;
use stagebuild::sandbox;

const PHASES_HELP: &str = "Build only these phases (comma separated): init, \
    stage3 (stage3_build, stage3_pack), kernel (kernel_init, kernel_build), \
    stage4 (stage4_build, stage4_pack), binpkgs";

#[derive(Parser)]
#[command(name = "stagebuild", version)]
#[command(about = "Gentoo stage and binary kernel builder")]
#[command(
    after_help = "QUICK START:\n  stagebuild preflight            Check the host\n  stagebuild sync                 Sync package trees\n  stagebuild -a amd64 build       Build everything for amd64\n  stagebuild -a amd64 apply       Publish the results"
)]
struct Cli {
    /// Config directory
    #[arg(short = 'c', long = "config", global = true, default_value = "config")]
    config_dir: PathBuf,

    /// Directory for sandboxes and built tarballs
    #[arg(long, global = true, default_value = "../build-tmp")]
    build_dir: PathBuf,

    /// Architectures: comma separated names, a group, or `all`
    #[arg(short, long, global = true)]
    arch: Option<String>,

    #[arg(short, long, global = true, help = PHASES_HELP)]
    phases: Option<String>,

    /// Apply changes after building all archs
    #[arg(short = 'A', long, global = true)]
    apply: bool,

    /// Parallel make jobs for kernel builds (default: all cores)
    #[arg(short = 'j', long, global = true)]
    cores: Option<usize>,

    /// Build this kernel version instead of asking portage
    #[arg(long, global = true)]
    kernel_version: Option<String>,

    /// Kernel config file (under <config>/kernel) to use instead of the arch default
    #[arg(long, global = true)]
    kernel_config: Option<String>,

    /// Send progress notifications (command from STAGEBUILD_NOTIFY_COMMAND)
    #[arg(short, long, global = true)]
    notify: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync package repositories (all when none given)
    Sync { repos: Vec<String> },

    /// Build the selected architectures
    Build,

    /// Move built tarballs and packages into the repository
    Apply,

    /// Drop binary packages whose name starts with NAME
    Delpkg { name: String },

    /// Run a command inside the sandbox
    Exec {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Render the system templates into the sandbox
    Configure,

    /// Interactive shell in the sandbox (`kernel` for the kernel sandbox)
    Shell { target: Option<String> },

    /// Check host tools, privileges and configuration
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },

    /// Compare gcc target flags between -march argument strings
    GccCompare {
        #[arg(required = true, num_args = 2.., allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    dotenvy::dotenv().ok();
    init_logging(cli.verbose);

    if let Commands::GccCompare { args } = &cli.command {
        return commands::cmd_gcc_compare(args);
    }

    sandbox::install_signal_teardown()?;

    let phases = match cli.phases.as_deref() {
        Some(list) => PhaseSet::parse(list)?,
        None => PhaseSet::default(),
    };

    let mut settings = Settings {
        config_dir: cli.config_dir,
        build_dir: cli.build_dir,
        kernel_force_version: cli.kernel_version,
        kernel_force_config: cli.kernel_config,
        notify: cli.notify,
        ..Settings::default()
    };
    if let Some(cores) = cli.cores {
        settings.cores = cores;
    }

    let session = Session::load(settings, cli.arch)?;

    match cli.command {
        Commands::Sync { repos } => commands::cmd_sync(&session, &repos)?,
        Commands::Build => commands::cmd_build(&session, &phases, cli.apply)?,
        Commands::Apply => commands::cmd_apply(&session)?,
        Commands::Delpkg { name } => commands::cmd_delpkg(&session, &name)?,
        Commands::Exec { command } => commands::cmd_exec(&session, &command)?,
        Commands::Configure => commands::cmd_configure(&session)?,
        Commands::Shell { target } => commands::cmd_shell(&session, target.as_deref())?,
        Commands::Preflight { strict } => commands::cmd_preflight(&session, strict)?,
        Commands::GccCompare { .. } => {}
    }

    Ok(())
}
