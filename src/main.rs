// src/main.rs

//! makepkg - CLI entry point

use anyhow::{Context, Result};
use clap::Parser;
use makepkg::config::{self, load_config, load_toolchain, merge_toolchain};
use makepkg::{Builder, BuilderConfig};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "makepkg")]
#[command(version)]
#[command(about = "A generic build system for system packages", long_about = None)]
struct Cli {
    /// Read FILE as the package configuration file
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    file: Option<PathBuf>,

    /// Read FILE as the toolchain configuration file
    #[arg(short = 't', long = "toolchain", value_name = "FILE")]
    toolchain: Option<PathBuf>,

    /// The PATH to use as the sysroot when installing and building
    #[arg(short = 's', long = "sysroot", value_name = "PATH")]
    sysroot: Option<PathBuf>,

    /// The PATH to the directory where packages should be built
    #[arg(short = 'b', long = "builddir", value_name = "PATH", default_value = "build")]
    builddir: PathBuf,

    /// The target ARCH to build for (e.g., x86_64)
    #[arg(short = 'a', long = "arch", value_name = "ARCH")]
    arch: Option<String>,

    /// The target HOST to build for (e.g., x86_64-linux-musl)
    #[arg(short = 'H', long = "host", value_name = "HOST")]
    host: Option<String>,

    /// The maximum concurrency N for building packages
    #[arg(short = 'j', long = "jobs", value_name = "N", default_value_t = 1)]
    jobs: usize,

    /// The number of jobs N for each make invocation
    #[arg(short = 'm', long = "make-jobs", value_name = "N", default_value_t = 1)]
    make_jobs: usize,

    /// Do not log build output, only info and summary
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Stop building immediately on first error
    #[arg(short = 'F', long = "fail-fast")]
    fail_fast: bool,

    /// Print what would be done without actually building
    #[arg(short = 'n', long = "dry-run")]
    dry_run: bool,

    /// Enable verbose debug logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// List all package names from the configuration
    #[arg(long = "list")]
    list: bool,

    /// Clean package builds instead of building them
    #[arg(long = "clean")]
    clean: bool,

    /// Clean then build packages (force rebuild)
    #[arg(short = 'B', long = "always-make")]
    always_make: bool,

    /// Always reinstall packages ignoring cache
    #[arg(short = 'I', long = "always-install")]
    always_install: bool,

    /// One or more packages to build/clean (default: all packages)
    #[arg(value_name = "PACKAGE")]
    packages: Vec<String>,
}

impl Cli {
    /// The command line recipes use to re-invoke this process (exported as
    /// `MAKEPKG`). Sticky options are carried over; one-shot options and
    /// package targets are intentionally excluded.
    fn makepkg_command(&self, config: &config::Config) -> Result<String> {
        let exe = std::env::current_exe().context("failed to get executable path")?;
        let exe = std::fs::canonicalize(&exe).unwrap_or(exe);

        let mut parts = vec![exe.to_string_lossy().into_owned()];
        parts.push(format!("--file={}", config.file_path.display()));
        if !config.toolchain.file_path.as_os_str().is_empty() {
            parts.push(format!(
                "--toolchain={}",
                config.toolchain.file_path.display()
            ));
        }
        if let Some(sysroot) = &self.sysroot {
            parts.push(format!("--sysroot={}", sysroot.display()));
        }
        parts.push(format!("--builddir={}", self.builddir.display()));
        if let Some(arch) = &self.arch {
            parts.push(format!("--arch={}", arch));
        }
        if let Some(host) = &self.host {
            parts.push(format!("--host={}", host));
        }
        if self.jobs > 1 {
            parts.push(format!("--jobs={}", self.jobs));
        }
        if self.make_jobs > 1 {
            parts.push(format!("--make-jobs={}", self.make_jobs));
        }
        if self.quiet {
            parts.push("--quiet".to_string());
        }
        if self.fail_fast {
            parts.push("--fail-fast".to_string());
        }
        if self.verbose {
            parts.push("--verbose".to_string());
        }

        Ok(parts.join(" "))
    }
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    match run(cli) {
        Ok(failed) => {
            if failed {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns whether any package failed.
fn run(cli: Cli) -> Result<bool> {
    let build_dir = std::path::absolute(&cli.builddir).context("resolving build directory")?;
    std::fs::create_dir_all(&build_dir).context("creating build directory")?;

    let sysroot = match &cli.sysroot {
        Some(path) => std::path::absolute(path)
            .context("resolving sysroot")?
            .to_string_lossy()
            .into_owned(),
        None => String::new(),
    };

    let mut config = load_config(cli.file.as_deref()).context("loading configuration")?;

    if let Some(toolchain) =
        load_toolchain(cli.toolchain.as_deref()).context("loading toolchain configuration")?
    {
        config.toolchain = merge_toolchain(&config.toolchain, &toolchain);
    }
    if let Some(arch) = &cli.arch {
        config.toolchain.arch = arch.clone();
    }
    if let Some(host) = &cli.host {
        config.toolchain.host = host.clone();
    }
    let host = config.toolchain.host.clone();

    if cli.list {
        for pkg in &config.packages {
            println!("{}", pkg.name);
        }
        return Ok(false);
    }

    for name in &cli.packages {
        if config.package(name).is_none() {
            anyhow::bail!("package '{}' not found in configuration", name);
        }
    }

    if cli.sysroot.is_none() && !cli.dry_run && !cli.clean {
        warn!("No sysroot specified. Packages will be installed to system root (/).");
        print!("This may modify your system. Continue? [y/N]: ");
        io::stdout().flush().context("flushing stdout")?;

        let mut response = String::new();
        io::stdin()
            .lock()
            .read_line(&mut response)
            .context("reading input")?;
        let response = response.trim().to_lowercase();
        if response != "y" && response != "yes" {
            info!("Aborted.");
            return Ok(false);
        }
    }

    if cli.packages.is_empty() {
        info!(
            "Loaded {} packages from {}",
            config.packages.len(),
            config.file_path.display()
        );
    } else {
        info!(
            "Loaded {} packages from {} (filtered to {})",
            config.packages.len(),
            config.file_path.display(),
            cli.packages.len()
        );
    }
    if !sysroot.is_empty() {
        info!("Using sysroot: {}", sysroot);
    }
    info!("Concurrency: {}", cli.jobs);

    let makepkg_cmd = cli.makepkg_command(&config)?;

    let builder_cfg = BuilderConfig {
        quiet: cli.quiet,
        fail_fast: cli.fail_fast,
        dry_run: cli.dry_run,
        always_install: cli.always_install,
        max_concurrency: cli.jobs,
        make_jobs: cli.make_jobs,
    };

    let mut builder = Builder::new(builder_cfg, config, &build_dir, &sysroot, &host, &makepkg_cmd)
        .context("creating builder")?;

    let stop = builder.stop_signal();
    let signals_seen = Arc::new(AtomicUsize::new(0));
    ctrlc::set_handler(move || {
        if signals_seen.fetch_add(1, Ordering::SeqCst) == 0 {
            stop.set();
        } else {
            // Second signal: give up waiting for in-flight recipes.
            std::process::exit(1);
        }
    })
    .context("installing signal handler")?;

    if cli.always_make {
        if let Err(e) = builder.clean(&cli.packages) {
            error!("Clean process encountered errors: {}", e);
        }
        if let Err(e) = builder.build(&cli.packages) {
            error!("Build process encountered errors: {}", e);
        }
        builder.print_summary();
    } else if cli.clean {
        if let Err(e) = builder.clean(&cli.packages) {
            error!("Clean process encountered errors: {}", e);
        }
    } else {
        if let Err(e) = builder.build(&cli.packages) {
            error!("Build process encountered errors: {}", e);
        }
        builder.print_summary();
    }

    Ok(builder.has_failures())
}
