// src/build/mod.rs

//! Build driver
//!
//! Owns the mutable state of a run: it resolves the catalog into levels,
//! schedules each level onto the worker pool, walks every package through
//! its check / fetch / build / install states, records results, and
//! prints the summary. Dependencies are guaranteed to have finished (and
//! written their cache records) before a dependent starts, because a
//! level only begins once the previous level has fully drained.

pub mod order;
pub mod scripts;

use crate::cache::Cache;
use crate::config::{Config, Package};
use crate::env::{toolchain::apply_toolchain, Environment, LayeredEnv};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::pool::{StopSignal, WorkerPool};
use scripts::{script_preamble, ScriptKind};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use tracing::{debug, error, info, warn};

/// The outcome of building one package.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub package: String,
    pub success: bool,
    pub error: Option<String>,
    pub output: String,
}

/// Options controlling a build run.
#[derive(Debug, Clone, Default)]
pub struct BuilderConfig {
    /// Capture recipe output without mirroring it to stdout.
    pub quiet: bool,
    /// Stop scheduling new packages after the first failure.
    pub fail_fast: bool,
    /// Log what would be done without touching the filesystem.
    pub dry_run: bool,
    /// Run install steps even when the cache says they are current.
    pub always_install: bool,
    /// Maximum number of packages building in parallel.
    pub max_concurrency: usize,
    /// `-jN` passed to make via MAKEFLAGS (0 leaves MAKEFLAGS unset).
    pub make_jobs: usize,
}

/// Orchestrates fetching, building, and installing a package catalog.
pub struct Builder {
    cfg: BuilderConfig,
    config: Config,
    env: Environment,
    tool_env: Environment,
    artifacts_dir: PathBuf,
    sysroot: String,
    host: String,
    cache: Cache,
    fetcher: Fetcher,

    results: Mutex<Vec<BuildResult>>,
    stop: StopSignal,
    requested: HashSet<String>,
    required_by: HashMap<String, Vec<String>>,
    rebuilt: Mutex<HashSet<String>>,
}

impl Builder {
    /// Create a builder. Substitutes the toolchain configuration (undefined
    /// variables are an error), binds the cross tools, and prepares the
    /// artifacts directory.
    pub fn new(
        cfg: BuilderConfig,
        mut config: Config,
        build_dir: &Path,
        sysroot: &str,
        host: &str,
        makepkg_cmd: &str,
    ) -> Result<Self> {
        let mut env = Environment::new();
        if let Some(dir) = config.file_path.parent() {
            env.set("PKGS_ROOT", &dir.to_string_lossy());
        }
        env.set("PKGS_ARCH", &config.toolchain.effective_arch());
        env.set("BUILD_DIR", &build_dir.to_string_lossy());
        env.set("SYS_ROOT", sysroot);
        env.set("MAKEPKG", makepkg_cmd);
        if !host.is_empty() {
            env.set("PKGS_HOST", host);
        }

        let artifacts_dir = build_dir.join("artifacts");
        if !cfg.dry_run {
            fs::create_dir_all(&artifacts_dir)?;
        }
        env.set("BUILD_ARTIFACTS", &artifacts_dir.to_string_lossy());

        config.toolchain.subst(&env)?;

        let mut tool_env = Environment::empty();
        apply_toolchain(&mut tool_env, &config.toolchain);

        let cache = Cache::new(build_dir);
        let fetcher = Fetcher::new(build_dir)?;

        Ok(Self {
            cfg,
            config,
            env,
            tool_env,
            artifacts_dir,
            sysroot: sysroot.to_string(),
            host: host.to_string(),
            cache,
            fetcher,
            results: Mutex::new(Vec::new()),
            stop: StopSignal::new(),
            requested: HashSet::new(),
            required_by: HashMap::new(),
            rebuilt: Mutex::new(HashSet::new()),
        })
    }

    /// A handle that cancels the run when set (e.g. from a signal handler).
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// A snapshot of the results recorded so far.
    pub fn results(&self) -> Vec<BuildResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn has_failures(&self) -> bool {
        self.results.lock().unwrap().iter().any(|r| !r.success)
    }

    /// Build the catalog in dependency order. A non-empty `filter`
    /// restricts the run to the named packages and their transitive
    /// dependencies.
    pub fn build(&mut self, filter: &[String]) -> Result<()> {
        info!("Starting build process...");

        let base = self.env.clone();
        let catalog_dir = self
            .config
            .file_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        for pkg in &mut self.config.packages {
            pkg.subst(&base, &catalog_dir);
        }

        if !self.cfg.dry_run && !self.sysroot.is_empty() {
            fs::create_dir_all(&self.sysroot)?;
        }

        let levels = order::build_order(&self.config)?;

        let mut filter_set: HashSet<String> = HashSet::new();
        if !filter.is_empty() {
            for name in filter {
                filter_set.insert(name.clone());
                self.requested.insert(name.clone());
            }
            self.expand_filter(&mut filter_set);
        }
        self.required_by = invert_dependencies(&self.config, &filter_set);

        for level in &levels {
            if self.stop.is_set() {
                error!("Build stopped due to error (fail-fast mode)");
                return Err(Error::Stopped);
            }

            let filtered: Vec<String> = if filter_set.is_empty() {
                level.clone()
            } else {
                level
                    .iter()
                    .filter(|name| filter_set.contains(*name))
                    .cloned()
                    .collect()
            };
            if filtered.is_empty() {
                continue;
            }

            if let Err(e) = self.build_level(&filtered) {
                if self.cfg.fail_fast {
                    return Err(e);
                }
                warn!("errors occurred in build level: {}", e);
            }
        }

        Ok(())
    }

    /// Iteratively pull every transitive dependency of the requested
    /// packages into the filter set.
    fn expand_filter(&self, filter_set: &mut HashSet<String>) {
        let mut queue: Vec<String> = filter_set.iter().cloned().collect();
        while let Some(name) = queue.pop() {
            if let Some(pkg) = self.config.package(&name) {
                for dep in &pkg.depends_on {
                    if filter_set.insert(dep.clone()) {
                        queue.push(dep.clone());
                    }
                }
            }
        }
    }

    fn build_level(&self, names: &[String]) -> Result<()> {
        let errors: Mutex<Vec<Error>> = Mutex::new(Vec::new());

        thread::scope(|s| {
            let mut pool = WorkerPool::new(s, self.cfg.max_concurrency);

            for name in names {
                if self.stop.is_set() {
                    break;
                }

                let errors = &errors;
                pool.submit_with_stop(
                    move || {
                        if self.stop.is_set() {
                            return;
                        }

                        let result = match self.config.package(name) {
                            Some(pkg) => self.build_package(pkg),
                            None => Err(Error::ConfigError(format!(
                                "package {} not found",
                                name
                            ))),
                        };

                        if let Err(e) = result {
                            errors.lock().unwrap().push(e);
                            if self.cfg.fail_fast {
                                self.stop.set();
                            }
                        }
                    },
                    &self.stop,
                );
            }

            pool.wait();
        });

        let errors = errors.into_inner().unwrap();
        if errors.is_empty() {
            Ok(())
        } else {
            let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            Err(Error::BuildFailed(joined.join("; ")))
        }
    }

    /// Walk one package through check, fetch, build, and install.
    fn build_package(&self, pkg: &Package) -> Result<()> {
        let required_by = self.required_by.get(&pkg.name);
        info!(
            "Building {}{}...",
            pkg.name,
            format_required_by(required_by)
        );

        let rebuild = self.cache.needs_rebuild(pkg, &self.sysroot, &self.host);
        let reinstall = self.cfg.always_install
            || self
                .cache
                .needs_reinstall(pkg, &self.sysroot, &self.host)
                .is_some();

        if rebuild.is_none() && !reinstall {
            info!("  {} is up to date, skipping", pkg.name);
            self.record_result(&pkg.name, true, None, String::new());
            return Ok(());
        }

        // Fresh artifact exchange area for this package.
        let pkg_artifacts = self.artifacts_dir.join(&pkg.name);
        if !self.cfg.dry_run {
            if let Err(e) = fs::remove_dir_all(&pkg_artifacts) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("  Failed to clean artifacts for {}: {}", pkg.name, e);
                }
            }
            if let Err(e) = fs::create_dir_all(&pkg_artifacts) {
                warn!("  Failed to create artifacts directory for {}: {}", pkg.name, e);
            }
        }

        let source_dir = self.cache.source_dir(&pkg.name);

        let mut pkg_env = LayeredEnv::new(vec![self.env.clone()]).for_package(
            &pkg.name,
            &pkg.env,
            &self.sysroot,
            self.cfg.make_jobs,
        );
        if !pkg.native {
            pkg_env.push_layer(self.tool_env.clone());
        }
        let env_snapshot = pkg_env.snapshot();

        let mut build_output = String::new();

        if let Some(reason) = &rebuild {
            debug!("  rebuilding {}: {}", pkg.name, reason);

            match self.cache.read(&pkg.name) {
                Ok(Some(record)) if record.url != pkg.url => {
                    info!("  URL changed for {}, cleaning old build", pkg.name);
                    if !self.cfg.dry_run {
                        self.cache.clean(&pkg.name)?;
                    } else {
                        info!("  Would clean old build for {} due to URL change", pkg.name);
                    }
                }
                _ => {}
            }

            if !source_dir.exists() {
                if !self.cfg.dry_run {
                    info!("  Downloading {}...", pkg.name);
                    if let Err(e) = self.fetcher.fetch(&pkg.name, &pkg.url, &self.stop) {
                        self.record_result(&pkg.name, false, Some(e.to_string()), String::new());
                        return Err(e);
                    }
                } else {
                    info!("  Would download and extract {}", pkg.name);
                }
            }

            info!("  Compiling {}...", pkg.name);
            debug!("=== Build environment for {} ===", pkg.name);
            log_environment(&env_snapshot);

            if !self.cfg.dry_run {
                let (output, status) =
                    self.run_recipe(&pkg.name, ScriptKind::Build, &pkg.build, &env_snapshot);
                if let Err(e) = status {
                    self.record_result(&pkg.name, false, Some(e.to_string()), output);
                    return Err(e);
                }
                build_output = output;

                if let Err(e) = self.cache.write_build(pkg, &self.sysroot, &self.host) {
                    warn!("failed to write build cache for {}: {}", pkg.name, e);
                }
                if let Err(e) = self.cache.invalidate_dependents(&pkg.name, &self.config) {
                    warn!("failed to invalidate dependents of {}: {}", pkg.name, e);
                }
            } else {
                info!("  Would run build commands:");
                for line in pkg.build.lines().filter(|l| !l.trim().is_empty()) {
                    info!("    {}", line);
                }
            }

            self.rebuilt.lock().unwrap().insert(pkg.name.clone());
        } else {
            info!("  {} is already built, reinstalling to new sysroot...", pkg.name);
        }

        info!("  Installing {}...", pkg.name);
        debug!("=== Install environment for {} ===", pkg.name);
        log_environment(&env_snapshot);

        let mut install_output = String::new();
        if !self.cfg.dry_run {
            let (output, status) =
                self.run_recipe(&pkg.name, ScriptKind::Install, &pkg.install, &env_snapshot);
            install_output = output;
            if let Err(e) = status {
                let combined = format!("{}\n{}", build_output, install_output);
                self.record_result(&pkg.name, false, Some(e.to_string()), combined);
                return Err(e);
            }

            if let Err(e) = self.cache.write_install(pkg, &self.sysroot, &self.host) {
                warn!("failed to write install cache for {}: {}", pkg.name, e);
            }
        } else {
            info!("  Would run install commands:");
            for line in pkg.install.lines().filter(|l| !l.trim().is_empty()) {
                info!("    {}", line);
            }
        }

        let combined = format!("{}\n{}", build_output, install_output);
        self.record_result(&pkg.name, true, None, combined);
        info!("  {} built successfully", pkg.name);
        Ok(())
    }

    /// Run a recipe under `bash -c` in the package's source directory.
    /// Returns the captured output alongside the exit status; when not in
    /// quiet mode the output is also mirrored to stdout as it arrives.
    fn run_recipe(
        &self,
        pkg_name: &str,
        kind: ScriptKind,
        script: &str,
        env: &[String],
    ) -> (String, Result<()>) {
        let source_dir = self.cache.source_dir(pkg_name);
        debug!("Running {} script in directory: {}", kind, source_dir.display());
        debug!("Script content:\n{}", script);

        let full_script = format!("{}{}", script_preamble(kind), script);
        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(&full_script)
            .current_dir(&source_dir)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for entry in env {
            if let Some((key, value)) = entry.split_once('=') {
                cmd.env(key, value);
            }
        }

        let script_error = |reason: String| Error::ScriptError {
            package: pkg_name.to_string(),
            kind: kind.to_string(),
            reason,
        };

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return (
                    String::new(),
                    Err(script_error(format!("failed to start bash: {}", e))),
                )
            }
        };

        let captured = Mutex::new(String::new());
        let mirror = !self.cfg.quiet;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        thread::scope(|s| {
            if let Some(stream) = stdout {
                let sink = &captured;
                s.spawn(move || tee_stream(stream, sink, mirror));
            }
            if let Some(stream) = stderr {
                let sink = &captured;
                s.spawn(move || tee_stream(stream, sink, mirror));
            }
        });

        let status = match child.wait() {
            Ok(status) => status,
            Err(e) => {
                return (
                    captured.into_inner().unwrap(),
                    Err(script_error(format!("failed to wait for bash: {}", e))),
                )
            }
        };

        let output = captured.into_inner().unwrap();
        if status.success() {
            debug!("{} script for {} completed successfully", kind, pkg_name);
            (output, Ok(()))
        } else {
            let reason = match status.code() {
                Some(code) => format!("exited with status {}", code),
                None => "terminated by signal".to_string(),
            };
            (output, Err(script_error(reason)))
        }
    }

    /// Clean package build state. Tries the package's own clean recipe,
    /// falls back to `make clean`, and finally removes the source tree.
    /// Whatever succeeds, the cache record is invalidated. Best-effort:
    /// failures are warnings.
    pub fn clean(&self, filter: &[String]) -> Result<()> {
        info!("Cleaning packages...");

        let filter_set: HashSet<&str> = filter.iter().map(String::as_str).collect();

        thread::scope(|s| {
            let mut pool = WorkerPool::new(s, self.cfg.max_concurrency);
            for pkg in &self.config.packages {
                if !filter_set.is_empty() && !filter_set.contains(pkg.name.as_str()) {
                    continue;
                }
                pool.submit(move || {
                    if let Err(e) = self.clean_package(pkg) {
                        warn!("failed to clean {}: {}", pkg.name, e);
                    }
                });
            }
            pool.wait();
        });

        Ok(())
    }

    fn clean_package(&self, pkg: &Package) -> Result<()> {
        info!("Cleaning {}...", pkg.name);

        let source_dir = self.cache.source_dir(&pkg.name);
        if !source_dir.exists() {
            info!("  No source directory found for {}, skipping", pkg.name);
            return Ok(());
        }

        let clean_env = LayeredEnv::new(vec![self.env.clone()])
            .for_package(&pkg.name, &pkg.env, &self.sysroot, self.cfg.make_jobs)
            .snapshot();

        if !pkg.clean.is_empty() {
            info!("  Running custom clean script for {}...", pkg.name);
            let (_, status) =
                self.run_recipe(&pkg.name, ScriptKind::Clean, &pkg.clean, &clean_env);
            if status.is_ok() {
                self.invalidate_quietly(&pkg.name);
                info!("  {} cleaned successfully", pkg.name);
                return Ok(());
            }
            warn!("Custom clean script failed, trying make clean...");
        }

        info!("  Running 'make clean' for {}...", pkg.name);
        let (_, status) = self.run_recipe(&pkg.name, ScriptKind::Clean, "make clean", &clean_env);
        if status.is_ok() {
            self.invalidate_quietly(&pkg.name);
            info!("  {} cleaned successfully", pkg.name);
            return Ok(());
        }
        warn!("'make clean' failed, removing source directory...");

        info!("  Removing source directory for {}...", pkg.name);
        fs::remove_dir_all(&source_dir)?;

        self.invalidate_quietly(&pkg.name);
        info!("  {} cleaned successfully", pkg.name);
        Ok(())
    }

    fn invalidate_quietly(&self, pkg_name: &str) {
        if let Err(e) = self.cache.invalidate(pkg_name) {
            warn!("failed to invalidate cache for {}: {}", pkg_name, e);
        }
    }

    /// Print a per-package summary in catalog order, then totals.
    pub fn print_summary(&self) {
        let separator = "=".repeat(60);
        println!();
        println!("{}", separator);
        println!("Build Summary");
        println!("{}", separator);

        let results = self.results.lock().unwrap();
        let by_name: HashMap<&str, &BuildResult> = results
            .iter()
            .map(|r| (r.package.as_str(), r))
            .collect();
        let rebuilt = self.rebuilt.lock().unwrap();

        let mut success_count = 0;
        let mut fail_count = 0;

        for pkg in &self.config.packages {
            let Some(result) = by_name.get(pkg.name.as_str()) else {
                continue;
            };

            let is_dependency = !self.requested.is_empty() && !self.requested.contains(&pkg.name);
            let mut label = String::new();
            if is_dependency {
                label.push_str(" (dependency)");
            }
            if self.cfg.dry_run && rebuilt.contains(&pkg.name) {
                label.push_str(" (would rebuild)");
            }

            if result.success {
                success_count += 1;
                println!("✓ {}{}", result.package, label);
            } else {
                fail_count += 1;
                println!(
                    "✗ {}{}: {}",
                    result.package,
                    label,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }

        println!("{}", separator);
        println!(
            "Total: {} | Success: {} | Failed: {}",
            results.len(),
            success_count,
            fail_count
        );
        println!("{}", separator);
    }

    fn record_result(&self, pkg_name: &str, success: bool, error: Option<String>, output: String) {
        self.results.lock().unwrap().push(BuildResult {
            package: pkg_name.to_string(),
            success,
            error,
            output,
        });
    }
}

/// Invert `depends_on` over the filter closure (or the whole catalog when
/// the filter is empty), for "required by" log decoration.
fn invert_dependencies(
    config: &Config,
    filter_set: &HashSet<String>,
) -> HashMap<String, Vec<String>> {
    let mut required_by: HashMap<String, Vec<String>> = HashMap::new();
    for pkg in &config.packages {
        if !filter_set.is_empty() && !filter_set.contains(&pkg.name) {
            continue;
        }
        for dep in &pkg.depends_on {
            if filter_set.is_empty() || filter_set.contains(dep) {
                required_by
                    .entry(dep.clone())
                    .or_default()
                    .push(pkg.name.clone());
            }
        }
    }
    required_by
}

fn format_required_by(required_by: Option<&Vec<String>>) -> String {
    let Some(names) = required_by else {
        return String::new();
    };
    if names.is_empty() {
        return String::new();
    }
    if names.len() > 6 {
        let displayed = names[..5].join(", ");
        return format!(" (required by {}, and +{} more)", displayed, names.len() - 5);
    }
    format!(" (required by {})", names.join(", "))
}

/// Variables worth showing when dumping a recipe environment at debug
/// level.
const LOGGED_VARS: &[&str] = &[
    "PATH",
    "CC",
    "CXX",
    "AR",
    "LD",
    "AS",
    "NM",
    "RANLIB",
    "STRIP",
    "CFLAGS",
    "CXXFLAGS",
    "LDFLAGS",
    "CPPFLAGS",
    "PKG_CONFIG_PATH",
    "PKG_CONFIG_SYSROOT_DIR",
    "SYS_ROOT",
    "PKGS_HOST",
    "LIBRARY_PATH",
    "LD_LIBRARY_PATH",
    "BUILD_ARTIFACTS",
    "MAKEPKG",
];

fn log_environment(env: &[String]) {
    for var in LOGGED_VARS {
        if let Some(entry) = env
            .iter()
            .find(|e| e.split_once('=').map(|(k, _)| k == *var).unwrap_or(false))
        {
            debug!("  {}", entry);
        }
    }
}

/// Copy a child stream into the shared capture buffer line by line,
/// optionally mirroring it to stdout as it arrives.
fn tee_stream(stream: impl Read, sink: &Mutex<String>, mirror: bool) {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                if mirror {
                    print!("{}", text);
                    let _ = io::stdout().flush();
                }
                sink.lock().unwrap().push_str(&text);
            }
        }
    }
}
