// tests/build_flow.rs

//! End-to-end build driver scenarios against a temporary build tree.
//!
//! Sources are pre-seeded on disk so no network is involved; recipes are
//! small bash fragments that leave markers in the source directory.

use makepkg::config::{Config, Package};
use makepkg::{Builder, BuilderConfig};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn pkg(name: &str, build: &str, install: &str, deps: &[&str]) -> Package {
    Package {
        name: name.to_string(),
        url: format!("https://example.com/{}-1.0.tar.gz", name),
        build: build.to_string(),
        install: install.to_string(),
        depends_on: deps.iter().map(|d| d.to_string()).collect(),
        ..Package::default()
    }
}

fn counting_pkg(name: &str, deps: &[&str]) -> Package {
    pkg(
        name,
        "echo x >> build_count.txt",
        "echo x >> install_count.txt",
        deps,
    )
}

fn catalog(temp: &TempDir, packages: Vec<Package>) -> Config {
    Config {
        file_path: temp.path().join("packages.yaml"),
        packages,
        ..Config::default()
    }
}

fn seed_source(build_dir: &Path, name: &str) {
    fs::create_dir_all(build_dir.join(name).join("source")).unwrap();
}

fn new_builder(config: Config, build_dir: &Path, cfg: BuilderConfig) -> Builder {
    Builder::new(cfg, config, build_dir, "", "", "makepkg").unwrap()
}

fn quiet_config() -> BuilderConfig {
    BuilderConfig {
        quiet: true,
        max_concurrency: 2,
        make_jobs: 1,
        ..BuilderConfig::default()
    }
}

fn count_lines(path: &Path) -> usize {
    fs::read_to_string(path)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[test]
fn test_build_runs_recipes_and_writes_cache() {
    let temp = TempDir::new().unwrap();
    let build_dir = temp.path().join("build");
    let config = catalog(
        &temp,
        vec![counting_pkg("alpha", &[]), counting_pkg("beta", &["alpha"])],
    );
    seed_source(&build_dir, "alpha");
    seed_source(&build_dir, "beta");

    let mut builder = new_builder(config, &build_dir, quiet_config());
    builder.build(&[]).unwrap();

    assert!(!builder.has_failures());
    for name in ["alpha", "beta"] {
        let source = build_dir.join(name).join("source");
        assert_eq!(count_lines(&source.join("build_count.txt")), 1);
        assert_eq!(count_lines(&source.join("install_count.txt")), 1);
        assert!(build_dir.join(name).join("makepkg.json").exists());
        assert!(build_dir.join("artifacts").join(name).exists());
    }

    let results = builder.results();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.success));
}

#[test]
fn test_second_run_is_up_to_date() {
    let temp = TempDir::new().unwrap();
    let build_dir = temp.path().join("build");
    let packages = vec![counting_pkg("alpha", &[])];
    seed_source(&build_dir, "alpha");

    let mut builder = new_builder(catalog(&temp, packages.clone()), &build_dir, quiet_config());
    builder.build(&[]).unwrap();

    let mut builder = new_builder(catalog(&temp, packages), &build_dir, quiet_config());
    builder.build(&[]).unwrap();

    assert!(!builder.has_failures());
    let source = build_dir.join("alpha").join("source");
    assert_eq!(count_lines(&source.join("build_count.txt")), 1);
    assert_eq!(count_lines(&source.join("install_count.txt")), 1);
}

#[test]
fn test_build_recipe_change_rebuilds_dependents() {
    let temp = TempDir::new().unwrap();
    let build_dir = temp.path().join("build");
    let packages = vec![counting_pkg("alpha", &[]), counting_pkg("beta", &["alpha"])];
    seed_source(&build_dir, "alpha");
    seed_source(&build_dir, "beta");

    let mut builder = new_builder(catalog(&temp, packages.clone()), &build_dir, quiet_config());
    builder.build(&[]).unwrap();

    // Change alpha's build recipe only.
    let mut changed = packages.clone();
    changed[0].build = "echo x >> build_count.txt # v2".to_string();

    let mut builder = new_builder(catalog(&temp, changed), &build_dir, quiet_config());
    builder.build(&[]).unwrap();

    assert!(!builder.has_failures());
    // Alpha rebuilt, and beta was invalidated transitively and rebuilt in
    // the same run.
    let alpha = build_dir.join("alpha").join("source");
    let beta = build_dir.join("beta").join("source");
    assert_eq!(count_lines(&alpha.join("build_count.txt")), 2);
    assert_eq!(count_lines(&beta.join("build_count.txt")), 2);
}

#[test]
fn test_install_recipe_change_reinstalls_only() {
    let temp = TempDir::new().unwrap();
    let build_dir = temp.path().join("build");
    let packages = vec![counting_pkg("alpha", &[])];
    seed_source(&build_dir, "alpha");

    let mut builder = new_builder(catalog(&temp, packages.clone()), &build_dir, quiet_config());
    builder.build(&[]).unwrap();

    let mut changed = packages;
    changed[0].install = "echo x >> install_count.txt # v2".to_string();

    let mut builder = new_builder(catalog(&temp, changed), &build_dir, quiet_config());
    builder.build(&[]).unwrap();

    assert!(!builder.has_failures());
    let source = build_dir.join("alpha").join("source");
    assert_eq!(count_lines(&source.join("build_count.txt")), 1);
    assert_eq!(count_lines(&source.join("install_count.txt")), 2);
}

#[test]
fn test_always_install_reruns_install_only() {
    let temp = TempDir::new().unwrap();
    let build_dir = temp.path().join("build");
    let packages = vec![counting_pkg("alpha", &[])];
    seed_source(&build_dir, "alpha");

    let mut builder = new_builder(catalog(&temp, packages.clone()), &build_dir, quiet_config());
    builder.build(&[]).unwrap();

    let cfg = BuilderConfig {
        always_install: true,
        ..quiet_config()
    };
    let mut builder = new_builder(catalog(&temp, packages), &build_dir, cfg);
    builder.build(&[]).unwrap();

    let source = build_dir.join("alpha").join("source");
    assert_eq!(count_lines(&source.join("build_count.txt")), 1);
    assert_eq!(count_lines(&source.join("install_count.txt")), 2);
}

#[test]
fn test_fail_fast_stops_later_levels() {
    let temp = TempDir::new().unwrap();
    let build_dir = temp.path().join("build");
    let config = catalog(
        &temp,
        vec![
            pkg("alpha", "exit 1", "echo done", &[]),
            counting_pkg("beta", &["alpha"]),
        ],
    );
    seed_source(&build_dir, "alpha");
    seed_source(&build_dir, "beta");

    let cfg = BuilderConfig {
        fail_fast: true,
        ..quiet_config()
    };
    let mut builder = new_builder(config, &build_dir, cfg);
    assert!(builder.build(&[]).is_err());

    let results = builder.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].package, "alpha");
    assert!(!results[0].success);
    // Beta never ran.
    assert!(!build_dir
        .join("beta")
        .join("source")
        .join("build_count.txt")
        .exists());
}

#[test]
fn test_failure_without_fail_fast_continues() {
    let temp = TempDir::new().unwrap();
    let build_dir = temp.path().join("build");
    let config = catalog(
        &temp,
        vec![
            pkg("alpha", "exit 1", "echo done", &[]),
            counting_pkg("gamma", &[]),
        ],
    );
    seed_source(&build_dir, "alpha");
    seed_source(&build_dir, "gamma");

    let mut builder = new_builder(config, &build_dir, quiet_config());
    builder.build(&[]).unwrap();

    assert!(builder.has_failures());
    let results = builder.results();
    assert_eq!(results.len(), 2);
    assert!(results.iter().any(|r| r.package == "gamma" && r.success));

    let failed = results.iter().find(|r| r.package == "alpha").unwrap();
    assert!(failed.error.as_deref().unwrap_or("").contains("build script"));
}

#[test]
fn test_filter_includes_dependencies_only() {
    let temp = TempDir::new().unwrap();
    let build_dir = temp.path().join("build");
    let config = catalog(
        &temp,
        vec![
            counting_pkg("alpha", &[]),
            counting_pkg("beta", &["alpha"]),
            counting_pkg("gamma", &[]),
        ],
    );
    seed_source(&build_dir, "alpha");
    seed_source(&build_dir, "beta");
    seed_source(&build_dir, "gamma");

    let mut builder = new_builder(config, &build_dir, quiet_config());
    builder.build(&["beta".to_string()]).unwrap();

    let results = builder.results();
    let names: Vec<&str> = results.iter().map(|r| r.package.as_str()).collect();
    assert!(names.contains(&"alpha"));
    assert!(names.contains(&"beta"));
    assert!(!names.contains(&"gamma"));
}

#[test]
fn test_dry_run_touches_nothing() {
    let temp = TempDir::new().unwrap();
    let build_dir = temp.path().join("build");
    let config = catalog(&temp, vec![counting_pkg("alpha", &[])]);
    seed_source(&build_dir, "alpha");

    let cfg = BuilderConfig {
        dry_run: true,
        ..quiet_config()
    };
    let mut builder = new_builder(config, &build_dir, cfg);
    builder.build(&[]).unwrap();

    assert!(!builder.has_failures());
    let source = build_dir.join("alpha").join("source");
    assert!(!source.join("build_count.txt").exists());
    assert!(!build_dir.join("alpha").join("makepkg.json").exists());
}

#[test]
fn test_recipe_env_sees_package_variables() {
    let temp = TempDir::new().unwrap();
    let build_dir = temp.path().join("build");

    let mut package = pkg(
        "alpha",
        "echo \"$PKG_NAME:$GREETING\" > env_probe.txt",
        "true",
        &[],
    );
    package.env = vec!["GREETING=hello".to_string()];

    let config = catalog(&temp, vec![package]);
    seed_source(&build_dir, "alpha");

    let mut builder = new_builder(config, &build_dir, quiet_config());
    builder.build(&[]).unwrap();

    let probe = build_dir.join("alpha").join("source").join("env_probe.txt");
    assert_eq!(fs::read_to_string(probe).unwrap().trim(), "alpha:hello");
}

#[test]
fn test_recipe_output_is_captured() {
    let temp = TempDir::new().unwrap();
    let build_dir = temp.path().join("build");
    let config = catalog(
        &temp,
        vec![pkg("alpha", "echo building-now", "echo installing-now", &[])],
    );
    seed_source(&build_dir, "alpha");

    let mut builder = new_builder(config, &build_dir, quiet_config());
    builder.build(&[]).unwrap();

    let results = builder.results();
    assert!(results[0].output.contains("building-now"));
    assert!(results[0].output.contains("installing-now"));
}

#[test]
fn test_clean_removes_cache_via_recipe() {
    let temp = TempDir::new().unwrap();
    let build_dir = temp.path().join("build");

    let mut package = counting_pkg("alpha", &[]);
    package.clean = "rm -f build_count.txt install_count.txt".to_string();
    let packages = vec![package];
    seed_source(&build_dir, "alpha");

    let mut builder = new_builder(catalog(&temp, packages.clone()), &build_dir, quiet_config());
    builder.build(&[]).unwrap();
    assert!(build_dir.join("alpha").join("makepkg.json").exists());

    let builder = new_builder(catalog(&temp, packages), &build_dir, quiet_config());
    builder.clean(&[]).unwrap();

    // The clean recipe succeeded, so the source tree survives but the
    // cache record is gone.
    assert!(build_dir.join("alpha").join("source").exists());
    assert!(!build_dir.join("alpha").join("makepkg.json").exists());
}

#[test]
fn test_sysroot_environment_reaches_recipes() {
    let temp = TempDir::new().unwrap();
    let build_dir = temp.path().join("build");
    let sysroot = temp.path().join("sysroot");

    let config = catalog(
        &temp,
        vec![pkg(
            "alpha",
            "echo \"$PKG_CONFIG_SYSROOT_DIR\" > sysroot_probe.txt",
            "true",
            &[],
        )],
    );
    seed_source(&build_dir, "alpha");

    let mut builder = Builder::new(
        quiet_config(),
        config,
        &build_dir,
        &sysroot.to_string_lossy(),
        "x86_64-linux-musl",
        "makepkg",
    )
    .unwrap();
    builder.build(&[]).unwrap();

    assert!(sysroot.exists());
    let probe = build_dir.join("alpha").join("source").join("sysroot_probe.txt");
    assert_eq!(
        fs::read_to_string(probe).unwrap().trim(),
        sysroot.to_string_lossy()
    );
}
