// src/config/mod.rs

//! Package catalog configuration
//!
//! A catalog file (YAML or TOML) declares the packages to build: where to
//! fetch each one, the shell recipes to build and install it, its
//! environment entries, and its dependency edges. The catalog may also
//! carry an inline `toolchain` section; a standalone toolchain file
//! overrides it field by field.

mod toolchain;

pub use toolchain::{load_toolchain, merge_toolchain, Toolchain};

use crate::env::Environment;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A single package definition.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Package {
    pub name: String,
    pub url: String,
    pub build: String,
    pub install: String,
    #[serde(default)]
    pub clean: String,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Host-native build: toolchain variables are not layered into the
    /// recipe environment.
    #[serde(default)]
    pub native: bool,
}

impl Package {
    /// Substitute `${VAR}` in every recipe-bearing field, once, at load
    /// time. The package's own name and URL are visible as `PKG_NAME` and
    /// `PKG_URL`, and the catalog's directory as `FILE_DIR`. Undefined
    /// names stay literal.
    pub fn subst(&mut self, base: &Environment, catalog_dir: &Path) {
        let mut env = base.clone();
        env.set("PKG_NAME", &self.name);
        env.set("PKG_URL", &self.url);
        env.set("FILE_DIR", &catalog_dir.to_string_lossy());

        self.url = env.subst(&self.url);
        self.build = env.subst(&self.build);
        self.install = env.subst(&self.install);
        self.clean = env.subst(&self.clean);
        for entry in &mut self.env {
            *entry = env.subst(entry);
        }
    }
}

/// The parsed catalog.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub file_path: PathBuf,
    #[serde(default)]
    pub toolchain: Toolchain,
    #[serde(default)]
    pub packages: Vec<Package>,
}

impl Config {
    /// Find a package by name.
    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.name == name)
    }

    /// Validate the catalog: names are unique and non-empty, recipes are
    /// present, every dependency references a defined package, no package
    /// depends on itself, and the dependency graph is acyclic.
    pub fn validate(&self) -> Result<()> {
        if self.packages.is_empty() {
            return Err(Error::ConfigError("no packages defined".to_string()));
        }

        let mut names: Vec<&str> = Vec::new();
        for (i, pkg) in self.packages.iter().enumerate() {
            if pkg.name.is_empty() {
                return Err(Error::ConfigError(format!(
                    "package at index {} missing name",
                    i
                )));
            }
            if names.contains(&pkg.name.as_str()) {
                return Err(Error::ConfigError(format!(
                    "duplicate package name: {}",
                    pkg.name
                )));
            }
            names.push(&pkg.name);

            if pkg.url.is_empty() {
                return Err(Error::ConfigError(format!("package {} missing URL", pkg.name)));
            }
            if pkg.build.is_empty() {
                return Err(Error::ConfigError(format!(
                    "package {} missing build command",
                    pkg.name
                )));
            }
            if pkg.install.is_empty() {
                return Err(Error::ConfigError(format!(
                    "package {} missing install command",
                    pkg.name
                )));
            }

            for dep in &pkg.depends_on {
                if dep == &pkg.name {
                    return Err(Error::ConfigError(format!(
                        "package {} depends on itself",
                        pkg.name
                    )));
                }
            }
        }

        for pkg in &self.packages {
            for dep in &pkg.depends_on {
                if self.package(dep).is_none() {
                    return Err(Error::MissingDependency {
                        package: pkg.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        self.detect_cycles()
    }

    fn detect_cycles(&self) -> Result<()> {
        let mut visited: HashMap<&str, bool> = HashMap::new();
        let mut stack: Vec<&str> = Vec::new();

        fn visit<'a>(
            config: &'a Config,
            name: &'a str,
            visited: &mut HashMap<&'a str, bool>,
            stack: &mut Vec<&'a str>,
        ) -> Result<()> {
            visited.insert(name, true);
            stack.push(name);

            if let Some(pkg) = config.package(name) {
                for dep in &pkg.depends_on {
                    if stack.iter().any(|n| *n == dep.as_str()) {
                        return Err(Error::CircularDependency(format!(
                            "{} -> {}",
                            name, dep
                        )));
                    }
                    if !visited.contains_key(dep.as_str()) {
                        visit(config, dep, visited, stack)?;
                    }
                }
            }

            stack.pop();
            Ok(())
        }

        for pkg in &self.packages {
            if !visited.contains_key(pkg.name.as_str()) {
                visit(self, &pkg.name, &mut visited, &mut stack)?;
            }
        }
        Ok(())
    }
}

/// Load and validate a catalog file. With no explicit path, tries
/// `packages.yaml`, `packages.yml`, and `packages.toml` in the working
/// directory.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            debug!("No config file specified, attempting auto-discovery");
            discover(&["packages.yaml", "packages.yml", "packages.toml"]).ok_or_else(|| {
                Error::ConfigError(
                    "no config file found (tried: packages.yaml, packages.yml, packages.toml)"
                        .to_string(),
                )
            })?
        }
    };

    debug!("Loading configuration from: {}", path.display());
    let path = std::path::absolute(&path)?;
    let data = std::fs::read_to_string(&path)?;

    let mut config: Config = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&data)
            .map_err(|e| Error::ConfigError(format!("failed to parse TOML: {}", e)))?,
        Some("yaml") | Some("yml") => serde_yaml::from_str(&data)
            .map_err(|e| Error::ConfigError(format!("failed to parse YAML: {}", e)))?,
        other => {
            return Err(Error::ConfigError(format!(
                "unsupported config type: {:?}",
                other.unwrap_or("")
            )))
        }
    };

    config.file_path = path;
    config.validate()?;
    Ok(config)
}

pub(crate) fn discover(candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|candidate| PathBuf::from(*candidate))
        .find(|candidate| candidate.exists())
}
