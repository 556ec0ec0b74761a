// src/config/toolchain.rs

//! Toolchain configuration
//!
//! Describes the cross-compilation toolchain: target architecture and
//! triple, the directory holding the tools, the shared name prefix, and
//! any extra unprefixed programs. Loaded from a standalone file or from
//! the catalog's inline `toolchain` section; the standalone file wins
//! field by field.

use crate::env::Environment;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Toolchain {
    #[serde(skip)]
    pub file_path: PathBuf,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub bin: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub cross_prefix: String,
    #[serde(default)]
    pub extra_programs: Vec<String>,
}

impl Toolchain {
    /// The target architecture, falling back to the machine we are
    /// running on.
    pub fn effective_arch(&self) -> String {
        if self.arch.is_empty() {
            std::env::consts::ARCH.to_string()
        } else {
            self.arch.clone()
        }
    }

    /// Substitute `${VAR}` in every field, once, at load time. The
    /// toolchain file's directory is visible as `FILE_DIR`. Unlike package
    /// fields, undefined names here are a configuration error.
    pub fn subst(&mut self, base: &Environment) -> Result<()> {
        let mut env = base.clone();
        if !self.file_path.as_os_str().is_empty() {
            if let Some(dir) = self.file_path.parent() {
                env.set("FILE_DIR", &dir.to_string_lossy());
            }
        }

        let mut undefined: Vec<String> = Vec::new();
        for field in [
            &mut self.arch,
            &mut self.host,
            &mut self.bin,
            &mut self.cross_prefix,
        ] {
            let (value, missing) = env.subst_collecting(field);
            *field = value;
            for name in missing {
                if !undefined.contains(&name) {
                    undefined.push(name);
                }
            }
        }

        if !undefined.is_empty() {
            let mut msg = format!(
                "toolchain configuration references undefined variables: {}",
                undefined.join(", ")
            );
            if undefined.iter().any(|n| n == "PKGS_HOST") {
                msg.push_str(" (hint: use --host or set 'host' in the toolchain config)");
            }
            return Err(Error::ConfigError(msg));
        }

        if !self.host.is_empty() && self.arch.is_empty() {
            return Err(Error::ConfigError(
                "toolchain 'host' is set but 'arch' is not; please set 'arch' as well"
                    .to_string(),
            ));
        }

        if !self.bin.is_empty() {
            self.bin = std::path::absolute(&self.bin)?
                .to_string_lossy()
                .into_owned();
        }

        Ok(())
    }
}

/// Merge a higher-priority toolchain into a base one. Non-empty fields
/// from the override win.
pub fn merge_toolchain(base: &Toolchain, override_with: &Toolchain) -> Toolchain {
    debug!("Merging toolchain configurations");
    let mut result = base.clone();

    if !override_with.file_path.as_os_str().is_empty() {
        result.file_path = override_with.file_path.clone();
    }
    if !override_with.arch.is_empty() {
        result.arch = override_with.arch.clone();
    }
    if !override_with.bin.is_empty() {
        result.bin = override_with.bin.clone();
    }
    if !override_with.host.is_empty() {
        result.host = override_with.host.clone();
    }
    if !override_with.cross_prefix.is_empty() {
        result.cross_prefix = override_with.cross_prefix.clone();
    }
    if !override_with.extra_programs.is_empty() {
        result.extra_programs = override_with.extra_programs.clone();
    }

    result
}

/// Load a standalone toolchain file. With no explicit path, tries
/// `toolchain.{yaml,yml,toml}` in the working directory and returns
/// `Ok(None)` when nothing is found.
pub fn load_toolchain(path: Option<&Path>) -> Result<Option<Toolchain>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            debug!("No toolchain file specified, attempting auto-discovery");
            match super::discover(&["toolchain.yaml", "toolchain.yml", "toolchain.toml"]) {
                Some(p) => p,
                None => {
                    debug!("No toolchain file found (auto-discovery failed)");
                    return Ok(None);
                }
            }
        }
    };

    debug!("Loading toolchain configuration from: {}", path.display());
    let path = std::path::absolute(&path)?;
    let data = std::fs::read_to_string(&path)?;

    let mut toolchain: Toolchain = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&data)
            .map_err(|e| Error::ConfigError(format!("failed to parse toolchain TOML: {}", e)))?,
        Some("yaml") | Some("yml") => serde_yaml::from_str(&data)
            .map_err(|e| Error::ConfigError(format!("failed to parse toolchain YAML: {}", e)))?,
        _ => {
            // No recognized extension: try YAML, then TOML.
            match serde_yaml::from_str(&data) {
                Ok(t) => t,
                Err(yaml_err) => toml::from_str(&data).map_err(|toml_err| {
                    Error::ConfigError(format!(
                        "failed to parse toolchain file as YAML or TOML (yaml: {}, toml: {})",
                        yaml_err, toml_err
                    ))
                })?,
            }
        }
    };

    toolchain.file_path = path;
    Ok(Some(toolchain))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subst_resolves_fields() {
        let mut base = Environment::empty();
        base.set("TARGET", "x86_64-linux-musl");

        let mut toolchain = Toolchain {
            arch: "x86_64".to_string(),
            host: "${TARGET}".to_string(),
            cross_prefix: "${TARGET}-".to_string(),
            ..Toolchain::default()
        };
        toolchain.subst(&base).unwrap();

        assert_eq!(toolchain.host, "x86_64-linux-musl");
        assert_eq!(toolchain.cross_prefix, "x86_64-linux-musl-");
    }

    #[test]
    fn test_subst_undefined_is_error() {
        let mut toolchain = Toolchain {
            arch: "x86_64".to_string(),
            cross_prefix: "${NOPE}-".to_string(),
            ..Toolchain::default()
        };
        let err = toolchain.subst(&Environment::empty()).unwrap_err();
        assert!(err.to_string().contains("NOPE"));
    }

    #[test]
    fn test_subst_pkgs_host_hint() {
        let mut toolchain = Toolchain {
            arch: "x86_64".to_string(),
            cross_prefix: "${PKGS_HOST}-".to_string(),
            ..Toolchain::default()
        };
        let err = toolchain.subst(&Environment::empty()).unwrap_err();
        assert!(err.to_string().contains("--host"));
    }

    #[test]
    fn test_subst_host_requires_arch() {
        let mut toolchain = Toolchain {
            host: "x86_64-linux-musl".to_string(),
            ..Toolchain::default()
        };
        assert!(toolchain.subst(&Environment::empty()).is_err());
    }

    #[test]
    fn test_merge_override_wins() {
        let base = Toolchain {
            arch: "x86_64".to_string(),
            bin: "/old/bin".to_string(),
            cross_prefix: "old-".to_string(),
            ..Toolchain::default()
        };
        let over = Toolchain {
            bin: "/new/bin".to_string(),
            extra_programs: vec!["mkimage".to_string()],
            ..Toolchain::default()
        };

        let merged = merge_toolchain(&base, &over);
        assert_eq!(merged.arch, "x86_64");
        assert_eq!(merged.bin, "/new/bin");
        assert_eq!(merged.cross_prefix, "old-");
        assert_eq!(merged.extra_programs, vec!["mkimage"]);
    }

    #[test]
    fn test_effective_arch_fallback() {
        let toolchain = Toolchain::default();
        assert_eq!(toolchain.effective_arch(), std::env::consts::ARCH);

        let toolchain = Toolchain {
            arch: "riscv64".to_string(),
            ..Toolchain::default()
        };
        assert_eq!(toolchain.effective_arch(), "riscv64");
    }
}
