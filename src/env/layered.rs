// src/env/layered.rs

//! Layered environments
//!
//! A [`LayeredEnv`] stacks plain environments: reads query layers from the
//! top down, writes always target the topmost layer. The builder uses one
//! layer for the derived per-package environment and pushes the toolchain
//! bindings on top for non-native packages.

use super::Environment;
use tracing::debug;

/// A stack of environments. Index 0 is the top layer.
#[derive(Debug, Clone, Default)]
pub struct LayeredEnv {
    layers: Vec<Environment>,
}

impl LayeredEnv {
    /// Create a layered environment. The first element of `layers` is the
    /// top layer and shadows the rest.
    pub fn new(layers: Vec<Environment>) -> Self {
        Self { layers }
    }

    /// Push a new layer on top of the stack. It shadows everything below.
    pub fn push_layer(&mut self, env: Environment) {
        self.layers.insert(0, env);
    }

    /// Look a variable up, top layer first.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.layers.iter().find_map(|layer| layer.get(key))
    }

    /// Set a variable in the top layer.
    pub fn set(&mut self, key: &str, value: &str) {
        if let Some(top) = self.layers.first_mut() {
            top.set(key, value);
        }
    }

    /// Prepend to a variable. The current value is resolved through the
    /// whole stack; the result is written to the top layer.
    pub fn prepend(&mut self, key: &str, value: &str, sep: &str) {
        let next = match self.get(key) {
            Some(existing) if !existing.trim().is_empty() => {
                format!("{}{}{}", value, sep, existing)
            }
            _ => value.to_string(),
        };
        self.set(key, &next);
    }

    /// `${VAR}` substitution resolving through the whole stack. Undefined
    /// names are left literal.
    pub fn subst(&self, s: &str) -> String {
        super::subst_pattern()
            .replace_all(s, |caps: &regex::Captures| match self.get(&caps[1]) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Merge the stack into a `KEY=VALUE` sequence. The first occurrence of
    /// a key wins (upper layers shadow lower ones) and relative insertion
    /// order is preserved.
    pub fn snapshot(&self) -> Vec<String> {
        let mut seen: Vec<&str> = Vec::new();
        let mut result = Vec::new();
        for layer in &self.layers {
            for (key, value) in layer.iter() {
                if !seen.contains(&key) {
                    seen.push(key);
                    result.push(format!("{}={}", key, value));
                }
            }
        }
        result
    }

    /// Derive the environment a package's recipes run under.
    ///
    /// Clones the stack, names the package, sets `MAKEFLAGS`, injects the
    /// sysroot-derived search paths, and finally applies the package's own
    /// `KEY=VALUE` entries with `${VAR}` substitution against everything
    /// set so far.
    pub fn for_package(
        &self,
        pkg_name: &str,
        pkg_env: &[String],
        sysroot: &str,
        make_jobs: usize,
    ) -> LayeredEnv {
        let mut env = self.clone();
        env.set("PKG_NAME", pkg_name);

        if make_jobs > 0 {
            env.set("MAKEFLAGS", &format!("-j{}", make_jobs));
        }

        if !sysroot.is_empty() {
            env.prepend(
                "PKG_CONFIG_PATH",
                &format!("{}/usr/lib/pkgconfig", sysroot),
                ":",
            );
            env.set("PKG_CONFIG_SYSROOT_DIR", sysroot);

            env.prepend("CFLAGS", &format!("-I{}/usr/include", sysroot), " ");
            env.prepend("CXXFLAGS", &format!("-I{}/usr/include", sysroot), " ");
            env.prepend(
                "LDFLAGS",
                &format!("-L{}/usr/lib -L{}/lib", sysroot, sysroot),
                " ",
            );

            env.prepend("LIBRARY_PATH", &format!("{}/usr/lib", sysroot), ":");
            env.prepend("LIBRARY_PATH", &format!("{}/lib", sysroot), ":");
            env.prepend("LD_LIBRARY_PATH", &format!("{}/usr/lib", sysroot), ":");
            env.prepend("LD_LIBRARY_PATH", &format!("{}/lib", sysroot), ":");
        }

        for entry in pkg_env {
            match entry.split_once('=') {
                Some((key, value)) => {
                    let value = env.subst(value);
                    env.set(key, &value);
                }
                None => {
                    debug!("ignoring malformed env entry (expected KEY=VALUE): {}", entry);
                }
            }
        }

        env
    }
}
