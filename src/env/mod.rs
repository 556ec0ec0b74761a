// src/env/mod.rs

//! Build environments
//!
//! An [`Environment`] is an ordered mapping from variable name to value
//! with support for deferred `${VAR}` substitution. Recipes never see the
//! parent process environment directly; the builder composes environments
//! from the process `PATH`, global build variables, toolchain bindings,
//! and per-package entries.

mod layered;
pub mod toolchain;

pub use layered::LayeredEnv;

use regex::{Captures, Regex};
use std::sync::OnceLock;
use tracing::debug;

/// Matches `${NAME}` where NAME is any run of non-`}` characters.
fn subst_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").unwrap())
}

/// An ordered mapping of environment variable names to values.
///
/// Insertion order is preserved; replacing a value keeps the variable's
/// original position. This keeps `snapshot()` output stable, which matters
/// for the cache fingerprint and for debug logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: Vec<(String, String)>,
}

impl Environment {
    /// Create an environment seeded with the process `PATH`.
    pub fn new() -> Self {
        let mut env = Self::default();
        if let Ok(path) = std::env::var("PATH") {
            env.set("PATH", &path);
        }
        env
    }

    /// Create an environment with no variables at all.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a variable, replacing any existing value in place.
    pub fn set(&mut self, key: &str, value: &str) {
        debug!("Setting {}={}", key, value);
        match self.vars.iter().position(|(k, _)| k == key) {
            Some(i) => self.vars[i].1 = value.to_string(),
            None => self.vars.push((key.to_string(), value.to_string())),
        }
    }

    /// Prepend `value` to `key`, joined with `sep` when the current value
    /// is nonempty.
    pub fn prepend(&mut self, key: &str, value: &str, sep: &str) {
        debug!("Prepending to {}: {}", key, value);
        let next = match self.get(key) {
            Some(existing) if !existing.trim().is_empty() => {
                format!("{}{}{}", value, sep, existing)
            }
            _ => value.to_string(),
        };
        self.set(key, &next);
    }

    /// Replace every `${NAME}` in `s` with the stored value for `NAME`.
    /// Undefined names are left literal.
    pub fn subst(&self, s: &str) -> String {
        subst_pattern()
            .replace_all(s, |caps: &Captures| match self.get(&caps[1]) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Like [`subst`](Self::subst), but also returns the unique names that
    /// had no value.
    pub fn subst_collecting(&self, s: &str) -> (String, Vec<String>) {
        let mut undefined: Vec<String> = Vec::new();
        let result = subst_pattern()
            .replace_all(s, |caps: &Captures| match self.get(&caps[1]) {
                Some(value) => value.to_string(),
                None => {
                    let name = caps[1].to_string();
                    if !undefined.contains(&name) {
                        undefined.push(name);
                    }
                    caps[0].to_string()
                }
            })
            .into_owned();
        (result, undefined)
    }

    /// The environment as a `KEY=VALUE` sequence in insertion order.
    pub fn snapshot(&self) -> Vec<String> {
        self.vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
