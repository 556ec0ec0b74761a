// src/build/order.rs

//! Build order resolution
//!
//! Linearizes the package dependency graph into *levels*: each level is a
//! set of packages whose dependencies have all been emitted in earlier
//! levels, so the members of a level can build concurrently.

use crate::config::Config;
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Resolve the catalog into an ordered sequence of levels using
/// reverse-indegree Kahn's algorithm.
///
/// Level 0 holds every package with no dependencies; each later level
/// holds the packages unblocked by the previous one. Ordering within a
/// level is unspecified.
pub fn build_order(config: &Config) -> Result<Vec<Vec<String>>> {
    for pkg in &config.packages {
        for dep in &pkg.depends_on {
            if config.package(dep).is_none() {
                return Err(Error::MissingDependency {
                    package: pkg.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    for pkg in &config.packages {
        indegree.insert(&pkg.name, pkg.depends_on.len());
        for dep in &pkg.depends_on {
            dependents.entry(dep).or_default().push(&pkg.name);
        }
    }

    let mut queue: Vec<&str> = indegree
        .iter()
        .filter(|&(_, deg)| *deg == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut levels: Vec<Vec<String>> = Vec::new();
    let mut emitted = 0;

    while !queue.is_empty() {
        levels.push(queue.iter().map(|n| n.to_string()).collect());

        let mut next: Vec<&str> = Vec::new();
        for name in &queue {
            emitted += 1;
            if let Some(deps) = dependents.get(name) {
                for &dependent in deps {
                    if let Some(deg) = indegree.get_mut(dependent) {
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 {
                            next.push(dependent);
                        }
                    }
                }
            }
        }
        queue = next;
    }

    if emitted != config.packages.len() {
        let remaining: Vec<&str> = config
            .packages
            .iter()
            .map(|p| p.name.as_str())
            .filter(|name| !levels.iter().flatten().any(|n| n == name))
            .collect();
        return Err(Error::CircularDependency(remaining.join(", ")));
    }

    Ok(levels)
}
