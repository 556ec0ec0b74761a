// src/lib.rs

//! makepkg
//!
//! A cross-compiling build orchestrator for system packages. A declarative
//! catalog names source packages, their fetch URLs, shell build/install
//! recipes, and dependency edges; makepkg resolves a level-parallel build
//! order, fetches and unpacks sources, runs recipes in a toolchain-aware
//! environment, installs into a chosen sysroot, and keeps a per-package
//! fingerprint cache so only affected packages rebuild.
//!
//! # Architecture
//!
//! - `config`: the catalog and toolchain data model
//! - `env`: ordered, layered environments with `${VAR}` substitution
//! - `build::order`: Kahn's algorithm over the dependency graph, by level
//! - `fetch`: HTTP/git fetching and archive extraction
//! - `cache`: per-package `makepkg.json` fingerprints
//! - `pool`: bounded worker pool with a cancellation signal
//! - `build`: the driver tying it all together

pub mod build;
pub mod cache;
pub mod config;
pub mod env;
mod error;
pub mod fetch;
pub mod pool;

pub use build::{BuildResult, Builder, BuilderConfig};
pub use error::{Error, Result};
