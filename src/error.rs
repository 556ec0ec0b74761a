// src/error.rs

//! Error types for the makepkg library.

use thiserror::Error;

/// Errors produced while loading configuration, resolving dependencies,
/// fetching sources, or running recipes.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or incomplete configuration (duplicate names, missing
    /// fields, undefined toolchain variables, ...)
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A package depends on a package that is not defined in the catalog
    #[error("package {package} depends on non-existent package {dependency}")]
    MissingDependency { package: String, dependency: String },

    /// The dependency graph contains a cycle
    #[error("circular dependency detected among: {0}")]
    CircularDependency(String),

    /// Fetching a source archive or repository failed
    #[error("download error: {0}")]
    DownloadError(String),

    /// An archive could not be decoded or extracted
    #[error("archive error: {0}")]
    ArchiveError(String),

    /// A build, install, or clean recipe failed
    #[error("{kind} script for {package} failed: {reason}")]
    ScriptError {
        package: String,
        kind: String,
        reason: String,
    },

    /// Reading or writing a package cache record failed
    #[error("cache error: {0}")]
    CacheError(String),

    /// One or more packages in a level failed to build
    #[error("build errors: {0}")]
    BuildFailed(String),

    /// The run was aborted by the stop signal before completing
    #[error("build stopped early")]
    Stopped,

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
