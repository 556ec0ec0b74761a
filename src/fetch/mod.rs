// src/fetch/mod.rs

//! Source fetching
//!
//! Resolves a package URL into an unpacked source tree under
//! `<build_dir>/<pkg>/source`. Git URLs are shallow-cloned straight into
//! the source directory; anything else is an HTTP download followed by
//! archive extraction with the archive's top-level directory stripped.

pub mod archive;

use crate::error::{Error, Result};
use crate::pool::StopSignal;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Downloads and unpacks package sources into the build directory.
#[derive(Debug)]
pub struct Fetcher {
    build_dir: PathBuf,
    client: reqwest::blocking::Client,
}

impl Fetcher {
    pub fn new(build_dir: &Path) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::DownloadError(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            build_dir: build_dir.to_path_buf(),
            client,
        })
    }

    fn pkg_dir(&self, pkg_name: &str) -> PathBuf {
        self.build_dir.join(pkg_name)
    }

    fn source_dir(&self, pkg_name: &str) -> PathBuf {
        self.pkg_dir(pkg_name).join("source")
    }

    /// Fetch a package's source: after this returns, the unpacked tree is
    /// at `<build_dir>/<pkg>/source`.
    pub fn fetch(&self, pkg_name: &str, url: &str, stop: &StopSignal) -> Result<()> {
        self.download(pkg_name, url, stop)?;
        if !is_git_url(url) {
            self.extract(pkg_name, url)?;
        }
        Ok(())
    }

    /// Download a package's source archive (or clone its repository).
    /// A preexisting archive file is trusted and reused.
    pub fn download(&self, pkg_name: &str, url: &str, stop: &StopSignal) -> Result<()> {
        let pkg_dir = self.pkg_dir(pkg_name);
        fs::create_dir_all(&pkg_dir)?;

        if is_git_url(url) {
            let source_dir = self.source_dir(pkg_name);
            fs::create_dir_all(&source_dir)?;
            return clone_git_repo(&source_dir, url);
        }

        let archive_file = pkg_dir.join(filename_from_url(url));
        if archive_file.exists() {
            debug!(
                "File already exists at {}, skipping download",
                archive_file.display()
            );
            return Ok(());
        }

        self.download_file(&archive_file, url, stop)
    }

    /// Unpack a previously downloaded archive into the source directory.
    pub fn extract(&self, pkg_name: &str, url: &str) -> Result<()> {
        let source_dir = self.source_dir(pkg_name);
        fs::create_dir_all(&source_dir)?;

        let archive_file = self.pkg_dir(pkg_name).join(filename_from_url(url));
        archive::extract_archive(&archive_file, &source_dir)
    }

    fn download_file(&self, path: &Path, url: &str, stop: &StopSignal) -> Result<()> {
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            if stop.is_set() {
                return Err(Error::Stopped);
            }
            if attempt > 1 {
                let delay = RETRY_DELAY * (1u32 << (attempt - 2));
                debug!(
                    "Retry attempt {}/{} after {:?} delay",
                    attempt, MAX_ATTEMPTS, delay
                );
                std::thread::sleep(delay);
            }

            match self.attempt_download(path, url) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("Download attempt {}/{} failed: {}", attempt, MAX_ATTEMPTS, e);
                    last_err = Some(e);
                }
            }
        }

        Err(Error::DownloadError(format!(
            "failed after {} attempts: {}",
            MAX_ATTEMPTS,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn attempt_download(&self, path: &Path, url: &str) -> Result<()> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::DownloadError(format!("failed to fetch {}: {}", url, e)))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(Error::DownloadError(format!(
                "bad status: {} from {}",
                response.status(),
                url
            )));
        }

        let mut file = File::create(path)?;
        if let Err(e) = io::copy(&mut response, &mut file) {
            // Don't leave a truncated archive behind: it would be trusted
            // and reused on the next run.
            let _ = fs::remove_file(path);
            return Err(Error::DownloadError(format!(
                "failed to write {}: {}",
                path.display(),
                e
            )));
        }

        Ok(())
    }
}

pub(crate) fn filename_from_url(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

fn is_git_url(url: &str) -> bool {
    url.ends_with(".git")
}

fn clone_git_repo(source_dir: &Path, url: &str) -> Result<()> {
    let output = Command::new("git")
        .arg("clone")
        .arg("--depth=1")
        .arg(url)
        .arg(source_dir)
        .output()
        .map_err(|e| Error::DownloadError(format!("failed to run git: {}", e)))?;

    if !output.status.success() {
        return Err(Error::DownloadError(format!(
            "git clone failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}
