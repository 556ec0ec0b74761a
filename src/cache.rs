// src/cache.rs

//! Per-package fingerprint cache
//!
//! Each package directory under the build tree carries a `makepkg.json`
//! record of the last successful build and install. Comparing the record
//! against the current package definition answers whether a package must
//! be rebuilt, merely reinstalled, or skipped. Rebuilding a package
//! invalidates the records of everything that transitively depends on it.
//!
//! Recipe text is compared by exact string equality: a coarse but cheap
//! proxy for "the work to do is the same". The sysroot path is part of
//! the fingerprint because configure-generated artifacts embed absolute
//! paths.

use crate::config::{Config, Package};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CACHE_FILE_NAME: &str = "makepkg.json";
pub const SOURCE_DIR_NAME: &str = "source";

/// The persisted fingerprint of a package's last build and install.
/// Fields missing from an older file decode as empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub build: String,
    #[serde(default)]
    pub install: String,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub sysroot: String,
}

/// The cache over a build directory.
#[derive(Debug)]
pub struct Cache {
    build_dir: PathBuf,
}

impl Cache {
    pub fn new(build_dir: &Path) -> Self {
        Self {
            build_dir: build_dir.to_path_buf(),
        }
    }

    fn pkg_dir(&self, pkg_name: &str) -> PathBuf {
        self.build_dir.join(pkg_name)
    }

    fn cache_path(&self, pkg_name: &str) -> PathBuf {
        self.pkg_dir(pkg_name).join(CACHE_FILE_NAME)
    }

    /// The unpacked source tree for a package.
    pub fn source_dir(&self, pkg_name: &str) -> PathBuf {
        self.pkg_dir(pkg_name).join(SOURCE_DIR_NAME)
    }

    /// Read the cache record for a package. A missing file means "never
    /// built" and reads as `None`.
    pub fn read(&self, pkg_name: &str) -> Result<Option<CacheRecord>> {
        let path = self.cache_path(pkg_name);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::CacheError(format!("failed to read cache: {}", e))),
        };

        let record = serde_json::from_slice(&data)
            .map_err(|e| Error::CacheError(format!("failed to parse cache: {}", e)))?;
        Ok(Some(record))
    }

    /// Like [`read`](Self::read), but degrades an unreadable record to
    /// "never built" with a warning. The package then rebuilds.
    fn read_or_absent(&self, pkg_name: &str) -> Option<CacheRecord> {
        match self.read(pkg_name) {
            Ok(record) => record,
            Err(e) => {
                warn!("ignoring unreadable cache for {}: {}", pkg_name, e);
                None
            }
        }
    }

    fn write(&self, pkg_name: &str, record: &CacheRecord) -> Result<()> {
        let dir = self.pkg_dir(pkg_name);
        fs::create_dir_all(&dir)
            .map_err(|e| Error::CacheError(format!("failed to create package directory: {}", e)))?;

        let data = serde_json::to_vec_pretty(record)
            .map_err(|e| Error::CacheError(format!("failed to encode cache: {}", e)))?;
        fs::write(self.cache_path(pkg_name), data)
            .map_err(|e| Error::CacheError(format!("failed to write cache: {}", e)))?;
        Ok(())
    }

    /// Record a successful build. Updates `url`, `build`, `env`, `host`,
    /// and `sysroot`, preserving any previously recorded `install`.
    pub fn write_build(&self, pkg: &Package, sysroot: &str, host: &str) -> Result<()> {
        let mut record = self.read(&pkg.name)?.unwrap_or_default();
        record.url = pkg.url.clone();
        record.build = pkg.build.clone();
        record.env = pkg.env.clone();
        record.host = host.to_string();
        record.sysroot = sysroot.to_string();
        self.write(&pkg.name, &record)
    }

    /// Record a successful install. Updates `install`, `env`, `host`, and
    /// `sysroot`, preserving the recorded `url` and `build`.
    pub fn write_install(&self, pkg: &Package, sysroot: &str, host: &str) -> Result<()> {
        let mut record = self.read(&pkg.name)?.unwrap_or_default();
        record.install = pkg.install.clone();
        record.env = pkg.env.clone();
        record.host = host.to_string();
        record.sysroot = sysroot.to_string();
        self.write(&pkg.name, &record)
    }

    fn common_change(
        &self,
        record: &CacheRecord,
        pkg: &Package,
        sysroot: &str,
        host: &str,
    ) -> Option<String> {
        if record.env != pkg.env {
            return Some("env vars changed".to_string());
        }
        if record.host != host {
            return Some(format!(
                "host changed from {:?} to {:?}",
                record.host, host
            ));
        }
        if record.sysroot != sysroot {
            return Some(format!(
                "sysroot changed from {:?} to {:?}",
                record.sysroot, sysroot
            ));
        }
        None
    }

    /// Whether a package must be rebuilt, and why. `None` means the cached
    /// build is still valid.
    pub fn needs_rebuild(&self, pkg: &Package, sysroot: &str, host: &str) -> Option<String> {
        debug!("Checking if {} needs rebuild...", pkg.name);

        let record = match self.read_or_absent(&pkg.name) {
            Some(record) => record,
            None => {
                debug!("  {} needs rebuild: no cache exists", pkg.name);
                return Some("no cache exists".to_string());
            }
        };

        if record.url != pkg.url {
            let reason = format!("URL changed from {:?} to {:?}", record.url, pkg.url);
            debug!("  {} needs rebuild: {}", pkg.name, reason);
            return Some(reason);
        }

        if record.build != pkg.build {
            debug!("  {} needs rebuild: build script changed", pkg.name);
            return Some("build script changed".to_string());
        }

        if let Some(reason) = self.common_change(&record, pkg, sysroot, host) {
            debug!("  {} needs rebuild: {}", pkg.name, reason);
            return Some(reason);
        }

        if !self.source_dir(&pkg.name).exists() {
            debug!("  {} needs rebuild: source directory doesn't exist", pkg.name);
            return Some("source directory doesn't exist".to_string());
        }

        debug!("  {} does not need rebuild (cache is valid)", pkg.name);
        None
    }

    /// Whether a package must be reinstalled (without a rebuild), and why.
    /// Callers decide rebuild first; a rebuild already implies an install.
    pub fn needs_reinstall(&self, pkg: &Package, sysroot: &str, host: &str) -> Option<String> {
        debug!("Checking if {} needs reinstall...", pkg.name);

        let record = match self.read_or_absent(&pkg.name) {
            Some(record) => record,
            None => {
                debug!("  {} needs reinstall: no cache exists", pkg.name);
                return Some("no cache exists".to_string());
            }
        };

        if record.install != pkg.install {
            debug!("  {} needs reinstall: install script changed", pkg.name);
            return Some("install script changed".to_string());
        }

        if let Some(reason) = self.common_change(&record, pkg, sysroot, host) {
            debug!("  {} needs reinstall: {}", pkg.name, reason);
            return Some(reason);
        }

        debug!("  {} does not need reinstall (cache is valid)", pkg.name);
        None
    }

    /// Remove a package's cache record. The source tree is preserved.
    pub fn invalidate(&self, pkg_name: &str) -> Result<()> {
        match fs::remove_file(self.cache_path(pkg_name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::CacheError(format!("failed to remove cache: {}", e))),
        }
    }

    /// Invalidate every package that transitively depends on `pkg_name`.
    /// Their fingerprint checks then force a rebuild on this or the next
    /// run; their source trees stay in place.
    pub fn invalidate_dependents(&self, pkg_name: &str, config: &Config) -> Result<()> {
        let dependents = find_dependents(pkg_name, config);
        debug!(
            "Package {} was rebuilt, invalidating {} dependent package(s)",
            pkg_name,
            dependents.len()
        );

        for dep in dependents {
            debug!("  Invalidating cache for {} (depends on {})", dep, pkg_name);
            self.invalidate(&dep)?;
        }
        Ok(())
    }

    /// Remove a package's source tree and any sibling non-directory files
    /// (downloaded archives), keeping the cache record itself.
    pub fn clean(&self, pkg_name: &str) -> Result<()> {
        let src = self.source_dir(pkg_name);
        if let Err(e) = fs::remove_dir_all(&src) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(Error::CacheError(format!(
                    "failed to remove source directory: {}",
                    e
                )));
            }
        }

        let entries = match fs::read_dir(self.pkg_dir(pkg_name)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(Error::CacheError(format!(
                    "failed to read package directory: {}",
                    e
                )))
            }
        };

        for entry in entries {
            let entry = entry.map_err(|e| Error::CacheError(e.to_string()))?;
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir && entry.file_name() != CACHE_FILE_NAME {
                fs::remove_file(entry.path())
                    .map_err(|e| Error::CacheError(format!("failed to remove archive: {}", e)))?;
            }
        }

        Ok(())
    }
}

/// All transitive dependents of a package, via BFS over the reverse
/// dependency graph.
fn find_dependents(pkg_name: &str, config: &Config) -> Vec<String> {
    let mut direct: HashMap<&str, Vec<&str>> = HashMap::new();
    for pkg in &config.packages {
        for dep in &pkg.depends_on {
            direct.entry(dep).or_default().push(&pkg.name);
        }
    }

    let mut seen: HashSet<&str> = HashSet::from([pkg_name]);
    let mut queue: VecDeque<&str> = VecDeque::from([pkg_name]);
    let mut result = Vec::new();

    while let Some(current) = queue.pop_front() {
        if let Some(deps) = direct.get(current) {
            for &dep in deps {
                if seen.insert(dep) {
                    queue.push_back(dep);
                    result.push(dep.to_string());
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pkg(name: &str, deps: &[&str]) -> Package {
        Package {
            name: name.to_string(),
            url: format!("https://example.com/{}-1.0.tar.gz", name),
            build: "make".to_string(),
            install: "make install".to_string(),
            env: vec!["CFLAGS=-O2".to_string()],
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            ..Package::default()
        }
    }

    fn with_source(cache: &Cache, name: &str) {
        fs::create_dir_all(cache.source_dir(name)).unwrap();
    }

    #[test]
    fn test_read_missing_is_none() {
        let temp = TempDir::new().unwrap();
        let cache = Cache::new(temp.path());
        assert!(cache.read("zlib").unwrap().is_none());
    }

    #[test]
    fn test_write_build_round_trip() {
        let temp = TempDir::new().unwrap();
        let cache = Cache::new(temp.path());
        let p = pkg("zlib", &[]);

        cache.write_build(&p, "/sr", "x86_64-linux-musl").unwrap();

        let record = cache.read("zlib").unwrap().unwrap();
        assert_eq!(record.url, p.url);
        assert_eq!(record.build, p.build);
        assert_eq!(record.env, p.env);
        assert_eq!(record.host, "x86_64-linux-musl");
        assert_eq!(record.sysroot, "/sr");
        assert_eq!(record.install, "");
    }

    #[test]
    fn test_write_build_then_install_merges() {
        let temp = TempDir::new().unwrap();
        let cache = Cache::new(temp.path());
        let p = pkg("zlib", &[]);

        cache.write_build(&p, "/sr", "host").unwrap();
        cache.write_install(&p, "/sr2", "host2").unwrap();

        let record = cache.read("zlib").unwrap().unwrap();
        assert_eq!(record.build, p.build);
        assert_eq!(record.url, p.url);
        assert_eq!(record.install, p.install);
        // Latest write wins for the shared fields.
        assert_eq!(record.sysroot, "/sr2");
        assert_eq!(record.host, "host2");
    }

    #[test]
    fn test_missing_fields_decode_empty() {
        let temp = TempDir::new().unwrap();
        let cache = Cache::new(temp.path());

        fs::create_dir_all(temp.path().join("zlib")).unwrap();
        fs::write(
            temp.path().join("zlib").join(CACHE_FILE_NAME),
            br#"{"url": "https://example.com/zlib.tar.gz"}"#,
        )
        .unwrap();

        let record = cache.read("zlib").unwrap().unwrap();
        assert_eq!(record.url, "https://example.com/zlib.tar.gz");
        assert_eq!(record.build, "");
        assert!(record.env.is_empty());
    }

    #[test]
    fn test_corrupt_cache_reads_as_rebuild() {
        let temp = TempDir::new().unwrap();
        let cache = Cache::new(temp.path());
        let p = pkg("zlib", &[]);

        fs::create_dir_all(temp.path().join("zlib")).unwrap();
        fs::write(temp.path().join("zlib").join(CACHE_FILE_NAME), b"not json").unwrap();

        assert!(cache.read("zlib").is_err());
        assert_eq!(
            cache.needs_rebuild(&p, "", ""),
            Some("no cache exists".to_string())
        );
    }

    #[test]
    fn test_needs_rebuild_reasons_in_order() {
        let temp = TempDir::new().unwrap();
        let cache = Cache::new(temp.path());
        let p = pkg("zlib", &[]);

        // 1. No cache file.
        assert_eq!(
            cache.needs_rebuild(&p, "/sr", "host"),
            Some("no cache exists".to_string())
        );

        cache.write_build(&p, "/sr", "host").unwrap();
        cache.write_install(&p, "/sr", "host").unwrap();
        with_source(&cache, "zlib");

        // Up to date.
        assert_eq!(cache.needs_rebuild(&p, "/sr", "host"), None);

        // 2. URL changed.
        let mut changed = p.clone();
        changed.url = "https://example.com/zlib-1.1.tar.gz".to_string();
        assert!(cache
            .needs_rebuild(&changed, "/sr", "host")
            .unwrap()
            .contains("URL changed"));

        // 3. Build recipe changed.
        let mut changed = p.clone();
        changed.build = "make -j1".to_string();
        assert_eq!(
            cache.needs_rebuild(&changed, "/sr", "host"),
            Some("build script changed".to_string())
        );

        // 4. Common changes: env, host, sysroot.
        let mut changed = p.clone();
        changed.env.push("EXTRA=1".to_string());
        assert_eq!(
            cache.needs_rebuild(&changed, "/sr", "host"),
            Some("env vars changed".to_string())
        );
        assert!(cache
            .needs_rebuild(&p, "/sr", "other-host")
            .unwrap()
            .contains("host changed"));
        assert!(cache
            .needs_rebuild(&p, "/other", "host")
            .unwrap()
            .contains("sysroot changed"));

        // 5. Source directory absent.
        fs::remove_dir_all(cache.source_dir("zlib")).unwrap();
        assert_eq!(
            cache.needs_rebuild(&p, "/sr", "host"),
            Some("source directory doesn't exist".to_string())
        );
    }

    #[test]
    fn test_needs_reinstall() {
        let temp = TempDir::new().unwrap();
        let cache = Cache::new(temp.path());
        let p = pkg("zlib", &[]);

        assert_eq!(
            cache.needs_reinstall(&p, "/sr", "host"),
            Some("no cache exists".to_string())
        );

        cache.write_build(&p, "/sr", "host").unwrap();
        cache.write_install(&p, "/sr", "host").unwrap();
        assert_eq!(cache.needs_reinstall(&p, "/sr", "host"), None);

        let mut changed = p.clone();
        changed.install = "make install DESTDIR=$SYS_ROOT".to_string();
        assert_eq!(
            cache.needs_reinstall(&changed, "/sr", "host"),
            Some("install script changed".to_string())
        );

        // Reinstall does not care about the source tree.
        assert_eq!(cache.needs_reinstall(&p, "/sr", "host"), None);

        assert!(cache
            .needs_reinstall(&p, "/elsewhere", "host")
            .unwrap()
            .contains("sysroot changed"));
    }

    #[test]
    fn test_invalidate_dependents_transitive() {
        let temp = TempDir::new().unwrap();
        let cache = Cache::new(temp.path());

        let packages = vec![
            pkg("a", &[]),
            pkg("b", &["a"]),
            pkg("c", &["b"]),
            pkg("d", &[]),
        ];
        let config = Config {
            packages: packages.clone(),
            ..Config::default()
        };

        for p in &packages {
            cache.write_build(p, "/sr", "host").unwrap();
        }

        cache.invalidate_dependents("a", &config).unwrap();

        assert!(cache.read("a").unwrap().is_some());
        assert!(cache.read("b").unwrap().is_none());
        assert!(cache.read("c").unwrap().is_none());
        assert!(cache.read("d").unwrap().is_some());
    }

    #[test]
    fn test_invalidate_preserves_source() {
        let temp = TempDir::new().unwrap();
        let cache = Cache::new(temp.path());
        let p = pkg("a", &[]);

        cache.write_build(&p, "", "").unwrap();
        with_source(&cache, "a");

        cache.invalidate("a").unwrap();
        assert!(cache.read("a").unwrap().is_none());
        assert!(cache.source_dir("a").exists());
    }

    #[test]
    fn test_clean_removes_source_and_archives_keeps_cache() {
        let temp = TempDir::new().unwrap();
        let cache = Cache::new(temp.path());
        let p = pkg("a", &[]);

        cache.write_build(&p, "", "").unwrap();
        with_source(&cache, "a");
        fs::write(cache.source_dir("a").join("main.c"), "int main;").unwrap();
        fs::write(temp.path().join("a").join("a-1.0.tar.gz"), "archive").unwrap();

        cache.clean("a").unwrap();

        assert!(!cache.source_dir("a").exists());
        assert!(!temp.path().join("a").join("a-1.0.tar.gz").exists());
        assert!(cache.read("a").unwrap().is_some());
    }

    #[test]
    fn test_clean_missing_package_is_ok() {
        let temp = TempDir::new().unwrap();
        let cache = Cache::new(temp.path());
        assert!(cache.clean("nonexistent").is_ok());
    }
}
