//! Locating (and optionally downloading) a Chromium executable.
//!
//! Lookup order: an environment override, well-known executable names for
//! the host OS, the local cache, then a download of a pinned Chromium
//! snapshot into that cache (feature `fetch`).

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Pinned Chromium snapshot revision
pub const CHROMIUM_REVISION: &str = "1056772";

/// Where snapshot archives are published
pub const SNAPSHOT_BASE_URL: &str = "https://storage.googleapis.com/chromium-browser-snapshots";

/// How to find a browser
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Environment variable holding an explicit executable path
    pub env_var: Option<String>,
    /// Search `PATH` and the OS application directories
    pub search_system: bool,
    /// Cache directory; `None` means `$HOME/.cache/ejspdf/browser`
    pub cache_dir: Option<PathBuf>,
    /// Download the pinned snapshot when nothing else is found
    pub download: bool,
    pub revision: String,
    pub base_url: String,
    pub download_timeout: Duration,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            env_var: Some("CHROME_PATH".to_string()),
            search_system: true,
            cache_dir: None,
            download: cfg!(feature = "fetch"),
            revision: CHROMIUM_REVISION.to_string(),
            base_url: SNAPSHOT_BASE_URL.to_string(),
            download_timeout: Duration::from_secs(300),
        }
    }
}

impl ProvisionConfig {
    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_cache_dir(),
        }
    }
}

/// `$HOME/.cache/ejspdf/browser` (`%USERPROFILE%` on Windows)
pub fn default_cache_dir() -> Result<PathBuf> {
    let home = env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::ProvisionError("cannot determine the home directory".into()))?;
    Ok(PathBuf::from(home).join(".cache").join("ejspdf").join("browser"))
}

/// Executable names or absolute paths tried for the host OS
pub fn known_executables() -> &'static [&'static str] {
    if cfg!(target_os = "windows") {
        &["chrome", "msedge", "chromium"]
    } else if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        &["google-chrome", "microsoft-edge", "chromium-browser", "chromium"]
    } else {
        &[]
    }
}

/// Location of the executable inside an extracted snapshot
pub fn cached_executable(cache_dir: &Path) -> PathBuf {
    if cfg!(target_os = "windows") {
        cache_dir.join("chrome.exe")
    } else if cfg!(target_os = "macos") {
        cache_dir.join("Chromium.app").join("Contents").join("MacOS").join("Chromium")
    } else {
        cache_dir.join("chrome")
    }
}

/// Snapshot archive URL for the host OS and architecture
pub fn snapshot_url(base_url: &str, revision: &str) -> Result<String> {
    let base = base_url.trim_end_matches('/');
    let path = if cfg!(target_os = "windows") {
        "Win_x64/{rev}/chrome-win.zip"
    } else if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        "Mac_Arm/{rev}/chrome-mac.zip"
    } else if cfg!(target_os = "macos") {
        "Mac/{rev}/chrome-mac.zip"
    } else if cfg!(target_os = "linux") {
        "Linux_x64/{rev}/chrome-linux.zip"
    } else {
        return Err(Error::ProvisionError(format!(
            "no Chromium snapshot for operating system {}",
            env::consts::OS
        )));
    };
    Ok(format!("{}/{}", base, path.replace("{rev}", revision)))
}

/// Find an already-installed browser without touching the network
pub fn locate_installed(config: &ProvisionConfig) -> Option<PathBuf> {
    if let Some(var) = &config.env_var {
        if let Some(value) = env::var_os(var).filter(|v| !v.is_empty()) {
            let path = PathBuf::from(value);
            if path.is_file() {
                log::debug!("using browser from ${}: {}", var, path.display());
                return Some(path);
            }
            log::warn!("${} points at {}, which is not a file", var, path.display());
        }
    }

    if config.search_system {
        for name in known_executables() {
            if let Some(path) = find_executable(name) {
                log::debug!("found installed browser at {}", path.display());
                return Some(path);
            }
        }
    }

    None
}

/// Locate a browser, downloading the pinned snapshot if allowed
pub fn locate_or_provision(config: &ProvisionConfig) -> Result<PathBuf> {
    if let Some(path) = locate_installed(config) {
        return Ok(path);
    }

    let cache_dir = config.cache_dir()?;
    let cached = cached_executable(&cache_dir);
    if cached.is_file() {
        log::debug!("found cached browser at {}", cached.display());
        return Ok(cached);
    }

    if !config.download {
        return Err(Error::ProvisionError(format!(
            "no browser found (set ${} or install Chrome/Chromium; cache {} is empty)",
            config.env_var.as_deref().unwrap_or("CHROME_PATH"),
            cache_dir.display()
        )));
    }

    let url = snapshot_url(&config.base_url, &config.revision)?;
    log::info!(
        "browser not found, downloading Chromium {} to {}",
        config.revision,
        cache_dir.display()
    );
    download_browser(&url, &cache_dir, config.download_timeout)
}

fn find_executable(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var).find_map(|dir| {
        let full = dir.join(name);
        if full.is_file() {
            return Some(full);
        }
        if cfg!(windows) {
            let exe = full.with_extension("exe");
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}

/// Download a snapshot archive and extract it into `cache_dir`
#[cfg(feature = "fetch")]
pub fn download_browser(url: &str, cache_dir: &Path, timeout: Duration) -> Result<PathBuf> {
    use std::fs;
    use std::io;

    let url = url::Url::parse(url)
        .map_err(|e| Error::ProvisionError(format!("invalid download URL {:?}: {}", url, e)))?;

    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::ProvisionError(format!("failed to build HTTP client: {}", e)))?;

    log::info!("downloading {}", url);
    let mut response = client
        .get(url.clone())
        .send()
        .map_err(|e| Error::ProvisionError(format!("failed to download {}: {}", url, e)))?;
    if !response.status().is_success() {
        return Err(Error::ProvisionError(format!(
            "failed to download {}: bad status {}",
            url,
            response.status()
        )));
    }

    fs::create_dir_all(cache_dir)?;
    let archive_path = cache_dir.with_extension("download.zip");
    let mut archive = fs::File::create(&archive_path)?;
    let copied = io::copy(&mut response, &mut archive);
    drop(archive);
    let extracted = copied.map_err(Error::from).and_then(|bytes| {
        log::debug!("downloaded {} bytes", bytes);
        let file = fs::File::open(&archive_path)?;
        extract_archive(file, cache_dir)
    });
    if let Err(e) = fs::remove_file(&archive_path) {
        log::warn!("failed to remove {}: {}", archive_path.display(), e);
    }
    let files = extracted?;
    log::info!("extracted {} files into {}", files, cache_dir.display());

    let executable = cached_executable(cache_dir);
    if !executable.is_file() {
        return Err(Error::ProvisionError(format!(
            "archive did not contain {}",
            executable.display()
        )));
    }
    mark_executable(&executable)?;
    Ok(executable)
}

#[cfg(not(feature = "fetch"))]
pub fn download_browser(url: &str, _cache_dir: &Path, _timeout: Duration) -> Result<PathBuf> {
    Err(Error::ProvisionError(format!(
        "cannot download {}: built without the `fetch` feature",
        url
    )))
}

/// Extract a zip archive into `dest`, dropping the archive's top-level
/// directory (`chrome-linux/chrome` lands at `dest/chrome`). Returns the
/// number of files written.
#[cfg(feature = "fetch")]
pub fn extract_archive<R: std::io::Read + std::io::Seek>(reader: R, dest: &Path) -> Result<usize> {
    use std::fs;
    use std::io;

    let zip_err = |e: zip::result::ZipError| Error::ProvisionError(format!("bad archive: {}", e));
    let mut archive = zip::ZipArchive::new(reader).map_err(zip_err)?;

    let mut top_dir: Option<PathBuf> = None;
    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(zip_err)?;
        let Some(name) = entry.enclosed_name() else {
            log::warn!("skipping unsafe archive entry {:?}", entry.name());
            continue;
        };

        if top_dir.is_none() && entry.name().contains('/') {
            top_dir = name.components().next().map(|c| PathBuf::from(c.as_os_str()));
        }
        let relative = match &top_dir {
            Some(top) => name.strip_prefix(top).unwrap_or(name.as_path()).to_path_buf(),
            None => name.clone(),
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)?;
        io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))?;
        }
        written += 1;
    }
    Ok(written)
}

#[cfg(feature = "fetch")]
fn mark_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(perms.mode() | 0o755);
        std::fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
