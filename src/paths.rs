//! Application path resolution
//!
//! - **Local mode**: a `micron-sync.yaml` in the working directory, or a
//!   `.portable` marker next to the executable, keeps everything beside it.
//! - **Installed mode** (default): config under the platform config dir,
//!   session state and logs under the platform data dir.

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory name used in installed mode
const APP_NAME: &str = "micron-sync";
/// Config file name in every mode
pub const CONFIG_FILE: &str = "micron-sync.yaml";
/// Default session file name
const STATE_FILE: &str = "session.json";

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config: PathBuf,
    /// Default session file when the config names none
    pub state_file: PathBuf,
    pub logs_dir: PathBuf,
    pub is_portable: bool,
}

impl AppPaths {
    /// Resolve paths for this run
    ///
    /// Called before logging is up, so diagnostics go to stderr.
    pub fn detect() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        if cwd.join(CONFIG_FILE).exists() {
            #[cfg(debug_assertions)]
            eprintln!("[paths] Using local config in {}", cwd.display());
            return Self::local(&cwd);
        }

        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));
        if exe_dir.join(".portable").exists() {
            #[cfg(debug_assertions)]
            eprintln!("[paths] Running in PORTABLE mode ({})", exe_dir.display());
            return Self::local(&exe_dir);
        }

        let config_dir = dirs::config_dir().unwrap_or_else(|| {
            eprintln!("[paths] WARNING: no config directory, falling back to exe dir");
            exe_dir.clone()
        });
        let data_dir = dirs::data_dir().unwrap_or_else(|| config_dir.clone());

        Self {
            config: config_dir.join(APP_NAME).join(CONFIG_FILE),
            state_file: data_dir.join(APP_NAME).join(STATE_FILE),
            logs_dir: data_dir.join(APP_NAME).join("logs"),
            is_portable: false,
        }
    }

    /// Everything inside one directory
    pub fn local(dir: &Path) -> Self {
        Self {
            config: dir.join(CONFIG_FILE),
            state_file: dir.join(STATE_FILE),
            logs_dir: dir.join("logs"),
            is_portable: true,
        }
    }

    /// Create missing directories; in installed mode also seed the config
    /// from `config.example.yaml` when one ships next to the executable
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        for dir in [Some(self.logs_dir.as_path()), self.state_file.parent(), self.config.parent()]
            .into_iter()
            .flatten()
        {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                debug!("Creating directory: {}", dir.display());
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
            }
        }

        if !self.is_portable && !self.config.exists() {
            self.copy_example_config()?;
        }
        Ok(())
    }

    fn copy_example_config(&self) -> anyhow::Result<()> {
        let candidates = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.join("config.example.yaml")))
            .into_iter()
            .chain(std::iter::once(PathBuf::from("config.example.yaml")));

        for example in candidates {
            if example.exists() {
                info!("Copying {} to {}", example.display(), self.config.display());
                std::fs::copy(&example, &self.config).with_context(|| {
                    format!(
                        "Failed to copy example config from {} to {}",
                        example.display(),
                        self.config.display()
                    )
                })?;
                return Ok(());
            }
        }

        info!("No config found, please create {}", self.config.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_layout() {
        let paths = AppPaths::local(Path::new("/tmp/micron"));
        assert!(paths.is_portable);
        assert_eq!(paths.config, PathBuf::from("/tmp/micron/micron-sync.yaml"));
        assert_eq!(paths.state_file, PathBuf::from("/tmp/micron/session.json"));
        assert_eq!(paths.logs_dir, PathBuf::from("/tmp/micron/logs"));
    }

    #[test]
    fn test_ensure_directories_creates_logs() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::local(&dir.path().join("nested"));
        paths.ensure_directories().unwrap();
        assert!(paths.logs_dir.is_dir());
        assert!(!paths.config.exists());
    }
}
