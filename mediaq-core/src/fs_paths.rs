use std::path::PathBuf;

pub const DATA_DIR_ENV: &str = "MEDIAQ_DATA_DIR";

pub trait AppPaths: Send + Sync {
    fn downloads_dir(&self) -> PathBuf;
    fn data_dir(&self) -> PathBuf;
    fn bin_dir(&self) -> Option<PathBuf>;
}

pub struct DesktopPaths;

impl AppPaths for DesktopPaths {
    fn downloads_dir(&self) -> PathBuf {
        dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    fn data_dir(&self) -> PathBuf {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            return PathBuf::from(dir);
        }
        dirs::data_dir()
            .map(|d| d.join("mediaq"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn bin_dir(&self) -> Option<PathBuf> {
        Some(self.data_dir().join("bin"))
    }
}

/// Fixed root, used by tests and portable installs.
pub struct RootedPaths {
    pub root: PathBuf,
}

impl AppPaths for RootedPaths {
    fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    fn data_dir(&self) -> PathBuf {
        self.root.clone()
    }

    fn bin_dir(&self) -> Option<PathBuf> {
        Some(self.root.join("bin"))
    }
}
