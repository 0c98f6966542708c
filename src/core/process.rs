use std::path::{Path, PathBuf};

fn enhanced_path(bin_dir: Option<&Path>) -> Option<String> {
    let bin_dir = bin_dir?;
    let sep = if cfg!(windows) { ";" } else { ":" };
    let current = std::env::var("PATH").unwrap_or_default();
    Some(format!("{}{}{}", bin_dir.display(), sep, current))
}

/// Command for an external tool with the managed bin dir ahead of `PATH`.
/// Inherited Python paths are dropped and output is forced to UTF-8.
pub fn command<S: AsRef<std::ffi::OsStr>>(
    program: S,
    bin_dir: Option<&PathBuf>,
) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    #[cfg(target_os = "windows")]
    cmd.creation_flags(0x08000000);
    if let Some(path) = enhanced_path(bin_dir.map(|p| p.as_path())) {
        cmd.env("PATH", path);
    }
    cmd.env_remove("PYTHONHOME");
    cmd.env_remove("PYTHONPATH");
    cmd.env("PYTHONIOENCODING", "utf-8");
    cmd.env("PYTHONUTF8", "1");
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_dir_is_prepended() {
        let dir = PathBuf::from("/opt/mediaq/bin");
        let path = enhanced_path(Some(&dir)).unwrap();
        assert!(path.starts_with("/opt/mediaq/bin"));
    }

    #[test]
    fn no_bin_dir_leaves_path_alone() {
        assert!(enhanced_path(None).is_none());
    }
}
