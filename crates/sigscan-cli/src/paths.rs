use std::path::{Path, PathBuf};

use directories::BaseDirs;

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("failed to instantiate BaseDirs")]
    BaseDirsError,
}

/// Get the sigscan config directory
/// `~/.config/sigscan` on linux, `C:\Users\<user>\AppData\Roaming\sigscan` on windows
pub fn get_config_dir() -> Result<PathBuf, PathError> {
    let base = BaseDirs::new().ok_or(PathError::BaseDirsError)?;
    Ok(base.config_dir().join("sigscan"))
}

/// Get path to `<config_dir>/sigscan.toml`
pub fn get_config_filepath() -> Result<PathBuf, PathError> {
    Ok(get_config_dir()?.join("sigscan.toml"))
}

/// Relative paths are taken relative to `dir`
pub fn resolve_in<P: AsRef<Path>>(dir: &Path, path: P) -> PathBuf {
    let path = path.as_ref();

    if path.is_absolute() {
        path.to_owned()
    } else {
        dir.join(path)
    }
}
