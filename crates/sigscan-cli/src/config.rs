use std::{
    fs,
    path::{Path, PathBuf},
};

use eyre::Result;
use serde::{Deserialize, Serialize};
use sigscan::scan::{ScanAlignment, ScanHint, ScanMode};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // This is not part of the config, but rather used for
    // at runtime to remember where to save to
    #[serde(skip)]
    path: PathBuf,

    pub log: Log,
    pub scan: Scan,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Log {
    /// configure logger level, in `EnvFilter` syntax
    pub level: String,
    /// whether to display log targets
    pub targets: bool,
    /// also write logs to this file, relative to the config dir
    pub file: Option<PathBuf>,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: "warn".to_owned(),
            targets: false,
            file: None,
        }
    }
}

/// Defaults for scans, command line flags take precedence
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scan {
    pub alignment: ScanAlignment,
    pub hint: ScanHint,
    pub mode: ScanMode,
}

impl Config {
    /// Load a config file
    /// If path doesn't exist, creates and saves default config
    /// otherwise loads what's already there
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // if path doesn't exist, create default config,
        // save it, and return it
        if !path.exists() {
            let config = Self {
                path: path.to_owned(),
                ..Default::default()
            };

            config.save()?;
            return Ok(config);
        }

        let data = fs::read_to_string(path)?;
        let mut config = toml::from_str::<Self>(&data)?;

        // remember where it came from
        path.clone_into(&mut config.path);

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let serialized = toml::to_string_pretty(self)?;
        fs::write(&self.path, serialized)?;

        Ok(())
    }

    /// The directory the config file lives in
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_default_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sigscan.toml");

        let config = Config::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.log.level, "warn");
        assert_eq!(config.scan.alignment, ScanAlignment::X1);
        assert_eq!(config.dir(), dir.path().join("nested"));

        // and it loads back the same
        let again = Config::load(&path).unwrap();
        assert_eq!(again.log.level, "warn");
        assert_eq!(again.scan.mode, ScanMode::Auto);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sigscan.toml");

        fs::write(
            &path,
            r#"
[log]
file = "sigscan.log"

[scan]
alignment = "x16"
hint = "x86-64"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.log.level, "warn");
        assert_eq!(config.log.file.as_deref(), Some(Path::new("sigscan.log")));
        assert_eq!(config.scan.alignment, ScanAlignment::X16);
        assert_eq!(config.scan.hint, ScanHint::X86_64);
        assert_eq!(config.scan.mode, ScanMode::Auto);
    }

    #[test]
    fn rejects_unknown_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sigscan.toml");

        fs::write(&path, "[scan]\nalignment = \"x3\"\n").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
