use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tally_import::{ImportOptions, ParserOptions};

const SETTINGS_FILE: &str = "settings.toml";

/// Runtime configuration, read from TOML. Every key is optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: PathBuf,
    /// Bare file names given to `import` are looked up here.
    pub upload_dir: PathBuf,
    /// Run the whole import inside one database transaction.
    pub atomic_import: bool,
    pub remove_source: bool,
    pub delimiter: char,
    pub skip_lines: u64,
    /// Used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self::for_data_dir(&default_data_dir())
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "tally", "Tally")
}

fn default_data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Settings {
    pub fn for_data_dir(data_dir: &Path) -> Self {
        Self {
            database: data_dir.join("tally.db"),
            upload_dir: data_dir.join("uploads"),
            atomic_import: true,
            remove_source: true,
            delimiter: ',',
            skip_lines: 1,
            log_filter: "info".to_string(),
        }
    }

    /// Load from `path` when given (it must exist), otherwise from the
    /// platform config directory, falling back to defaults if absent.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = project_dirs().map(|d| d.config_dir().join(SETTINGS_FILE));
                match default_path {
                    Some(p) if p.exists() => Self::from_file(&p),
                    _ => Ok(Self::default()),
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn import_options(&self) -> anyhow::Result<ImportOptions> {
        if !self.delimiter.is_ascii() {
            bail!("Delimiter must be a single ASCII character, got '{}'", self.delimiter);
        }
        Ok(ImportOptions {
            parser: ParserOptions {
                skip_lines: self.skip_lines,
                delimiter: self.delimiter as u8,
                ..ParserOptions::default()
            },
            remove_source: self.remove_source,
        })
    }

    /// A bare file name that does not exist as given is taken to live in
    /// `upload_dir`.
    pub fn resolve_source(&self, file: &Path) -> PathBuf {
        let is_bare = file.components().count() == 1;
        if is_bare && !file.exists() {
            self.upload_dir.join(file)
        } else {
            file.to_path_buf()
        }
    }
}
