// ============================================================================
// src/config.rs – strict config loader
// ============================================================================

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::image::DEFAULT_SCRATCH;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/vol_imager.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageCfg {
    /// Destination image file.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub size_mb: Option<u64>,
    #[serde(default = "default_scratch")]
    pub scratch_mountpoint: PathBuf,
    /// `legacy`, `default`, `none`, or a file holding a literal fstab.
    #[serde(default)]
    pub fstab: Option<String>,
}

fn default_scratch() -> PathBuf {
    PathBuf::from(DEFAULT_SCRATCH)
}

impl Default for ImageCfg {
    fn default() -> Self {
        Self {
            path: None,
            size_mb: None,
            scratch_mountpoint: default_scratch(),
            fstab: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopyCfg {
    #[serde(default)]
    pub volume: Option<PathBuf>,
    #[serde(default)]
    pub exclude: Vec<PathBuf>,
    /// Try to carry extended attributes into the image.
    #[serde(default = "default_xattrs")]
    pub xattrs: bool,
}

fn default_xattrs() -> bool {
    true
}

impl Default for CopyCfg {
    fn default() -> Self {
        Self {
            volume: None,
            exclude: Vec::new(),
            xattrs: default_xattrs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeCfg {
    /// Stream subprocess output and log at debug level.
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub image: ImageCfg,
    #[serde(default)]
    pub copy: CopyCfg,
    #[serde(default)]
    pub runtime: RuntimeCfg,
    #[serde(skip)]
    pub path: PathBuf,
}

impl ConfigFile {
    pub fn load<P: AsRef<Path>>(p: P) -> Result<Self> {
        let s = fs::read_to_string(&p)
            .with_context(|| format!("read config: {}", p.as_ref().display()))?;
        let mut cfg: Self = if p.as_ref().extension().and_then(|e| e.to_str()) == Some("toml") {
            toml::from_str(&s).context("toml parse")?
        } else {
            serde_yaml::from_str(&s).context("yaml parse")?
        };
        cfg.path = p.as_ref().to_path_buf();
        Ok(cfg)
    }

    /// Load `explicit` if given, else the default path if it exists, else
    /// built-in defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load(DEFAULT_CONFIG_PATH),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_toml_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vol_imager.toml");
        fs::write(
            &path,
            r#"
[image]
path = "/var/tmp/root.img"
size_mb = 700
fstab = "default"

[copy]
volume = "/"
exclude = ["/dev", "/proc", "/sys"]
xattrs = false

[runtime]
debug = true
"#,
        )
        .unwrap();

        let cfg = ConfigFile::load(&path).unwrap();
        assert_eq!(cfg.image.path, Some(PathBuf::from("/var/tmp/root.img")));
        assert_eq!(cfg.image.size_mb, Some(700));
        assert_eq!(cfg.image.scratch_mountpoint, PathBuf::from(DEFAULT_SCRATCH));
        assert_eq!(cfg.image.fstab.as_deref(), Some("default"));
        assert_eq!(cfg.copy.exclude.len(), 3);
        assert!(!cfg.copy.xattrs);
        assert!(cfg.runtime.debug);
        assert_eq!(cfg.path, path);
    }

    #[test]
    fn loads_yaml_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vol_imager.yaml");
        fs::write(&path, "image:\n  size_mb: 1024\n  scratch_mountpoint: /run/img\n").unwrap();

        let cfg = ConfigFile::load(&path).unwrap();
        assert_eq!(cfg.image.size_mb, Some(1024));
        assert_eq!(cfg.image.scratch_mountpoint, PathBuf::from("/run/img"));
        assert!(cfg.copy.xattrs);
        assert!(cfg.copy.exclude.is_empty());
        assert!(!cfg.runtime.debug);
    }

    #[test]
    fn rejects_unknown_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[image]\nsize = 10\n").unwrap();
        assert!(ConfigFile::load(&path).is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        assert!(ConfigFile::discover(Some(Path::new("/nonexistent/vol_imager.toml"))).is_err());
    }
}
