// ============================================================================
// src/cmd/make.rs – `vol_imager make`: bundle a volume into an image
// ============================================================================

use anyhow::{anyhow, bail, Context, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::cmd::SystemRunner;
use crate::config::ConfigFile;
use crate::error::ImageError;
use crate::image::{BuildRequest, CopyOptions, FstabSpec, ImageBuilder};
use crate::mounts::ProcMounts;
use crate::ui::UX;
use crate::util::audit::audit_log;
use crate::util::privilege::require_root;

const DEFAULT_VOLUME: &str = "/";

/// Command-line view of a build; unset fields fall back to the config file.
#[derive(Debug, Clone, Default)]
pub struct MakeOptions {
    pub volume: Option<PathBuf>,
    pub image: Option<PathBuf>,
    pub size_mb: Option<u64>,
    pub exclude: Vec<PathBuf>,
    pub fstab: Option<String>,
    pub scratch: Option<PathBuf>,
    pub no_xattrs: bool,
}

/// Merge CLI options over the config file into a validated request.
pub fn resolve_request(opts: &MakeOptions, cfg: &ConfigFile) -> Result<BuildRequest> {
    let volume = opts
        .volume
        .clone()
        .or_else(|| cfg.copy.volume.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_VOLUME));
    if !volume.is_absolute() {
        bail!("volume must be an absolute path: {}", volume.display());
    }
    if !volume.is_dir() {
        bail!("volume {} is not a directory", volume.display());
    }

    let image = opts
        .image
        .clone()
        .or_else(|| cfg.image.path.clone())
        .ok_or_else(|| anyhow!("no image path given; pass --image or set image.path"))?;
    let image = if image.is_absolute() {
        image
    } else {
        std::env::current_dir()
            .context("resolve current directory")?
            .join(image)
    };

    let size_mb = opts
        .size_mb
        .or(cfg.image.size_mb)
        .ok_or_else(|| anyhow!("no image size given; pass --size or set image.size_mb"))?;
    if size_mb == 0 {
        return Err(ImageError::InvalidSize(size_mb).into());
    }

    let mut exclusions = BTreeSet::new();
    for path in cfg.copy.exclude.iter().chain(opts.exclude.iter()) {
        if !path.is_absolute() {
            bail!("exclusions must be absolute paths: {}", path.display());
        }
        exclusions.insert(path.clone());
    }
    // An image written inside the volume would otherwise be copied into itself.
    if image.starts_with(&volume) {
        exclusions.insert(image.clone());
    }

    let fstab = opts
        .fstab
        .as_deref()
        .or(cfg.image.fstab.as_deref())
        .map(FstabSpec::from_arg)
        .transpose()?
        .unwrap_or_default();

    let scratch = opts
        .scratch
        .clone()
        .unwrap_or_else(|| cfg.image.scratch_mountpoint.clone());
    if !scratch.is_absolute() {
        bail!("scratch mountpoint must be absolute: {}", scratch.display());
    }

    Ok(BuildRequest {
        volume,
        image,
        size_mb,
        exclusions,
        fstab,
        scratch,
        copy: CopyOptions {
            xattrs: cfg.copy.xattrs && !opts.no_xattrs,
        },
    })
}

pub fn run_make(ui: &UX, request: BuildRequest, debug: bool) -> Result<()> {
    require_root()?;

    ui.banner();
    ui.phase("Build Plan");
    ui.data_panel(
        "Image",
        &[
            ("Volume", request.volume.display().to_string()),
            ("Image", request.image.display().to_string()),
            ("Size", format!("{} MiB", request.size_mb)),
            ("Scratch", request.scratch.display().to_string()),
            ("fstab", request.fstab.label().to_string()),
            ("Xattrs", flag_label(request.copy.xattrs)),
        ],
    );

    let image = request.image.display().to_string();
    audit_log(
        "BUILD_START",
        &format!(
            "volume={} image={} size_mb={}",
            request.volume.display(),
            image,
            request.size_mb
        ),
    );

    let runner = SystemRunner::new(debug);
    let mounts = ProcMounts::default();
    let mut builder = ImageBuilder::new(&runner, &mounts, request);

    ui.phase("Excluded Paths");
    for path in builder.exclusions() {
        ui.info(&path.display().to_string());
    }

    ui.phase("Constructing Image");
    match builder.make() {
        Ok(report) => {
            if let Some(warning) = report.copy.warning {
                ui.warn(&warning.to_string());
            }
            if let Some(lines) = report.fstab_lines {
                ui.phase("fstab Written");
                for line in &lines {
                    ui.note(line);
                }
            }
            ui.success(&format!("Image ready at {image}."));
            audit_log("BUILD_DONE", &format!("image={image}"));
            Ok(())
        }
        Err(err) => {
            if let ImageError::AlreadyMounted { mountpoint } = &err {
                ui.note(&format!(
                    "Left {} as found. Run `vol_imager release --scratch {}` once nothing else uses it.",
                    mountpoint.display(),
                    mountpoint.display()
                ));
            }
            let code = err
                .exit_code()
                .map(|c| format!(" code={c}"))
                .unwrap_or_default();
            let stages = builder
                .history()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(">");
            audit_log(
                "BUILD_FAILED",
                &format!(
                    "image={image} state={}{code} stages={stages} err={err}",
                    builder.state()
                ),
            );
            Err(err).context("image build failed")
        }
    }
}

fn flag_label(enabled: bool) -> String {
    if enabled {
        "enabled".to_string()
    } else {
        "disabled".to_string()
    }
}
