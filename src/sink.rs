//! Frame sink: where captured stills land on disk.
//!
//! Layout is one directory per job under the upload root:
//!
//! ```text
//! <upload_root>/<job_id>/frame_0001.jpg
//! <upload_root>/<job_id>/frame_0002.jpg
//! ```
//!
//! Files are written to a `.part` sibling and renamed into place, so a
//! reconstruction run scanning the directory never sees a half-written JPEG.
//! A failed write removes its `.part` file.
//!
//! Starting a job clears the frames of any earlier run with the same id, so
//! the files in a job directory always come from a single run and number
//! `1..=frame_count`. Files that do not look like frames are left alone.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::frame::Frame;

/// JPEG quality used for photogrammetry stills.
pub const PHOTOGRAMMETRY_JPEG_QUALITY: u8 = 95;

const MAX_JOB_ID_LEN: usize = 128;

/// Storage destination for a job's frames.
pub trait FrameSink: Send + Sync {
    /// Create (if needed) and return the directory for `job_id`.
    fn ensure_job_dir(&self, job_id: &str) -> Result<PathBuf>;

    /// Remove frames (and leftover `.part` files) of an earlier run from `dir`.
    /// Returns how many files were removed.
    fn clear_frames(&self, dir: &Path) -> Result<usize>;

    /// Persist `frame` as sequence number `sequence` inside `dir`.
    fn write_frame(&self, dir: &Path, sequence: u64, frame: &Frame, quality: u8) -> Result<PathBuf>;
}

/// Writes JPEG files under `<root>/<job_id>/`.
#[derive(Clone, Debug)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the upload root itself. Called once at service startup.
    pub fn ensure_root(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create upload root {}", self.root.display()))
    }
}

impl FrameSink for DirectorySink {
    fn ensure_job_dir(&self, job_id: &str) -> Result<PathBuf> {
        validate_job_id(job_id)?;
        let dir = self.root.join(job_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create job directory {}", dir.display()))?;
        Ok(dir)
    }

    fn clear_frames(&self, dir: &Path) -> Result<usize> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to list job directory {}", dir.display()))?;
        let mut removed = 0;
        for entry in entries {
            let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
            let name = entry.file_name();
            if !is_frame_file(&name.to_string_lossy()) {
                continue;
            }
            let path = entry.path();
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove stale frame {}", path.display()))?;
            removed += 1;
        }
        Ok(removed)
    }

    fn write_frame(&self, dir: &Path, sequence: u64, frame: &Frame, quality: u8) -> Result<PathBuf> {
        let path = dir.join(frame_filename(sequence));
        let partial = path.with_extension("jpg.part");

        let file = File::create(&partial)
            .with_context(|| format!("failed to create {}", partial.display()))?;
        let written = encode_jpeg(file, frame, quality)
            .with_context(|| format!("failed to encode {}", path.display()))
            .and_then(|()| {
                std::fs::rename(&partial, &path)
                    .with_context(|| format!("failed to move frame into {}", path.display()))
            });
        if let Err(err) = written {
            if let Err(cleanup) = std::fs::remove_file(&partial) {
                log::warn!("failed to remove {}: {}", partial.display(), cleanup);
            }
            return Err(err);
        }
        Ok(path)
    }
}

fn encode_jpeg(file: File, frame: &Frame, quality: u8) -> Result<()> {
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, quality).encode(
        frame.pixels(),
        frame.width,
        frame.height,
        ExtendedColorType::Rgb8,
    )?;
    writer.flush()?;
    Ok(())
}

/// `frame_<digits>.jpg`, or its `.part` sibling.
fn is_frame_file(name: &str) -> bool {
    let stem = name
        .strip_suffix(".jpg.part")
        .or_else(|| name.strip_suffix(".jpg"))
        .and_then(|rest| rest.strip_prefix("frame_"));
    matches!(stem, Some(digits) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// `frame_0001.jpg`, `frame_0002.jpg`, ... Sequences past 9999 keep growing in width.
pub fn frame_filename(sequence: u64) -> String {
    format!("frame_{:04}.jpg", sequence)
}

/// Job ids become directory names, so they must be a single safe path segment.
pub fn validate_job_id(job_id: &str) -> Result<()> {
    if job_id.is_empty() {
        return Err(anyhow!("job id must not be empty"));
    }
    if job_id.len() > MAX_JOB_ID_LEN {
        return Err(anyhow!(
            "job id must be at most {} characters",
            MAX_JOB_ID_LEN
        ));
    }
    if job_id == "." || job_id == ".." {
        return Err(anyhow!("job id '{}' is not a valid directory name", job_id));
    }
    if !job_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(anyhow!(
            "job id '{}' may only contain ASCII letters, digits, '-', '_' and '.'",
            job_id
        ));
    }
    Ok(())
}
