//! Local staging and published-result directories.
//!
//! Each job owns `{staging_root}/{id}` while it runs. A retrieved panorama is
//! moved to `{results_root}/{id}/` so it survives the staging cleanup, and
//! an 800px JPEG preview is rendered beside it.

use std::io::Write;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use pivot_core::failure::JobFailure;
use pivot_core::job::Job;
use pivot_core::naming;
use pivot_core::types::JobId;

/// Longest edge of a generated thumbnail, in pixels.
pub const THUMBNAIL_MAX_EDGE: u32 = 800;

const THUMBNAIL_QUALITY: u8 = 95;

#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("could not decode panorama: {0}")]
    Image(#[from] image::ImageError),

    #[error("could not write thumbnail: {0}")]
    Io(#[from] std::io::Error),

    #[error("thumbnail task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    staging_root: PathBuf,
    results_root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(staging_root: impl Into<PathBuf>, results_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
            results_root: results_root.into(),
        }
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    pub fn results_root(&self) -> &Path {
        &self.results_root
    }

    /// Create the job's staging directory (and the root) if absent.
    pub async fn ensure_local_dir(&self, job: &Job) -> Result<(), JobFailure> {
        let dir = job.local_dir();
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            JobFailure::workspace(format!(
                "Could not create staging directory {}: {e}",
                dir.display()
            ))
        })?;
        job.trace()
            .record(format!("Created local staging directory {}", dir.display()));
        Ok(())
    }

    /// Directory on the compute host that belongs to `job`.
    pub fn remote_dir_path<'a>(&self, job: &'a Job) -> &'a str {
        job.remote_dir()
    }

    /// Remove the job's staging directory. Missing directories are fine.
    pub async fn cleanup_local(&self, job: &Job) {
        let dir = job.local_dir();
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => job
                .trace()
                .record(format!("Removed local staging directory {}", dir.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => job.trace().warn(format!(
                "Could not remove local staging directory {}: {e}",
                dir.display()
            )),
        }
    }

    /// Move a retrieved panorama to `{results_root}/{id}/{project}.{ext}`.
    pub async fn publish_result(
        &self,
        job: &Job,
        retrieved: &Path,
        extension: &str,
    ) -> Result<PathBuf, JobFailure> {
        let dir = self.results_root.join(job.id().to_string());
        let target = dir.join(format!("{}.{extension}", job.project_name()));

        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            JobFailure::workspace(format!(
                "Could not create results directory {}: {e}",
                dir.display()
            ))
        })?;

        // Rename fails across filesystems; fall back to copy.
        if tokio::fs::rename(retrieved, &target).await.is_err() {
            tokio::fs::copy(retrieved, &target).await.map_err(|e| {
                JobFailure::workspace(format!(
                    "Could not publish {} to {}: {e}",
                    retrieved.display(),
                    target.display()
                ))
            })?;
        }

        job.trace()
            .record(format!("Published panorama to {}", target.display()));
        Ok(target)
    }

    /// Render `{project}_thumb.jpg` beside a published panorama.
    ///
    /// The preview fits inside 800x800 and is never enlarged. A partial file
    /// is removed on failure.
    pub async fn write_thumbnail(
        &self,
        job: &Job,
        published: &Path,
    ) -> Result<PathBuf, ThumbnailError> {
        let source = published.to_path_buf();
        let target = self
            .results_root
            .join(job.id().to_string())
            .join(naming::thumbnail_file_name(job.project_name()));

        let rendered = {
            let target = target.clone();
            tokio::task::spawn_blocking(move || render_thumbnail(&source, &target)).await
        };
        match rendered.map_err(ThumbnailError::from).and_then(|r| r) {
            Ok((width, height)) => {
                job.trace().record(format!(
                    "Wrote {width}x{height} thumbnail to {}",
                    target.display()
                ));
                Ok(target)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&target).await;
                Err(e)
            }
        }
    }

    /// Path of a published file, or `None` if the name is unsafe or absent.
    pub async fn published_file(&self, job_id: JobId, file_name: &str) -> Option<PathBuf> {
        if !is_safe_file_name(file_name) {
            return None;
        }
        let path = self.results_root.join(job_id.to_string()).join(file_name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            _ => None,
        }
    }
}

/// Decode `source`, shrink it to fit the thumbnail box and save it as JPEG.
fn render_thumbnail(source: &Path, target: &Path) -> Result<(u32, u32), ThumbnailError> {
    let panorama = image::ImageReader::open(source)?
        .with_guessed_format()?
        .decode()?;
    let preview = if panorama.width() > THUMBNAIL_MAX_EDGE || panorama.height() > THUMBNAIL_MAX_EDGE
    {
        panorama.thumbnail(THUMBNAIL_MAX_EDGE, THUMBNAIL_MAX_EDGE)
    } else {
        panorama
    };
    let rgb = preview.into_rgb8();

    let mut writer = std::io::BufWriter::new(std::fs::File::create(target)?);
    JpegEncoder::new_with_quality(&mut writer, THUMBNAIL_QUALITY).encode_image(&rgb)?;
    writer.flush()?;
    Ok(rgb.dimensions())
}

/// A bare file name: no separators, no parent references, not hidden.
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.starts_with('.')
}
