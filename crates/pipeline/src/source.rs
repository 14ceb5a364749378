//! Source fetching and staging.
//!
//! A [`SourceFetcher`] turns a logical reference into image bytes.
//! [`stage_sources`] writes every usable payload into the job's staging
//! directory as `image_{index:03}.{ext}`; individual failures are traced and
//! skipped, and only a run with nothing staged is fatal. A payload whose
//! format differs from the one `ext` names is re-encoded first.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use pivot_core::failure::JobFailure;
use pivot_core::naming;
use pivot_core::trace::DebugTrace;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("source '{0}' not found")]
    NotFound(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("invalid source: {0}")]
    Invalid(String),
}

/// Strategy for resolving source references to bytes.
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Short label used in trace lines, e.g. `"asset catalog"`.
    fn label(&self) -> &str;

    async fn fetch(&self, source_ref: &str) -> Result<Vec<u8>, FetchError>;
}

/// One file written to the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedSource {
    pub source_ref: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Reject payloads that are empty or not a recognised image format.
pub fn validate_image(bytes: &[u8]) -> Result<image::ImageFormat, FetchError> {
    if bytes.is_empty() {
        return Err(FetchError::Invalid("empty payload".into()));
    }
    image::guess_format(bytes)
        .map_err(|_| FetchError::Invalid("payload is not a recognised image".into()))
}

/// Re-encode `bytes` from `detected` into `target`. Matching formats pass through.
pub fn conform_image(
    bytes: Vec<u8>,
    detected: ImageFormat,
    target: ImageFormat,
) -> Result<Vec<u8>, FetchError> {
    if detected == target {
        return Ok(bytes);
    }
    let decoded = image::load_from_memory_with_format(&bytes, detected)
        .map_err(|e| FetchError::Invalid(format!("could not decode {detected:?} payload: {e}")))?;
    // JPEG has no alpha channel.
    let decoded = match target {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(decoded.into_rgb8()),
        _ => decoded,
    };
    let mut out = Cursor::new(Vec::new());
    decoded
        .write_to(&mut out, target)
        .map_err(|e| FetchError::Invalid(format!("could not convert to {target:?}: {e}")))?;
    Ok(out.into_inner())
}

async fn conform_blocking(
    bytes: Vec<u8>,
    detected: ImageFormat,
    target: ImageFormat,
) -> Result<Vec<u8>, FetchError> {
    tokio::task::spawn_blocking(move || conform_image(bytes, detected, target))
        .await
        .map_err(|e| FetchError::Invalid(format!("conversion task failed: {e}")))?
}

/// Fetch, validate and write each of `refs` into `dir`.
///
/// The staged name keeps the position of the reference in `refs`, so gaps
/// appear where sources were skipped.
pub async fn stage_sources(
    fetcher: &dyn SourceFetcher,
    refs: &[String],
    dir: &Path,
    extension: &str,
    trace: &DebugTrace,
    cancel: &CancellationToken,
) -> Result<Vec<StagedSource>, JobFailure> {
    trace.record(format!(
        "Fetching {} source image(s) from {}",
        refs.len(),
        fetcher.label()
    ));

    let target = ImageFormat::from_extension(extension);
    let mut staged = Vec::with_capacity(refs.len());
    for (index, source_ref) in refs.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(JobFailure::cancelled("Job cancelled while fetching sources"));
        }

        let bytes = match fetcher.fetch(source_ref).await {
            Ok(bytes) => bytes,
            Err(e) => {
                trace.warn(format!("Skipping source '{source_ref}': {e}"));
                continue;
            }
        };
        let format = match validate_image(&bytes) {
            Ok(format) => format,
            Err(e) => {
                trace.warn(format!("Skipping source '{source_ref}': {e}"));
                continue;
            }
        };
        let bytes = match target {
            Some(target) if target != format => {
                match conform_blocking(bytes, format, target).await {
                    Ok(converted) => {
                        trace.record(format!(
                            "Converted '{source_ref}' from {format:?} to {target:?}"
                        ));
                        converted
                    }
                    Err(e) => {
                        trace.warn(format!("Skipping source '{source_ref}': {e}"));
                        continue;
                    }
                }
            }
            _ => bytes,
        };

        let path = dir.join(naming::staged_file_name(index, extension));
        if let Err(e) = tokio::fs::write(&path, &bytes).await {
            trace.warn(format!(
                "Skipping source '{source_ref}': could not write {}: {e}",
                path.display()
            ));
            continue;
        }

        trace.record(format!(
            "Staged '{source_ref}' as {} ({} bytes, {format:?})",
            path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
            bytes.len()
        ));
        staged.push(StagedSource {
            source_ref: source_ref.clone(),
            path,
            size: bytes.len() as u64,
        });
    }

    if staged.is_empty() {
        return Err(JobFailure::invalid_input(
            "No valid input files could be staged from the provided sources",
        ));
    }

    trace.record(format!(
        "Staged {} of {} source image(s)",
        staged.len(),
        refs.len()
    ));
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use pivot_core::failure::FailureKind;

    use super::*;

    /// Smallest valid PNG signature plus IHDR start; enough for format sniffing.
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn encoded(format: ImageFormat) -> Vec<u8> {
        let img = image::RgbaImage::from_fn(40, 30, |x, y| {
            image::Rgba([(x * 6) as u8, (y * 8) as u8, 200, 255])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, format)
            .expect("encode");
        out.into_inner()
    }

    fn jpeg() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(40, 30, image::Rgb([10, 20, 30]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Jpeg)
            .expect("encode");
        out.into_inner()
    }

    struct MapFetcher(HashMap<String, Result<Vec<u8>, String>>);

    #[async_trait::async_trait]
    impl SourceFetcher for MapFetcher {
        fn label(&self) -> &str {
            "test map"
        }

        async fn fetch(&self, source_ref: &str) -> Result<Vec<u8>, FetchError> {
            match self.0.get(source_ref) {
                Some(Ok(bytes)) => Ok(bytes.clone()),
                Some(Err(msg)) => Err(FetchError::Unavailable(msg.clone())),
                None => Err(FetchError::NotFound(source_ref.into())),
            }
        }
    }

    fn refs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn partial_failures_are_skipped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let fetcher = MapFetcher(HashMap::from([
            ("a".to_string(), Ok(jpeg())),
            ("b".to_string(), Err("timeout".to_string())),
            ("c".to_string(), Ok(jpeg())),
            ("e".to_string(), Ok(jpeg())),
        ]));
        let trace = DebugTrace::new(uuid::Uuid::new_v4());

        let staged = stage_sources(
            &fetcher,
            &refs(&["a", "b", "c", "d", "e"]),
            tmp.path(),
            "jpg",
            &trace,
            &CancellationToken::new(),
        )
        .await
        .expect("staged");

        let names: Vec<_> = staged
            .iter()
            .map(|s| s.path.file_name().expect("name").to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["image_000.jpg", "image_002.jpg", "image_004.jpg"]);
        assert!(tmp.path().join("image_002.jpg").is_file());
        assert!(!tmp.path().join("image_001.jpg").exists());

        let skips = trace
            .snapshot()
            .iter()
            .filter(|e| e.message.contains("Skipping"))
            .count();
        assert_eq!(skips, 2);
    }

    #[tokio::test]
    async fn all_failures_are_invalid_input() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let fetcher = MapFetcher(HashMap::new());
        let trace = DebugTrace::new(uuid::Uuid::new_v4());

        let err = stage_sources(
            &fetcher,
            &refs(&["a", "b"]),
            tmp.path(),
            "jpg",
            &trace,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidInput);
        assert!(err.message.contains("No valid input files"));
    }

    #[tokio::test]
    async fn non_image_payloads_are_skipped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let fetcher = MapFetcher(HashMap::from([
            ("text".to_string(), Ok(b"hello world".to_vec())),
            ("empty".to_string(), Ok(Vec::new())),
        ]));
        let trace = DebugTrace::new(uuid::Uuid::new_v4());

        let result = stage_sources(
            &fetcher,
            &refs(&["text", "empty"]),
            tmp.path(),
            "jpg",
            &trace,
            &CancellationToken::new(),
        )
        .await;
        assert_matches!(result, Err(JobFailure { kind: FailureKind::InvalidInput, .. }));
    }

    #[tokio::test]
    async fn cancellation_stops_staging() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let fetcher = MapFetcher(HashMap::from([("a".to_string(), Ok(jpeg()))]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = stage_sources(
            &fetcher,
            &refs(&["a"]),
            tmp.path(),
            "jpg",
            &DebugTrace::new(uuid::Uuid::new_v4()),
            &cancel,
        )
        .await;
        assert_matches!(result, Err(JobFailure { kind: FailureKind::Cancelled, .. }));
    }

    #[tokio::test]
    async fn mismatched_formats_are_converted_to_the_input_extension() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let fetcher = MapFetcher(HashMap::from([
            ("png".to_string(), Ok(encoded(ImageFormat::Png))),
            ("webp".to_string(), Ok(encoded(ImageFormat::WebP))),
            ("jpeg".to_string(), Ok(jpeg())),
        ]));
        let trace = DebugTrace::new(uuid::Uuid::new_v4());

        let staged = stage_sources(
            &fetcher,
            &refs(&["png", "webp", "jpeg"]),
            tmp.path(),
            "jpg",
            &trace,
            &CancellationToken::new(),
        )
        .await
        .expect("staged");

        assert_eq!(staged.len(), 3);
        for source in &staged {
            let bytes = std::fs::read(&source.path).expect("read staged");
            assert_eq!(image::guess_format(&bytes).expect("format"), ImageFormat::Jpeg);
            let decoded = image::load_from_memory(&bytes).expect("decode");
            assert_eq!((decoded.width(), decoded.height()), (40, 30));
        }
        // The JPEG passes through byte for byte.
        assert_eq!(std::fs::read(&staged[2].path).expect("read"), jpeg());
        let conversions = trace
            .snapshot()
            .iter()
            .filter(|e| e.message.starts_with("Converted"))
            .count();
        assert_eq!(conversions, 2);
    }

    #[tokio::test]
    async fn undecodable_mismatch_is_skipped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let fetcher = MapFetcher(HashMap::from([
            ("broken".to_string(), Ok(PNG.to_vec())),
            ("ok".to_string(), Ok(jpeg())),
        ]));
        let trace = DebugTrace::new(uuid::Uuid::new_v4());

        let staged = stage_sources(
            &fetcher,
            &refs(&["broken", "ok"]),
            tmp.path(),
            "jpg",
            &trace,
            &CancellationToken::new(),
        )
        .await
        .expect("staged");

        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].source_ref, "ok");
        assert!(!tmp.path().join("image_000.jpg").exists());
        assert!(trace
            .snapshot()
            .iter()
            .any(|e| e.message.contains("Skipping source 'broken'")));
    }

    #[test]
    fn validate_image_sniffs_format() {
        assert_eq!(validate_image(PNG).expect("png"), image::ImageFormat::Png);
        assert_matches!(validate_image(b""), Err(FetchError::Invalid(_)));
        assert_matches!(validate_image(b"GIF? no"), Err(FetchError::Invalid(_)));
    }
}
