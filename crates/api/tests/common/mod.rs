#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use pivot_core::store::{InMemoryJobStore, JobStore};
use pivot_pipeline::catalog::DirectoryCatalog;
use pivot_pipeline::config::PipelineConfig;
use pivot_pipeline::orchestrator::JobOrchestrator;
use pivot_pipeline::remote::LocalHost;
use pivot_pipeline::source::SourceFetcher;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use pivot_api::background::JobRegistry;
use pivot_api::config::ServerConfig;
use pivot_api::router::build_app_router;
use pivot_api::state::AppState;

/// JPEG SOI marker plus an APP0 header; enough for format sniffing.
pub const JPEG_BYTES: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01,
];

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        max_upload_bytes: 16 * 1024 * 1024,
    }
}

/// Engine script body run for `-stitchnogui`; `$dir` and `$base` are set.
/// The "panorama" is a copy of the first staged input.
pub const STITCH_OK: &str = r#"first=$(ls "$dir"/image_*.jpg | head -n 1); cp "$first" "$dir/$base.jpg"; echo "Panorama saved"; exit 0"#;
pub const STITCH_NO_OVERLAP: &str =
    r#"echo "Could not find control points for all images"; exit 0"#;
pub const STITCH_HANG: &str = "sleep 30";

fn write_fake_engine(dir: &Path, stitch_body: &str) -> PathBuf {
    let path = dir.join("fake-engine.sh");
    let script = format!(
        r#"#!/usr/bin/env bash
if [ "$1" = "-createproject" ]; then
  out=""
  while [ $# -gt 0 ]; do
    if [ "$1" = "-output" ]; then out="$2"; shift 2; else shift; fi
  done
  echo "project" > "$out"
  exit 0
fi
if [ "$1" = "-stitchnogui" ]; then
  dir=$(dirname "$2")
  base=$(basename "$2" .pts)
  {stitch_body}
fi
exit 2
"#
    );
    std::fs::write(&path, script).expect("write engine");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

/// A fully wired application running the engine locally in temp dirs.
pub struct TestApp {
    pub tmp: TempDir,
    pub router: Router,
    pub store: Arc<InMemoryJobStore>,
    pub state: AppState,
}

impl TestApp {
    pub fn new(stitch_body: &str) -> Self {
        Self::build(stitch_body, true, |_| {})
    }

    /// App without a source catalog; only uploads are accepted.
    pub fn upload_only(stitch_body: &str) -> Self {
        Self::build(stitch_body, false, |_| {})
    }

    /// App with a catalog and a server config adjusted by `tweak`.
    pub fn with_config(stitch_body: &str, tweak: impl FnOnce(&mut ServerConfig)) -> Self {
        Self::build(stitch_body, true, tweak)
    }

    fn build(stitch_body: &str, with_catalog: bool, tweak: impl FnOnce(&mut ServerConfig)) -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let engine = write_fake_engine(tmp.path(), stitch_body);
        let remote_root = tmp.path().join("remote");
        let pipeline = PipelineConfig::local(
            tmp.path().join("staging"),
            tmp.path().join("results"),
            remote_root.to_string_lossy().into_owned(),
            engine.to_string_lossy().into_owned(),
        );

        let catalog_dir = tmp.path().join("catalog");
        std::fs::create_dir_all(&catalog_dir).expect("catalog dir");
        let catalog: Option<Arc<dyn SourceFetcher>> = if with_catalog {
            Some(Arc::new(DirectoryCatalog::new(&catalog_dir)))
        } else {
            None
        };

        let store = Arc::new(InMemoryJobStore::new());
        let mut config = test_config();
        tweak(&mut config);
        let state = AppState {
            pool: None,
            config: Arc::new(config.clone()),
            orchestrator: Arc::new(JobOrchestrator::new(
                &pipeline,
                Arc::new(LocalHost::new()),
                Arc::clone(&store) as Arc<dyn JobStore>,
            )),
            catalog,
            jobs: Arc::new(JobRegistry::new()),
            shutdown: CancellationToken::new(),
        };

        Self {
            router: build_app_router(state.clone(), &config),
            tmp,
            store,
            state,
        }
    }

    /// Put decodable 1600x400 JPEGs into the catalog directory.
    pub fn add_images(&self, names: &[&str]) {
        for name in names {
            image::RgbImage::from_fn(1600, 400, |x, y| {
                image::Rgb([(x % 256) as u8, (y % 256) as u8, 64])
            })
            .save_with_format(
                self.tmp.path().join("catalog").join(name),
                image::ImageFormat::Jpeg,
            )
            .expect("write image");
        }
    }

    pub fn catalog_file(&self, name: &str) -> Vec<u8> {
        std::fs::read(self.tmp.path().join("catalog").join(name)).expect("read catalog image")
    }

    pub fn staging_root(&self) -> PathBuf {
        self.tmp.path().join("staging")
    }

    pub fn remote_root(&self) -> PathBuf {
        self.tmp.path().join("remote")
    }
}

/// Number of entries under `dir`, treating a missing directory as empty.
pub fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, json: serde_json::Value) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn post_empty(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Multipart body with one part per `(field, file_name, content_type, bytes)`.
pub fn multipart_body(parts: &[(&str, Option<&str>, &str, &[u8])]) -> (String, Vec<u8>) {
    let boundary = "pivot-test-boundary";
    let mut body = Vec::new();
    for (field, file_name, content_type, bytes) in parts {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        match file_name {
            Some(file_name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{field}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

pub async fn post_multipart(app: Router, uri: &str, content_type: String, body: Vec<u8>) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", content_type)
            .body(Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}
