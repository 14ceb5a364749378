#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pivot_core::process::{CommandError, CommandOutput};
use pivot_core::store::InMemoryJobStore;
use pivot_pipeline::catalog::DirectoryCatalog;
use pivot_pipeline::config::PipelineConfig;
use pivot_pipeline::orchestrator::JobOrchestrator;
use pivot_pipeline::remote::{LocalHost, RemoteHost};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// What the fake engine does when asked to render.
#[derive(Debug, Clone, Copy)]
pub enum EngineBehavior {
    /// Writes `{project}.jpg` as a copy of the first staged input.
    Stitch,
    /// Prints the control-point failure markers and exits 0.
    NoOverlap,
    /// Exits 139 with nothing useful on stdout.
    Crash,
    /// Exits 0 without writing any output.
    NoOutput,
    /// Writes `{project}.jpg` containing bytes no decoder accepts.
    Corrupt,
    /// Starts a long sleep, records its pid in `engine.pid`, and waits.
    Hang,
}

impl EngineBehavior {
    fn script(self) -> &'static str {
        match self {
            Self::Stitch => {
                r#"first=$(ls "$dir"/image_*.jpg | head -n 1); cp "$first" "$dir/$base.jpg"; echo "Panorama saved"; exit 0"#
            }
            Self::NoOverlap => {
                r#"echo "Could not find control points for all images"; echo "not stitching the panorama"; exit 0"#
            }
            Self::Crash => r#"echo "Segmentation fault" >&2; exit 139"#,
            Self::NoOutput => r#"echo "done"; exit 0"#,
            Self::Corrupt => r#"printf 'not a panorama' > "$dir/$base.jpg"; exit 0"#,
            Self::Hang => r#"sleep 30 & echo $! > "@PID_FILE@"; wait"#,
        }
    }
}

/// Write an executable stand-in for the stitching engine into `dir`.
pub fn write_fake_engine(dir: &Path, behavior: EngineBehavior) -> PathBuf {
    let path = dir.join("fake-engine.sh");
    let script = format!(
        r#"#!/usr/bin/env bash
if [ "$1" = "-createproject" ]; then
  out=""
  while [ $# -gt 0 ]; do
    if [ "$1" = "-output" ]; then out="$2"; shift 2; else shift; fi
  done
  echo "Created project $out"
  echo "project" > "$out"
  exit 0
fi
if [ "$1" = "-stitchnogui" ]; then
  dir=$(dirname "$2")
  base=$(basename "$2" .pts)
  {}
fi
echo "unknown invocation: $*" >&2
exit 2
"#,
        behavior
            .script()
            .replace("@PID_FILE@", &dir.join("engine.pid").to_string_lossy())
    );
    std::fs::write(&path, script).expect("write engine");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

/// Whether `pid` is a live (non-zombie) process.
pub fn is_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(") ")
            .is_some_and(|(_, rest)| !rest.starts_with('Z')),
        Err(_) => false,
    }
}

/// [`LocalHost`] that records every command and can refuse the probe.
#[derive(Default)]
pub struct RecordingHost {
    inner: LocalHost,
    calls: Mutex<Vec<String>>,
    unreachable: bool,
}

impl RecordingHost {
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }

    fn log(&self, call: String) {
        self.calls.lock().expect("lock").push(call);
    }
}

#[async_trait::async_trait]
impl RemoteHost for RecordingHost {
    fn describe(&self) -> String {
        "stitcher@test-host".into()
    }

    async fn exec(
        &self,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        self.log(format!("exec {command}"));
        if self.unreachable {
            return Ok(CommandOutput {
                stderr: "ssh: connect to host test-host port 22: Connection timed out".into(),
                exit_code: 255,
                ..Default::default()
            });
        }
        self.inner.exec(command, timeout, cancel).await
    }

    async fn push_files(
        &self,
        files: &[PathBuf],
        remote_dir: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        self.log(format!("push {} -> {remote_dir}", files.len()));
        self.inner.push_files(files, remote_dir, timeout, cancel).await
    }

    async fn pull_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        self.log(format!("pull {remote_path}"));
        self.inner
            .pull_file(remote_path, local_path, timeout, cancel)
            .await
    }
}

/// A complete pipeline over temp directories.
pub struct Harness {
    pub tmp: TempDir,
    pub config: PipelineConfig,
    pub host: Arc<RecordingHost>,
    pub store: Arc<InMemoryJobStore>,
    pub orchestrator: JobOrchestrator,
    pub catalog: DirectoryCatalog,
}

impl Harness {
    pub fn new(behavior: EngineBehavior) -> Self {
        Self::build(behavior, RecordingHost::default(), |_| {})
    }

    pub fn build(
        behavior: EngineBehavior,
        host: RecordingHost,
        tweak: impl FnOnce(&mut PipelineConfig),
    ) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let engine = write_fake_engine(tmp.path(), behavior);
        let catalog_dir = tmp.path().join("catalog");
        std::fs::create_dir(&catalog_dir).expect("catalog dir");

        let mut config = PipelineConfig::local(
            tmp.path().join("staging"),
            tmp.path().join("results"),
            tmp.path().join("remote").to_string_lossy().into_owned(),
            engine.to_string_lossy().into_owned(),
        );
        config.timeouts.engine = Duration::from_secs(20);
        tweak(&mut config);

        let host = Arc::new(host);
        let store = Arc::new(InMemoryJobStore::new());
        let orchestrator = JobOrchestrator::new(&config, host.clone(), store.clone());

        Self {
            tmp,
            config,
            host,
            store,
            orchestrator,
            catalog: DirectoryCatalog::new(catalog_dir),
        }
    }

    /// Put `names` into the catalog as decodable JPEGs, each wider than the last.
    pub fn add_images(&self, names: &[&str]) {
        for (i, name) in names.iter().enumerate() {
            write_photo(
                &self.tmp.path().join("catalog").join(name),
                1200 + 100 * i as u32,
                400,
            );
        }
    }

    pub fn staging_root(&self) -> PathBuf {
        self.config.staging_root.clone()
    }

    pub fn remote_root(&self) -> PathBuf {
        PathBuf::from(&self.config.remote_root)
    }
}

/// Encode a `width`x`height` gradient as JPEG at `path`.
pub fn write_photo(path: &Path, width: u32, height: u32) {
    image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 96])
    })
    .save_with_format(path, image::ImageFormat::Jpeg)
    .expect("write photo");
}

pub fn refs(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
