//! Pipeline configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Engine output lines that mean "these images cannot be stitched".
pub const DEFAULT_FAILURE_MARKERS: [&str; 5] = [
    "Could not find control points for all images",
    "not stitching the panorama",
    "No control points found",
    "Unable to align images",
    "Optimization failed",
];

/// Path prefix under which published panoramas are served.
pub const RESULT_URL_PREFIX: &str = "/api/v1/panoramas";

const DEFAULT_ENGINE_PATH: &str = "~/ptgui_trial_13.0/PTGui";
const DEFAULT_LOCAL_REMOTE_ROOT: &str = "/tmp/panorama_jobs";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("SSH key file not found at {0}")]
    KeyNotFound(PathBuf),
}

/// Where the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMode {
    /// A separate host reached over ssh/scp.
    Ssh,
    /// This machine; commands run through `bash -c`.
    Local,
}

impl FromStr for RemoteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ssh" => Ok(Self::Ssh),
            "local" => Ok(Self::Local),
            other => Err(format!("expected 'ssh' or 'local', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSettings {
    pub host: String,
    pub user: String,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteSettings {
    Ssh(SshSettings),
    Local,
}

impl RemoteSettings {
    pub fn mode(&self) -> RemoteMode {
        match self {
            Self::Ssh(_) => RemoteMode::Ssh,
            Self::Local => RemoteMode::Local,
        }
    }
}

/// Upper bounds for each class of remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub probe: Duration,
    pub command: Duration,
    pub transfer: Duration,
    pub engine: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(10),
            command: Duration::from_secs(60),
            transfer: Duration::from_secs(300),
            engine: Duration::from_secs(900),
        }
    }
}

impl Timeouts {
    /// Longest a single job can spend on remote calls.
    ///
    /// One probe, two transfers, two engine phases and five plain commands
    /// (mkdir, upload check, project check, output listing, cleanup).
    pub fn job_budget(&self) -> Duration {
        self.probe + self.command * 5 + self.transfer * 2 + self.engine * 2
    }
}

/// Where `sourceRefs` are resolved for JSON-bodied requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSettings {
    Http {
        base_url: String,
        token: Option<String>,
    },
    Directory(PathBuf),
    /// Only multipart uploads are accepted.
    None,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub staging_root: PathBuf,
    pub results_root: PathBuf,
    /// Absolute directory on the compute host that holds one dir per job.
    pub remote_root: String,
    pub remote: RemoteSettings,
    pub engine_path: String,
    pub input_extension: String,
    pub output_extension: String,
    pub failure_markers: Vec<String>,
    pub timeouts: Timeouts,
    /// Skip workspace cleanup after a job terminates.
    pub keep_workspaces: bool,
    pub catalog: CatalogSettings,
    pub result_url_prefix: String,
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                  | Default                             |
    /// |--------------------------|-------------------------------------|
    /// | `STAGING_ROOT`           | `./tmp/staging`                     |
    /// | `RESULTS_ROOT`           | `./tmp/panoramas`                   |
    /// | `REMOTE_MODE`            | `ssh`                               |
    /// | `REMOTE_HOST`            | required in ssh mode                |
    /// | `REMOTE_USER`            | `ubuntu`                            |
    /// | `SSH_KEY_PATH`           | required in ssh mode                |
    /// | `REMOTE_ROOT`            | `/home/{user}/panorama_jobs` (ssh), `/tmp/panorama_jobs` (local) |
    /// | `ENGINE_PATH`            | `~/ptgui_trial_13.0/PTGui`          |
    /// | `ENGINE_FAILURE_MARKERS` | built-in markers, `|`-separated     |
    /// | `INPUT_EXTENSION`        | `jpg`                               |
    /// | `OUTPUT_EXTENSION`       | `jpg`                               |
    /// | `PROBE_TIMEOUT_SECS`     | `10`                                |
    /// | `COMMAND_TIMEOUT_SECS`   | `60`                                |
    /// | `TRANSFER_TIMEOUT_SECS`  | `300`                               |
    /// | `ENGINE_TIMEOUT_SECS`    | `900`                               |
    /// | `KEEP_WORKSPACES`        | `false`                             |
    /// | `CATALOG_URL`            | unset                               |
    /// | `CATALOG_TOKEN`          | unset                               |
    /// | `CATALOG_DIR`            | unset (ignored if `CATALOG_URL` set)|
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mode = match get("REMOTE_MODE") {
            Some(raw) => raw.parse::<RemoteMode>().map_err(|reason| ConfigError::Invalid {
                key: "REMOTE_MODE",
                value: raw,
                reason,
            })?,
            None => RemoteMode::Ssh,
        };

        let remote = match mode {
            RemoteMode::Ssh => RemoteSettings::Ssh(SshSettings {
                host: get("REMOTE_HOST").ok_or(ConfigError::Missing("REMOTE_HOST"))?,
                user: get("REMOTE_USER").unwrap_or_else(|| "ubuntu".into()),
                key_path: get("SSH_KEY_PATH")
                    .map(PathBuf::from)
                    .ok_or(ConfigError::Missing("SSH_KEY_PATH"))?,
            }),
            RemoteMode::Local => RemoteSettings::Local,
        };

        let remote_root = match (get("REMOTE_ROOT"), &remote) {
            (Some(root), _) => root,
            (None, RemoteSettings::Ssh(ssh)) => format!("/home/{}/panorama_jobs", ssh.user),
            (None, RemoteSettings::Local) => DEFAULT_LOCAL_REMOTE_ROOT.into(),
        };
        if !remote_root.starts_with('/') {
            return Err(ConfigError::Invalid {
                key: "REMOTE_ROOT",
                value: remote_root,
                reason: "must be an absolute path".into(),
            });
        }

        let failure_markers = match get("ENGINE_FAILURE_MARKERS") {
            Some(raw) => raw
                .split('|')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_FAILURE_MARKERS.map(str::to_string).to_vec(),
        };

        let catalog = match (get("CATALOG_URL"), get("CATALOG_DIR")) {
            (Some(base_url), _) => CatalogSettings::Http {
                base_url: base_url.trim_end_matches('/').to_string(),
                token: get("CATALOG_TOKEN"),
            },
            (None, Some(dir)) => CatalogSettings::Directory(PathBuf::from(dir)),
            (None, None) => CatalogSettings::None,
        };

        let defaults = Timeouts::default();
        Ok(Self {
            staging_root: get("STAGING_ROOT")
                .unwrap_or_else(|| "./tmp/staging".into())
                .into(),
            results_root: get("RESULTS_ROOT")
                .unwrap_or_else(|| "./tmp/panoramas".into())
                .into(),
            remote_root: remote_root.trim_end_matches('/').to_string(),
            remote,
            engine_path: get("ENGINE_PATH").unwrap_or_else(|| DEFAULT_ENGINE_PATH.into()),
            input_extension: extension(get("INPUT_EXTENSION")),
            output_extension: extension(get("OUTPUT_EXTENSION")),
            failure_markers,
            timeouts: Timeouts {
                probe: secs(&get, "PROBE_TIMEOUT_SECS", defaults.probe)?,
                command: secs(&get, "COMMAND_TIMEOUT_SECS", defaults.command)?,
                transfer: secs(&get, "TRANSFER_TIMEOUT_SECS", defaults.transfer)?,
                engine: secs(&get, "ENGINE_TIMEOUT_SECS", defaults.engine)?,
            },
            keep_workspaces: flag(&get, "KEEP_WORKSPACES")?,
            catalog,
            result_url_prefix: RESULT_URL_PREFIX.into(),
        })
    }

    /// Configuration for running the engine on this machine.
    pub fn local(
        staging_root: impl Into<PathBuf>,
        results_root: impl Into<PathBuf>,
        remote_root: impl Into<String>,
        engine_path: impl Into<String>,
    ) -> Self {
        Self {
            staging_root: staging_root.into(),
            results_root: results_root.into(),
            remote_root: remote_root.into(),
            remote: RemoteSettings::Local,
            engine_path: engine_path.into(),
            input_extension: "jpg".into(),
            output_extension: "jpg".into(),
            failure_markers: DEFAULT_FAILURE_MARKERS.map(str::to_string).to_vec(),
            timeouts: Timeouts::default(),
            keep_workspaces: false,
            catalog: CatalogSettings::None,
            result_url_prefix: RESULT_URL_PREFIX.into(),
        }
    }
}

fn extension(value: Option<String>) -> String {
    value
        .map(|v| v.trim().trim_start_matches('.').to_ascii_lowercase())
        .unwrap_or_else(|| "jpg".into())
}

fn secs(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(0) | Err(_) => Err(ConfigError::Invalid {
                key,
                value: raw,
                reason: "expected a positive number of seconds".into(),
            }),
            Ok(n) => Ok(Duration::from_secs(n)),
        },
    }
}

fn flag(get: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<bool, ConfigError> {
    match get(key) {
        None => Ok(false),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                value: raw,
                reason: "expected true or false".into(),
            }),
        },
    }
}
