//! Naming conventions for job artifacts.
//!
//! Staged inputs get positional names so the engine's glob sees a stable,
//! shell-safe set of files regardless of what the caller uploaded. Project
//! names are sanitized to a token the engine and the shell accept.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::JobId;

/// Prefix of every staged input file (`image_000.jpg`, `image_001.jpg`, ...).
pub const INPUT_FILE_PREFIX: &str = "image_";

/// Extension of the project file written by the create-project phase.
pub const PROJECT_FILE_EXTENSION: &str = "pts";

/// Maximum length of the sanitized human part of a project name.
const MAX_NAME_TOKEN_LEN: usize = 64;

static UNSAFE_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-zA-Z0-9]").expect("valid regex"));

/// Replace every character outside `[A-Za-z0-9]` with `_`.
///
/// ```
/// use pivot_core::naming::sanitize_token;
///
/// assert_eq!(sanitize_token("Main Quad / north"), "Main_Quad___north");
/// ```
pub fn sanitize_token(name: &str) -> String {
    let token = UNSAFE_CHARS_RE.replace_all(name.trim(), "_");
    token.chars().take(MAX_NAME_TOKEN_LEN).collect()
}

/// Name used when the caller did not supply one.
pub fn default_human_name(job_id: JobId) -> String {
    format!("panorama_{job_id}")
}

/// Build the engine project name: `{sanitized human name}_{job id}`.
///
/// The job id suffix keeps two jobs with the same human name apart.
pub fn project_name(human_name: &str, job_id: JobId) -> String {
    format!("{}_{job_id}", sanitize_token(human_name))
}

/// Normalized filename of the staged input at `index`.
pub fn staged_file_name(index: usize, extension: &str) -> String {
    format!("{INPUT_FILE_PREFIX}{index:03}.{extension}")
}

/// Filename of the engine project file.
pub fn project_file_name(project_name: &str) -> String {
    format!("{project_name}.{PROJECT_FILE_EXTENSION}")
}

/// Filename of the preview written next to a published panorama.
pub fn thumbnail_file_name(project_name: &str) -> String {
    format!("{project_name}_thumb.jpg")
}

/// Whether `file_name` carries `extension`, compared case-insensitively.
pub fn has_extension(file_name: &str, extension: &str) -> bool {
    file_name
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case(extension))
}
