//! Output resolution heuristic.
//!
//! The stitching engine does not always write the file name it was asked
//! for, so after stitching the remote directory is listed and the real
//! panorama is picked by precedence:
//!
//! 1. the first candidate whose name contains the job id or project name;
//! 2. otherwise the largest candidate (first one wins a size tie);
//! 3. no candidates at all is `OutputNotFound`.
//!
//! Candidates are listing entries with the output extension that are not
//! staged inputs. The result depends only on the listing it is given.

use serde::Serialize;

use crate::failure::JobFailure;
use crate::naming;

/// A regular file in a remote job directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFile {
    pub name: String,
    pub size: u64,
}

impl RemoteFile {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// Identity of the job whose output is being looked for.
#[derive(Debug, Clone, Copy)]
pub struct OutputQuery<'a> {
    pub job_id: &'a str,
    pub project_name: &'a str,
    pub extension: &'a str,
}

/// How the chosen file was picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchReason {
    /// Name contains the job id or project name.
    NameMatch,
    /// Largest candidate by size.
    Largest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub file: RemoteFile,
    pub reason: MatchReason,
}

/// Parse `"{size}\t{name}"` lines (as printed by `find -printf '%s\t%f\n'`).
///
/// Malformed lines are skipped. The result is sorted by name so callers see
/// a stable order no matter how the remote side enumerated the directory.
pub fn parse_listing(output: &str) -> Vec<RemoteFile> {
    let mut files: Vec<RemoteFile> = output
        .lines()
        .filter_map(|line| {
            let (size, name) = line.split_once('\t')?;
            let size = size.trim().parse().ok()?;
            let name = name.trim_end_matches('\r');
            (!name.is_empty()).then(|| RemoteFile::new(name, size))
        })
        .collect();
    files.sort_by(|a, b| a.name.cmp(&b.name));
    files
}

/// Files in `listing` that could be the stitched output.
pub fn candidates<'a>(listing: &'a [RemoteFile], extension: &str) -> Vec<&'a RemoteFile> {
    listing
        .iter()
        .filter(|f| naming::has_extension(&f.name, extension))
        .filter(|f| !f.name.starts_with(naming::INPUT_FILE_PREFIX))
        .collect()
}

/// Pick the stitched panorama out of `listing`.
pub fn resolve_output(
    listing: &[RemoteFile],
    query: OutputQuery<'_>,
) -> Result<Resolution, JobFailure> {
    let candidates = candidates(listing, query.extension);

    if let Some(file) = candidates
        .iter()
        .find(|f| f.name.contains(query.job_id) || f.name.contains(query.project_name))
    {
        return Ok(Resolution {
            file: (*file).clone(),
            reason: MatchReason::NameMatch,
        });
    }

    // `max_by_key` keeps the last maximum; fold keeps the first.
    let largest = candidates
        .iter()
        .fold(None::<&RemoteFile>, |best, f| match best {
            Some(b) if b.size >= f.size => Some(b),
            _ => Some(f),
        });

    largest
        .map(|file| Resolution {
            file: file.clone(),
            reason: MatchReason::Largest,
        })
        .ok_or_else(|| {
            JobFailure::output_not_found(format!(
                "No .{} panorama output was found after stitching",
                query.extension
            ))
        })
}
