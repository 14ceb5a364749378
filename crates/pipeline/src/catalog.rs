//! [`SourceFetcher`] implementations.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CatalogSettings;
use crate::source::{FetchError, SourceFetcher};

/// Per-request timeout for catalog downloads.
const CATALOG_TIMEOUT: Duration = Duration::from_secs(60);

/// Build the fetcher configured for JSON-bodied requests, if any.
pub fn from_settings(settings: &CatalogSettings) -> Option<Arc<dyn SourceFetcher>> {
    match settings {
        CatalogSettings::Http { base_url, token } => {
            Some(Arc::new(HttpCatalog::new(base_url.clone(), token.clone())))
        }
        CatalogSettings::Directory(root) => Some(Arc::new(DirectoryCatalog::new(root.clone()))),
        CatalogSettings::None => None,
    }
}

// ---------------------------------------------------------------------------
// HTTP asset catalog
// ---------------------------------------------------------------------------

/// Downloads `GET {base_url}/{ref}` from the asset catalog.
///
/// The reference is percent-encoded as one path segment, so a `/`, `?` or
/// `#` inside it never changes which resource is requested.
pub struct HttpCatalog {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpCatalog {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            token,
        }
    }

    /// URL of the asset named `source_ref`.
    pub fn asset_url(&self, source_ref: &str) -> Result<reqwest::Url, FetchError> {
        if matches!(source_ref, "" | "." | "..") {
            return Err(FetchError::Invalid(format!(
                "reference '{source_ref}' does not name an asset"
            )));
        }
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            FetchError::Unavailable(format!("invalid catalog URL '{}': {e}", self.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                FetchError::Unavailable(format!("catalog URL '{}' cannot hold a path", self.base_url))
            })?
            .pop_if_empty()
            .push(source_ref);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl SourceFetcher for HttpCatalog {
    fn label(&self) -> &str {
        "asset catalog"
    }

    async fn fetch(&self, source_ref: &str) -> Result<Vec<u8>, FetchError> {
        let mut request = self
            .client
            .get(self.asset_url(source_ref)?)
            .timeout(CATALOG_TIMEOUT);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(source_ref.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Unavailable(format!(
                "catalog returned {} for '{source_ref}'",
                status.as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Unavailable(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Directory catalog
// ---------------------------------------------------------------------------

/// Reads `{root}/{ref}` from a local directory.
pub struct DirectoryCatalog {
    root: PathBuf,
}

impl DirectoryCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait::async_trait]
impl SourceFetcher for DirectoryCatalog {
    fn label(&self) -> &str {
        "catalog directory"
    }

    async fn fetch(&self, source_ref: &str) -> Result<Vec<u8>, FetchError> {
        if !crate::workspace::is_safe_file_name(source_ref) {
            return Err(FetchError::Invalid(format!(
                "reference '{source_ref}' is not a plain file name"
            )));
        }
        match tokio::fs::read(self.root.join(source_ref)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(source_ref.to_string()))
            }
            Err(e) => Err(FetchError::Unavailable(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Uploaded files
// ---------------------------------------------------------------------------

/// One file received in a multipart request.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Raw uploads held in memory; references are assigned on construction.
#[derive(Debug, Default)]
pub struct UploadedFiles {
    refs: Vec<String>,
    files: HashMap<String, UploadedImage>,
}

impl UploadedFiles {
    /// Each upload gets the reference `{index}-{file_name}`, so duplicate
    /// names from the client stay distinct.
    pub fn new(uploads: Vec<UploadedImage>) -> Self {
        let mut refs = Vec::with_capacity(uploads.len());
        let mut files = HashMap::with_capacity(uploads.len());
        for (index, upload) in uploads.into_iter().enumerate() {
            let source_ref = format!("{index}-{}", upload.file_name);
            refs.push(source_ref.clone());
            files.insert(source_ref, upload);
        }
        Self { refs, files }
    }

    /// References in upload order.
    pub fn refs(&self) -> &[String] {
        &self.refs
    }
}

#[async_trait::async_trait]
impl SourceFetcher for UploadedFiles {
    fn label(&self) -> &str {
        "uploaded files"
    }

    async fn fetch(&self, source_ref: &str) -> Result<Vec<u8>, FetchError> {
        self.files
            .get(source_ref)
            .map(|upload| upload.bytes.clone())
            .ok_or_else(|| FetchError::NotFound(source_ref.to_string()))
    }
}
