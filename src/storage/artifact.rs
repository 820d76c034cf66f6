//! Model artifact fetcher
//!
//! Makes sure the GGUF file exists locally, downloading it from a plain URL
//! or a HuggingFace reference when it is missing. Downloads are streamed to
//! a temporary file next to the target and renamed into place, so a reader
//! never sees a partial model.

use crate::inference::error::EngineError;
use crate::types::model::ModelArtifact;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Guarantees a model file is present on local disk
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Return the artifact at `path`, fetching it from `source_url` if absent
    async fn ensure(
        &self,
        path: &Path,
        source_url: Option<&str>,
    ) -> Result<ModelArtifact, EngineError>;
}

/// Parsed HuggingFace file reference
#[derive(Debug, Clone)]
pub struct HuggingFaceUrl {
    pub repo_id: String,
    pub filename: String,
    pub revision: String,
}

impl HuggingFaceUrl {
    /// Parse the HuggingFace reference formats we accept
    pub fn parse(url: &str) -> Result<Self, String> {
        // 1. https://huggingface.co/username/repo/blob/main/model.gguf
        // 2. https://huggingface.co/username/repo/resolve/main/model.gguf
        // 3. username/repo/model.gguf

        let url = url.trim();
        let url = url.split('?').next().unwrap_or(url);
        let url = url.split('#').next().unwrap_or(url);

        let path = url
            .strip_prefix("https://huggingface.co/")
            .or_else(|| url.strip_prefix("http://huggingface.co/"))
            .unwrap_or(url);

        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() < 2 {
            return Err(format!("Invalid HuggingFace reference: {}", url));
        }
        let repo_id = format!("{}/{}", parts[0], parts[1]);

        if let Some(marker) = parts.iter().position(|&p| p == "blob" || p == "resolve") {
            if parts.len() > marker + 2 {
                return Ok(Self {
                    repo_id,
                    filename: parts[marker + 2..].join("/"),
                    revision: parts[marker + 1].to_string(),
                });
            }
            return Err(format!("HuggingFace reference names no file: {}", url));
        }

        if parts.len() > 2 {
            return Ok(Self {
                repo_id,
                filename: parts[2..].join("/"),
                revision: "main".to_string(),
            });
        }

        Err(format!("HuggingFace reference names no file: {}", url))
    }

    /// Build the download URL for the file
    pub fn download_url(&self) -> String {
        format!(
            "https://huggingface.co/{}/resolve/{}/{}",
            self.repo_id, self.revision, self.filename
        )
    }
}

/// Turn a configured source into the URL to download from
pub fn resolve_source(source: &str) -> Result<String, String> {
    let source = source.trim();
    let is_http = source.starts_with("http://") || source.starts_with("https://");
    if is_http && !source.contains("huggingface.co/") {
        return Ok(source.to_string());
    }
    Ok(HuggingFaceUrl::parse(source)?.download_url())
}

/// Fetches artifacts over HTTP with reqwest
pub struct HttpArtifactFetcher {
    client: reqwest::Client,
}

impl HttpArtifactFetcher {
    pub fn new() -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3600)) // 1 hour timeout for large models
            .user_agent(concat!("llamachat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::Download(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn download(&self, url: &str, output_path: &Path) -> Result<u64, EngineError> {
        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                EngineError::Download(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let mut temp = TempDownload::new(output_path);

        tracing::info!("Downloading model from: {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::Download(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(EngineError::Download(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }

        let total_size = response.content_length();
        if let Some(total) = total_size {
            tracing::info!("Model size: {}", format_size(total));
        }

        let mut file = File::create(temp.path())
            .await
            .map_err(|e| EngineError::Download(format!("Failed to create temp file: {}", e)))?;

        let mut response = response;
        let mut downloaded: u64 = 0;
        let mut next_report = 10;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| EngineError::Download(format!("Download error: {}", e)))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| EngineError::Download(format!("Write error: {}", e)))?;
            downloaded += chunk.len() as u64;

            if let Some(total) = total_size.filter(|t| *t > 0) {
                let percent = downloaded * 100 / total;
                if percent >= next_report {
                    tracing::info!(
                        "Downloaded {}% ({} of {})",
                        percent,
                        format_size(downloaded),
                        format_size(total)
                    );
                    next_report = (percent / 10 + 1) * 10;
                }
            }
        }
        file.flush()
            .await
            .map_err(|e| EngineError::Download(format!("Write error: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| EngineError::Download(format!("Write error: {}", e)))?;
        drop(file);

        if let Some(total) = total_size {
            if downloaded != total {
                return Err(EngineError::Download(format!(
                    "Download incomplete: got {} bytes, expected {}",
                    downloaded, total
                )));
            }
        }

        tokio::fs::rename(temp.path(), output_path)
            .await
            .map_err(|e| EngineError::Download(format!("Failed to move downloaded file: {}", e)))?;
        temp.commit();

        tracing::info!("Download complete: {:?}", output_path);
        Ok(downloaded)
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn ensure(
        &self,
        path: &Path,
        source_url: Option<&str>,
    ) -> Result<ModelArtifact, EngineError> {
        let present = tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if present {
            tracing::info!("Using existing model file at {:?}", path);
            return Ok(ModelArtifact::new(path, source_url.map(str::to_string)));
        }

        let Some(source) = source_url else {
            return Err(EngineError::MissingArtifact {
                path: path.to_path_buf(),
            });
        };

        let url = resolve_source(source).map_err(EngineError::Download)?;
        self.download(&url, path).await?;

        Ok(ModelArtifact::new(path, Some(source.to_string())))
    }
}

/// Temporary download target, removed on drop unless committed
struct TempDownload {
    path: PathBuf,
    committed: bool,
}

impl TempDownload {
    fn new(target: &Path) -> Self {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        let temp_name = format!(".{}.{}.part", name, uuid::Uuid::new_v4().simple());
        Self {
            path: target.with_file_name(temp_name),
            committed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for TempDownload {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed partial download {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove partial download {:?}: {}", self.path, e),
        }
    }
}

/// Get a human-readable size string
pub fn format_size(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes < 1024.0 {
        format!("{} B", bytes as u64)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else if bytes < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes / (1024.0 * 1024.0 * 1024.0))
    }
}
