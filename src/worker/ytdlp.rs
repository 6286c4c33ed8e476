//! yt-dlp driven downloads

use async_trait::async_trait;
use serde_json::Value;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

const THUMBNAIL_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to run {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("yt-dlp exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("unexpected yt-dlp output: {0}")]
    Output(String),

    #[error("downloaded file missing: {0}")]
    MissingFile(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DownloadError>;

/// What a finished download left in the work directory
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedMedia {
    pub title: Option<String>,
    pub file: PathBuf,
    pub thumbnail: Option<PathBuf>,
    pub duration: Option<f64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    /// Full info document reported by the tool
    pub info: Value,
}

impl DownloadedMedia {
    pub fn file_name(&self) -> Option<String> {
        self.file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }

    pub fn thumb_name(&self) -> Option<String> {
        self.thumbnail
            .as_ref()
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
    }
}

/// Performs the actual media download
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Version of the underlying tool
    async fn version(&self) -> Result<String>;

    /// Download `url` into `workdir`, which exists and is empty
    async fn download(&self, url: &str, workdir: &Path) -> Result<DownloadedMedia>;
}

#[derive(Debug, Clone)]
pub struct YtDlpDownloader {
    bin: PathBuf,
}

impl YtDlpDownloader {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    async fn run(&self, args: &[&OsStr]) -> Result<String> {
        let output = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| DownloadError::Spawn {
                bin: self.bin.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(DownloadError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn version(&self) -> Result<String> {
        let stdout = self.run(&[OsStr::new("--version")]).await?;
        let version = stdout.trim();
        if version.is_empty() {
            return Err(DownloadError::Output("empty version".to_string()));
        }
        Ok(version.to_string())
    }

    async fn download(&self, url: &str, workdir: &Path) -> Result<DownloadedMedia> {
        info!(url, workdir = %workdir.display(), "Running yt-dlp");

        let stdout = self
            .run(&[
                OsStr::new("--no-simulate"),
                OsStr::new("--dump-json"),
                OsStr::new("--no-progress"),
                OsStr::new("--write-thumbnail"),
                OsStr::new("--paths"),
                workdir.as_os_str(),
                OsStr::new("--output"),
                OsStr::new("%(id)s.%(ext)s"),
                OsStr::new(url),
            ])
            .await?;

        let info = parse_info(&stdout)?;
        let mut media = media_from_info(info, workdir)?;

        if !tokio::fs::try_exists(&media.file).await? {
            return Err(DownloadError::MissingFile(media.file));
        }
        media.thumbnail = find_thumbnail(workdir, &media.file).await?;

        debug!(url, file = %media.file.display(), "yt-dlp finished");
        Ok(media)
    }
}

/// Last JSON line printed by `--dump-json`
pub(crate) fn parse_info(stdout: &str) -> Result<Value> {
    let line = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| DownloadError::Output("no info json printed".to_string()))?;

    serde_json::from_str(line).map_err(|e| DownloadError::Output(e.to_string()))
}

pub(crate) fn media_from_info(info: Value, workdir: &Path) -> Result<DownloadedMedia> {
    let path = info
        .pointer("/requested_downloads/0/filepath")
        .or_else(|| info.get("filepath"))
        .or_else(|| info.get("_filename"))
        .or_else(|| info.get("filename"))
        .and_then(Value::as_str)
        .ok_or_else(|| DownloadError::Output("info json has no file path".to_string()))?;

    let file = match Path::new(path) {
        p if p.is_absolute() => p.to_path_buf(),
        p => workdir.join(p),
    };

    Ok(DownloadedMedia {
        title: info.get("title").and_then(Value::as_str).map(str::to_string),
        file,
        thumbnail: None,
        duration: info.get("duration").and_then(Value::as_f64),
        width: info
            .get("width")
            .and_then(Value::as_i64)
            .and_then(|w| i32::try_from(w).ok()),
        height: info
            .get("height")
            .and_then(Value::as_i64)
            .and_then(|h| i32::try_from(h).ok()),
        info,
    })
}

/// Image next to the media file sharing its stem
pub(crate) async fn find_thumbnail(workdir: &Path, media: &Path) -> Result<Option<PathBuf>> {
    let Some(stem) = media.file_stem() else {
        return Ok(None);
    };

    let mut entries = tokio::fs::read_dir(workdir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| THUMBNAIL_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if is_image && path.file_stem() == Some(stem) {
            return Ok(Some(path));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_parse_info_takes_last_line() {
        let stdout = "[info] noise\n{\"id\": \"abc\", \"title\": \"Clip\"}\n\n";
        let info = parse_info(stdout).unwrap();
        assert_eq!(info["id"], "abc");

        assert!(matches!(parse_info(""), Err(DownloadError::Output(_))));
        assert!(matches!(parse_info("not json"), Err(DownloadError::Output(_))));
    }

    #[test]
    fn test_media_from_info() {
        let workdir = Path::new("/tmp/vidbox/task");
        let info = json!({
            "title": "Clip",
            "duration": 12.5,
            "width": 1920,
            "height": 1080,
            "requested_downloads": [{"filepath": "/tmp/vidbox/task/abc.mp4"}],
            "_filename": "ignored.mp4"
        });

        let media = media_from_info(info, workdir).unwrap();
        assert_eq!(media.file, PathBuf::from("/tmp/vidbox/task/abc.mp4"));
        assert_eq!(media.file_name().as_deref(), Some("abc.mp4"));
        assert_eq!(media.duration, Some(12.5));
        assert_eq!(media.width, Some(1920));

        let relative = media_from_info(json!({"_filename": "abc.webm"}), workdir).unwrap();
        assert_eq!(relative.file, workdir.join("abc.webm"));
        assert!(relative.title.is_none());

        assert!(media_from_info(json!({"title": "x"}), workdir).is_err());
    }

    #[tokio::test]
    async fn test_find_thumbnail() {
        let temp = TempDir::new().unwrap();
        let media = temp.path().join("abc.mp4");
        std::fs::write(&media, b"v").unwrap();
        std::fs::write(temp.path().join("other.jpg"), b"i").unwrap();

        assert_eq!(find_thumbnail(temp.path(), &media).await.unwrap(), None);

        std::fs::write(temp.path().join("abc.webp"), b"i").unwrap();
        assert_eq!(
            find_thumbnail(temp.path(), &media).await.unwrap(),
            Some(temp.path().join("abc.webp"))
        );
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let downloader = YtDlpDownloader::new("/nonexistent/vidbox/yt-dlp");
        assert!(matches!(
            downloader.version().await,
            Err(DownloadError::Spawn { .. })
        ));
    }
}
