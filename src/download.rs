//! 抓包包下载：时间戳文件名与 HTTP 拉取
//!
//! 控制器只负责把下载地址交给 ArtifactSink，具体怎么下载由调用方决定。

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// 一个可下载的抓包包
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReady {
    pub url: String,
    pub filename: String,
}

/// 按当前时间生成下载文件名
pub fn artifact_filename(now: DateTime<Local>) -> String {
    format!("tcpdump-capture-{}.pcap", now.format("%Y%m%d-%H%M%S"))
}

/// 下载副作用的接收方
pub trait ArtifactSink: Send + Sync {
    fn deliver(&self, download: &DownloadReady);
}

/// 只记录不下载（测试与 dry-run）
#[derive(Debug, Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<DownloadReady>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<DownloadReady> {
        self.delivered.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl ArtifactSink for RecordingSink {
    fn deliver(&self, download: &DownloadReady) {
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push(download.clone());
        }
    }
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed with status {0}")]
    Status(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 把抓包包下载到本地目录
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
    dir: PathBuf,
}

impl HttpDownloader {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            client: reqwest::Client::new(),
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// 流式写盘，返回保存路径
    pub async fn fetch(&self, download: &DownloadReady) -> Result<PathBuf, DownloadError> {
        let mut response = self.client.get(&download.url).send().await?;
        if !response.status().is_success() {
            return Err(DownloadError::Status(response.status().as_u16()));
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(&download.filename);
        let mut file = tokio::fs::File::create(&path).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(path)
    }
}

impl ArtifactSink for HttpDownloader {
    fn deliver(&self, download: &DownloadReady) {
        let downloader = self.clone();
        let download = download.clone();
        tokio::spawn(async move {
            match downloader.fetch(&download).await {
                Ok(path) => tracing::info!("Capture bundle saved to {}", path.display()),
                Err(e) => tracing::error!("Failed to download {}: {}", download.url, e),
            }
        });
    }
}
