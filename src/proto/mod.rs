//! Protobuf messages carried on the broker queues
//!
//! - [`DownloadRequest`] - input queue, one per task, published at creation
//! - [`SuccessResult`] - success queue, carries the artifact metadata
//! - [`ErrorResult`] - error queue, carries the failure description
//!
//! Messages are declared with `prost` derives directly, so no protoc step is
//! needed at build time.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use prost::Message;
//! use vidbox::proto::DownloadRequest;
//!
//! let bytes = request.encode_to_vec();
//! let decoded = vidbox::proto::decode::<DownloadRequest>(&bytes)?;
//! ```

use chrono::{DateTime, Utc};
use prost::Message;
use prost_types::Timestamp;
use thiserror::Error;
use uuid::Uuid;

use crate::ledger::{File, NewCache, NewFile, NewTask, TaskSource};

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("invalid task id '{0}'")]
    InvalidTaskId(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid timestamp in field {0}")]
    InvalidTimestamp(&'static str),

    #[error("unsupported task source: {0}")]
    InvalidSource(i32),

    #[error("invalid metadata json: {0}")]
    InvalidMeta(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Source {
    Unspecified = 0,
    Api = 1,
    Bot = 2,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DownloadRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub url: String,
    #[prost(message, optional, tag = "3")]
    pub added_at: Option<Timestamp>,
    #[prost(enumeration = "Source", tag = "4")]
    pub source: i32,
    #[prost(int64, optional, tag = "5")]
    pub from_chat_id: Option<i64>,
    #[prost(int64, optional, tag = "6")]
    pub message_id: Option<i64>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CacheInfo {
    #[prost(string, tag = "1")]
    pub cache_id: String,
    #[prost(string, tag = "2")]
    pub cache_unique_id: String,
    #[prost(int64, tag = "3")]
    pub file_size: i64,
    #[prost(message, optional, tag = "4")]
    pub date_timestamp: Option<Timestamp>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FileInfo {
    #[prost(string, optional, tag = "1")]
    pub title: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub thumb_name: Option<String>,
    #[prost(double, optional, tag = "4")]
    pub duration: Option<f64>,
    #[prost(int32, optional, tag = "5")]
    pub width: Option<i32>,
    #[prost(int32, optional, tag = "6")]
    pub height: Option<i32>,
    #[prost(string, optional, tag = "7")]
    pub storage_key: Option<String>,
    /// Downloader metadata as a JSON document
    #[prost(string, optional, tag = "8")]
    pub meta_json: Option<String>,
    #[prost(message, optional, tag = "9")]
    pub cache: Option<CacheInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SuccessResult {
    #[prost(string, tag = "1")]
    pub task_id: String,
    #[prost(message, optional, tag = "2")]
    pub file: Option<FileInfo>,
    #[prost(string, optional, tag = "3")]
    pub yt_dlp_version: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ErrorResult {
    #[prost(string, tag = "1")]
    pub task_id: String,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(string, optional, tag = "3")]
    pub details: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub yt_dlp_version: Option<String>,
}

/// Decode any queue message
pub fn decode<M: Message + Default>(bytes: &[u8]) -> Result<M, ProtoError> {
    Ok(M::decode(bytes)?)
}

pub fn to_timestamp(at: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: at.timestamp(),
        nanos: at.timestamp_subsec_nanos() as i32,
    }
}

pub fn from_timestamp(ts: &Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.seconds, u32::try_from(ts.nanos).ok()?)
}

fn parse_task_id(raw: &str) -> Result<Uuid, ProtoError> {
    raw.parse()
        .map_err(|_| ProtoError::InvalidTaskId(raw.to_string()))
}

impl From<TaskSource> for Source {
    fn from(source: TaskSource) -> Self {
        match source {
            TaskSource::Api => Source::Api,
            TaskSource::Bot => Source::Bot,
        }
    }
}

impl DownloadRequest {
    pub fn from_task(task: &NewTask) -> Self {
        Self {
            id: task.id.to_string(),
            url: task.url.clone(),
            added_at: Some(to_timestamp(task.added_at)),
            source: Source::from(task.source) as i32,
            from_chat_id: task.from_chat_id,
            message_id: task.message_id,
        }
    }

    /// Rebuild the task identity carried by the message
    pub fn to_task(&self) -> Result<NewTask, ProtoError> {
        let added_at = self
            .added_at
            .as_ref()
            .ok_or(ProtoError::MissingField("added_at"))?;
        let source = match Source::try_from(self.source) {
            Ok(Source::Api) => TaskSource::Api,
            Ok(Source::Bot) => TaskSource::Bot,
            _ => return Err(ProtoError::InvalidSource(self.source)),
        };
        if self.url.is_empty() {
            return Err(ProtoError::MissingField("url"));
        }

        Ok(NewTask {
            id: parse_task_id(&self.id)?,
            url: self.url.clone(),
            added_at: from_timestamp(added_at).ok_or(ProtoError::InvalidTimestamp("added_at"))?,
            source,
            from_chat_id: self.from_chat_id,
            message_id: self.message_id,
        })
    }
}

impl FileInfo {
    pub fn from_file(file: &File) -> Self {
        Self {
            title: file.title.clone(),
            name: file.name.clone(),
            thumb_name: file.thumb_name.clone(),
            duration: file.duration,
            width: file.width,
            height: file.height,
            storage_key: file.storage_key.clone(),
            meta_json: file.meta.as_ref().map(|m| m.to_string()),
            cache: file.cache.as_ref().map(|c| CacheInfo {
                cache_id: c.cache_id.clone(),
                cache_unique_id: c.cache_unique_id.clone(),
                file_size: c.file_size,
                date_timestamp: Some(to_timestamp(c.date_timestamp)),
            }),
        }
    }

    pub fn into_new_file(self) -> Result<NewFile, ProtoError> {
        let meta = match self.meta_json {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };

        let cache = match self.cache {
            Some(cache) => {
                let ts = cache
                    .date_timestamp
                    .as_ref()
                    .ok_or(ProtoError::MissingField("cache.date_timestamp"))?;
                Some(NewCache {
                    cache_id: cache.cache_id,
                    cache_unique_id: cache.cache_unique_id,
                    file_size: cache.file_size,
                    date_timestamp: from_timestamp(ts)
                        .ok_or(ProtoError::InvalidTimestamp("cache.date_timestamp"))?,
                })
            }
            None => None,
        };

        Ok(NewFile {
            title: self.title,
            name: self.name,
            thumb_name: self.thumb_name,
            duration: self.duration,
            width: self.width,
            height: self.height,
            storage_key: self.storage_key,
            meta,
            cache,
        })
    }
}

impl SuccessResult {
    pub fn task_id(&self) -> Result<Uuid, ProtoError> {
        parse_task_id(&self.task_id)
    }
}

impl ErrorResult {
    pub fn task_id(&self) -> Result<Uuid, ProtoError> {
        parse_task_id(&self.task_id)
    }
}
