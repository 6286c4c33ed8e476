//! Download worker
//!
//! Takes [`DownloadRequest`](crate::proto::DownloadRequest) messages off the
//! input queue, runs yt-dlp, uploads the result to storage and publishes a
//! success or error result for the front-end to apply.
//!
//! - [`WorkerLauncher`] owns the broker channel and the prefetch window
//! - [`DownloadHandler`] processes one message end to end
//! - [`Downloader`] abstracts the download tool; [`YtDlpDownloader`] shells out

pub mod handler;
pub mod launcher;
pub mod ytdlp;

pub use handler::{DownloadHandler, Outcome};
pub use launcher::{LauncherError, WorkerLauncher};
pub use ytdlp::{DownloadError, DownloadedMedia, Downloader, YtDlpDownloader};
