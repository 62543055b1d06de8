//! # ytlive-rs
//!
//! This crate records a live, fragmented YouTube DASH stream to local disk
//! while the broadcast is still in progress. Audio and video are downloaded
//! as two independent track pipelines, each with a pool of concurrent
//! fragment fetchers and a coordinator that reassembles fragments in strict
//! sequence order into one output file per track.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use ytlive_rs::{coordinator, info, player_response::InitialPlayerResponse, state, util};
//!
//! #[tokio::main]
//! async fn main() {
//!     // HttpClient is a wrapper around reqwest::Client with a middleware
//!     // for retrying transient errors
//!     let client = Arc::new(util::HttpClient::new().unwrap());
//!
//!     // Fetch the watch page and parse the initial player response
//!     let url = "https://www.youtube.com/watch?v=...";
//!     let html = client.fetch_text(url).await.unwrap();
//!     let ipr = InitialPlayerResponse::from_html(html.as_str()).unwrap();
//!
//!     if !ipr.is_usable() {
//!         println!("Video is not live");
//!         return;
//!     }
//!
//!     // Configure shared state and resolve the per-track download URLs
//!     let state = Arc::new(state::DownloadState::new(url, 4));
//!     info::apply_video_info(&state, &client, &ipr, "best")
//!         .await
//!         .unwrap();
//!     state.set_base_file_path(state::DataType::Audio, "stream.f140");
//!     state.set_base_file_path(state::DataType::Video, "stream.f137");
//!
//!     // Spawn both track pipelines and drain progress until they finish
//!     let mut handles = coordinator::spawn_download(state, client);
//!     while let Some(progress) = handles.progress.recv().await {
//!         println!("{}: {} bytes", progress.data_type, progress.byte_count);
//!     }
//! }
//! ```
//!
//! The output files are the sidx-stripped concatenation of fragments
//! `0, 1, 2, ...` for each track and can be muxed together with ffmpeg once
//! the download ends.

#[forbid(unsafe_code)]
#[macro_use]
extern crate log;

pub mod coordinator;
pub mod dash;
pub mod ffmpeg;
pub mod fragment;
pub mod info;
pub mod player_response;
pub mod sidx;
pub mod state;
pub mod stats;
pub mod util;
pub mod worker;
