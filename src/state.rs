//! Shared download state.
//!
//! One [`DownloadState`] is shared between the two track pipelines and every
//! worker. All fields sit behind locks and are only reachable through the
//! accessor methods; composite updates (download URL + host) happen under a
//! single write lock.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Minimum interval between upstream metadata refreshes.
pub const DEFAULT_POLL_SECS: u64 = 15;

/// Media kind of one track pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Audio,
    Video,
}

impl DataType {
    pub fn all() -> [DataType; 2] {
        [DataType::Audio, DataType::Video]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Audio => "audio",
            DataType::Video => "video",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-track mutable state.
#[derive(Debug, Default)]
struct TrackInfo {
    active_jobs: i64,
    download_url: String,
    url_host: String,
    base_path: String,
    finished: bool,
}

#[derive(Debug)]
struct GeneralInfo {
    stopping: bool,
    in_progress: bool,
    live: bool,
    unavailable: bool,

    video_url: String,
    dash_url: String,
    quality: i64,

    jobs: usize,
    target_duration: u64,
    frag_files: bool,
    last_updated: Instant,
}

/// Process-wide download state shared by both track pipelines.
#[derive(Debug)]
pub struct DownloadState {
    general: RwLock<GeneralInfo>,
    tracks: HashMap<DataType, RwLock<TrackInfo>>,
}

impl DownloadState {
    /// Create state for the stream at `video_url` with `jobs` workers per
    /// track. Fragments spill to disk by default, as in the original tool.
    pub fn new(video_url: &str, jobs: usize) -> Self {
        let mut tracks = HashMap::new();
        for dt in DataType::all() {
            tracks.insert(dt, RwLock::new(TrackInfo::default()));
        }

        DownloadState {
            general: RwLock::new(GeneralInfo {
                stopping: false,
                in_progress: false,
                live: false,
                unavailable: false,
                video_url: video_url.to_string(),
                dash_url: String::new(),
                quality: -1,
                jobs: jobs.max(1),
                target_duration: 5,
                frag_files: true,
                // Backdated so the first refresh is never gated on the
                // minimum poll interval.
                last_updated: Instant::now()
                    .checked_sub(Duration::from_secs(DEFAULT_POLL_SECS))
                    .unwrap_or_else(Instant::now),
            }),
            tracks,
        }
    }

    fn track(&self, data_type: DataType) -> &RwLock<TrackInfo> {
        &self.tracks[&data_type]
    }

    pub fn is_stopping(&self) -> bool {
        self.general.read().unwrap().stopping
    }

    /// Request a stop. Sticky: also marks both tracks finished so workers
    /// and coordinators wind down at their next check.
    pub fn stop(&self) {
        self.general.write().unwrap().stopping = true;
        for dt in DataType::all() {
            self.set_finished(dt);
        }
    }

    pub fn is_live(&self) -> bool {
        self.general.read().unwrap().live
    }

    pub fn set_live(&self, live: bool) {
        self.general.write().unwrap().live = live;
    }

    pub fn is_unavailable(&self) -> bool {
        self.general.read().unwrap().unavailable
    }

    pub fn set_unavailable(&self) {
        self.general.write().unwrap().unavailable = true;
    }

    pub fn is_in_progress(&self) -> bool {
        self.general.read().unwrap().in_progress
    }

    pub fn set_in_progress(&self) {
        self.general.write().unwrap().in_progress = true;
    }

    pub fn video_url(&self) -> String {
        self.general.read().unwrap().video_url.clone()
    }

    pub fn dash_url(&self) -> String {
        self.general.read().unwrap().dash_url.clone()
    }

    pub fn set_dash_url(&self, url: &str) {
        self.general.write().unwrap().dash_url = url.to_string();
    }

    pub fn quality(&self) -> i64 {
        self.general.read().unwrap().quality
    }

    pub fn set_quality(&self, itag: i64) {
        self.general.write().unwrap().quality = itag;
    }

    pub fn jobs(&self) -> usize {
        self.general.read().unwrap().jobs
    }

    pub fn target_duration(&self) -> Duration {
        Duration::from_secs(self.general.read().unwrap().target_duration)
    }

    pub fn set_target_duration(&self, secs: u64) {
        self.general.write().unwrap().target_duration = secs;
    }

    pub fn frag_files(&self) -> bool {
        self.general.read().unwrap().frag_files
    }

    pub fn set_frag_files(&self, to_file: bool) {
        self.general.write().unwrap().frag_files = to_file;
    }

    /// Time since the last metadata refresh.
    pub fn last_updated_elapsed(&self) -> Duration {
        self.general.read().unwrap().last_updated.elapsed()
    }

    pub fn touch_last_updated(&self) {
        self.general.write().unwrap().last_updated = Instant::now();
    }

    pub fn active_job_count(&self, data_type: DataType) -> i64 {
        self.track(data_type).read().unwrap().active_jobs
    }

    pub fn increment_jobs(&self, data_type: DataType) {
        self.track(data_type).write().unwrap().active_jobs += 1;
    }

    pub fn decrement_jobs(&self, data_type: DataType) {
        self.track(data_type).write().unwrap().active_jobs -= 1;
    }

    pub fn download_url(&self, data_type: DataType) -> String {
        self.track(data_type).read().unwrap().download_url.clone()
    }

    /// Set a track's URL template. The derived host is updated under the
    /// same write lock so redirected CDN hosts never mix with a stale URL.
    pub fn set_download_url(&self, data_type: DataType, dl_url: &str) {
        let mut track = self.track(data_type).write().unwrap();

        if let Ok(parsed) = url::Url::parse(dl_url) {
            if let Some(host) = parsed.host_str() {
                track.url_host = host.to_string();
            }
        }

        track.download_url = dl_url.to_string();
    }

    pub fn url_host(&self, data_type: DataType) -> String {
        self.track(data_type).read().unwrap().url_host.clone()
    }

    pub fn base_file_path(&self, data_type: DataType) -> String {
        self.track(data_type).read().unwrap().base_path.clone()
    }

    pub fn set_base_file_path(&self, data_type: DataType, path: &str) {
        self.track(data_type).write().unwrap().base_path = path.to_string();
    }

    pub fn is_finished(&self, data_type: DataType) -> bool {
        self.track(data_type).read().unwrap().finished
    }

    /// Mark a track finished. One-way: there is no way to clear the flag.
    pub fn set_finished(&self, data_type: DataType) {
        self.track(data_type).write().unwrap().finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_sticky_and_finishes_tracks() {
        let state = DownloadState::new("https://www.youtube.com/watch?v=x", 2);
        assert!(!state.is_stopping());
        assert!(!state.is_finished(DataType::Audio));

        state.stop();
        assert!(state.is_stopping());
        assert!(state.is_finished(DataType::Audio));
        assert!(state.is_finished(DataType::Video));

        // Nothing un-sticks it.
        state.stop();
        assert!(state.is_stopping());
    }

    #[test]
    fn url_and_host_update_together() {
        let state = DownloadState::new("https://www.youtube.com/watch?v=x", 1);
        state.set_download_url(
            DataType::Video,
            "https://r4---sn-example.googlevideo.com/videoplayback?x=1&sq=%d",
        );

        assert_eq!(state.url_host(DataType::Video), "r4---sn-example.googlevideo.com");
        assert!(state.download_url(DataType::Video).ends_with("&sq=%d"));

        // An unparseable URL keeps the previous host.
        state.set_download_url(DataType::Video, "not a url");
        assert_eq!(state.url_host(DataType::Video), "r4---sn-example.googlevideo.com");
        assert_eq!(state.download_url(DataType::Video), "not a url");
    }

    #[test]
    fn job_counters() {
        let state = DownloadState::new("https://www.youtube.com/watch?v=x", 3);
        assert_eq!(state.active_job_count(DataType::Audio), 0);

        state.increment_jobs(DataType::Audio);
        state.increment_jobs(DataType::Audio);
        assert_eq!(state.active_job_count(DataType::Audio), 2);
        assert_eq!(state.active_job_count(DataType::Video), 0);

        state.decrement_jobs(DataType::Audio);
        assert_eq!(state.active_job_count(DataType::Audio), 1);
    }

    #[test]
    fn jobs_floor_is_one() {
        let state = DownloadState::new("https://www.youtube.com/watch?v=x", 0);
        assert_eq!(state.jobs(), 1);
    }
}
