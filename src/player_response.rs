//! Parsing of the `ytInitialPlayerResponse` object embedded in a watch page.
//!
//! Only the parts the download engine consumes are modelled: playability,
//! live streamability, the adaptive formats (per-itag URLs and the target
//! fragment duration) and the live-broadcast details.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_aux::prelude::*;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialPlayerResponse {
    pub playability_status: PlayabilityStatus,
    pub streaming_data: Option<StreamingData>,
    pub video_details: Option<VideoDetails>,
    pub microformat: Option<Microformat>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayabilityStatus {
    pub status: Status,
    pub reason: Option<String>,
    pub live_streamability: Option<LiveStreamability>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    LiveStreamOffline,
    Unplayable,
    LoginRequired,
    Error,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamability {
    pub live_streamability_renderer: LiveStreamabilityRenderer,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamabilityRenderer {
    pub video_id: String,
    pub offline_slate: Option<OfflineSlate>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSlate {
    pub live_stream_offline_slate_renderer: LiveStreamOfflineSlateRenderer,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamOfflineSlateRenderer {
    #[serde(deserialize_with = "deserialize_datetime_utc_from_seconds")]
    pub scheduled_start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingData {
    pub adaptive_formats: Vec<AdaptiveFormat>,
    pub dash_manifest_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveFormat {
    pub itag: i64,
    /// Absent while the stream is still being processed.
    #[serde(default)]
    pub url: Option<String>,
    pub mime_type: String,
    pub target_duration_sec: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetails {
    pub video_id: String,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub is_live: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Microformat {
    pub player_microformat_renderer: PlayerMicroformatRenderer,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerMicroformatRenderer {
    pub live_broadcast_details: Option<LiveBroadcastDetails>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveBroadcastDetails {
    pub is_live_now: bool,
    pub start_timestamp: Option<String>,
    pub end_timestamp: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum PlayerResponseError {
    #[error("Could not find initial player response")]
    NoInitialPlayerResponse,
    #[error("Could not parse initial player response")]
    ParseInitialPlayerResponse(#[from] serde_json::Error),
}

const IPR_STR: &str = "var ytInitialPlayerResponse =";

fn get_ipr_str(html: &str) -> Option<&str> {
    // Find the start of the initial player response
    let idx_ipr = html.find(IPR_STR)? + IPR_STR.len();

    // Find the start and end of the JSON object
    let idx_start = html[idx_ipr..].find('{')? + idx_ipr;
    let idx_end = html[idx_start..].find("};")? + idx_start + 1;

    // Bounds check
    if idx_start >= idx_end || idx_start >= html.len() || idx_end >= html.len() {
        return None;
    }

    Some(&html[idx_start..idx_end])
}

impl InitialPlayerResponse {
    pub fn from_html(html: &str) -> Result<Self, PlayerResponseError> {
        let ipr_str = get_ipr_str(html).ok_or(PlayerResponseError::NoInitialPlayerResponse)?;

        serde_json::from_str(ipr_str).map_err(PlayerResponseError::ParseInitialPlayerResponse)
    }

    /// Whether the stream is live right now and its fragments can be
    /// fetched.
    pub fn is_usable(&self) -> bool {
        self.video_id().is_some()
            && self
                .playability_status
                .live_streamability
                .as_ref()
                .map(|ls| !ls.live_streamability_renderer.video_id.is_empty())
                .unwrap_or(false)
            && self.playability_status.status == Status::Ok
            && self.is_live_now()
    }

    pub fn is_live_now(&self) -> bool {
        self.live_broadcast_details()
            .map(|lbd| lbd.is_live_now)
            .unwrap_or(false)
    }

    pub fn video_id(&self) -> Option<String> {
        self.video_details
            .as_ref()
            .map(|v| v.video_id.clone())
            .filter(|id| !id.is_empty())
    }

    pub fn scheduled_start_time(&self) -> Option<DateTime<Utc>> {
        self.playability_status
            .live_streamability
            .as_ref()?
            .live_streamability_renderer
            .offline_slate
            .as_ref()
            .map(|s| s.live_stream_offline_slate_renderer.scheduled_start_time)
    }

    /// Nominal fragment length in seconds, also used as the inter-retry
    /// sleep.
    pub fn target_duration(&self) -> Option<f64> {
        self.streaming_data
            .as_ref()?
            .adaptive_formats
            .iter()
            .find_map(|af| af.target_duration_sec)
    }

    fn live_broadcast_details(&self) -> Option<&LiveBroadcastDetails> {
        self.microformat
            .as_ref()?
            .player_microformat_renderer
            .live_broadcast_details
            .as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipr_str() {
        let test_str = r#"<script>var ytInitialPlayerResponse = {"response": "test"};</script>"#;
        let result = get_ipr_str(test_str).expect("Could not find IPR");
        assert_eq!(result, r#"{"response": "test"}"#);

        let test_str = r#"<script>var ytInitialPlayerResponse = {"#;
        assert!(get_ipr_str(test_str).is_none());

        let test_str = r#"<script>var ytInitialPlayerResponse = "#;
        assert!(get_ipr_str(test_str).is_none());

        let test_str = r#"<script>var ytInitialPlayerResponse ="#;
        assert!(get_ipr_str(test_str).is_none());
    }

    fn live_html() -> String {
        let json = r#"{
            "playabilityStatus": {
                "status": "OK",
                "liveStreamability": {
                    "liveStreamabilityRenderer": {"videoId": "dQw4w9WgXcQ"}
                }
            },
            "streamingData": {
                "dashManifestUrl": "https://example.com/dash.mpd",
                "adaptiveFormats": [
                    {
                        "itag": 140,
                        "url": "https://r4---sn-example.googlevideo.com/videoplayback?itag=140&noclen=1",
                        "mimeType": "audio/mp4; codecs=\"mp4a.40.2\"",
                        "targetDurationSec": 5.0
                    },
                    {
                        "itag": 137,
                        "url": "https://r4---sn-example.googlevideo.com/videoplayback?itag=137&noclen=1",
                        "mimeType": "video/mp4; codecs=\"avc1.64002a\"",
                        "targetDurationSec": 5.0
                    }
                ]
            },
            "videoDetails": {
                "videoId": "dQw4w9WgXcQ",
                "title": "A live stream",
                "author": "A channel",
                "isLive": true
            },
            "microformat": {
                "playerMicroformatRenderer": {
                    "liveBroadcastDetails": {
                        "isLiveNow": true,
                        "startTimestamp": "2024-02-15T08:15:00+00:00"
                    }
                }
            }
        };"#;
        format!("<script>var ytInitialPlayerResponse = {}</script>", json)
    }

    fn scheduled_html() -> String {
        let json = r#"{
            "playabilityStatus": {
                "status": "LIVE_STREAM_OFFLINE",
                "reason": "Premieres soon",
                "liveStreamability": {
                    "liveStreamabilityRenderer": {
                        "videoId": "dQw4w9WgXcQ",
                        "offlineSlate": {
                            "liveStreamOfflineSlateRenderer": {
                                "scheduledStartTime": 1707984900
                            }
                        }
                    }
                }
            },
            "videoDetails": {
                "videoId": "dQw4w9WgXcQ",
                "title": "A scheduled stream",
                "author": "A channel"
            }
        };"#;
        format!("<script>var ytInitialPlayerResponse = {}</script>", json)
    }

    #[test]
    fn parses_live_stream() {
        let ipr = InitialPlayerResponse::from_html(&live_html()).expect("Could not parse IPR");

        assert!(ipr.is_usable());
        assert!(ipr.is_live_now());
        assert_eq!(ipr.video_id().as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(ipr.target_duration(), Some(5.0));

        let formats = &ipr.streaming_data.as_ref().unwrap().adaptive_formats;
        assert_eq!(formats.len(), 2);
        assert_eq!(formats[0].itag, 140);
        assert!(formats[0].url.as_deref().unwrap().contains("itag=140"));
    }

    #[test]
    fn scheduled_stream_is_not_usable() {
        let ipr = InitialPlayerResponse::from_html(&scheduled_html()).expect("Could not parse IPR");

        assert!(!ipr.is_usable());
        assert!(!ipr.is_live_now());
        assert_eq!(ipr.playability_status.status, Status::LiveStreamOffline);

        use std::str::FromStr;
        assert_eq!(
            ipr.scheduled_start_time(),
            Some(DateTime::<Utc>::from_str("2024-02-15T08:15:00Z").unwrap())
        );
    }

    #[test]
    fn missing_ipr_is_an_error() {
        assert!(matches!(
            InitialPlayerResponse::from_html("<html>nothing here</html>"),
            Err(PlayerResponseError::NoInitialPlayerResponse)
        ));
    }
}
