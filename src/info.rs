//! Download-URL resolution and metadata refresh.
//!
//! Maps the player response onto [`DownloadState`]: picks the audio and
//! video itags, installs the `&sq=%d` URL templates, and re-queries the
//! watch page while a long download runs so expired URLs and the live flag
//! stay current.

use std::collections::HashMap;
use std::time::Duration;

use crate::dash;
use crate::player_response::{InitialPlayerResponse, PlayerResponseError};
use crate::state::{DataType, DownloadState, DEFAULT_POLL_SECS};
use crate::util::HttpClient;

pub const AUDIO_ITAG: i64 = 140;

/// Quality marker for audio-only downloads.
pub const AUDIO_ONLY_QUALITY: i64 = 0;

pub struct VideoItag {
    pub h264: i64,
    pub vp9: i64,
}

// https://gist.github.com/AgentOak/34d47c65b1d28829bb17c24c04a0096f
/// Quality labels in ascending order with their h264 and VP9 itags.
pub const VIDEO_LABEL_ITAGS: &[(&str, VideoItag)] = &[
    ("144p", VideoItag { h264: 160, vp9: 278 }),
    ("240p", VideoItag { h264: 133, vp9: 242 }),
    ("360p", VideoItag { h264: 134, vp9: 243 }),
    ("480p", VideoItag { h264: 135, vp9: 244 }),
    ("720p", VideoItag { h264: 136, vp9: 247 }),
    ("720p60", VideoItag { h264: 298, vp9: 302 }),
    ("1080p", VideoItag { h264: 137, vp9: 248 }),
    ("1080p60", VideoItag { h264: 299, vp9: 303 }),
];

#[derive(thiserror::Error, Debug)]
pub enum InfoError {
    #[error("player response has no streaming data")]
    NoStreamingData,
    #[error("no download URL for the audio format")]
    NoAudioFormat,
    #[error("quality {0} is not available for this stream")]
    QualityUnavailable(String),
}

/// Build per-itag URL templates from the player response, preferring the
/// DASH manifest when one is advertised.
async fn download_urls(
    state: &DownloadState,
    client: &HttpClient,
    pr: &InitialPlayerResponse,
) -> HashMap<i64, String> {
    let dash_url = state.dash_url();
    if !dash_url.is_empty() {
        match client.fetch_text(&dash_url).await {
            Ok(manifest) => match dash::urls_from_manifest(&manifest) {
                Ok(urls) if !urls.is_empty() => return urls,
                Ok(_) => debug!("DASH manifest contained no representations"),
                Err(e) => debug!("Could not parse DASH manifest: {}", e),
            },
            Err(e) => debug!("Could not fetch DASH manifest: {}", e),
        }
    }

    let Some(streaming) = pr.streaming_data.as_ref() else {
        return HashMap::new();
    };

    streaming
        .adaptive_formats
        .iter()
        .filter_map(|af| {
            af.url
                .as_ref()
                .filter(|u| !u.is_empty())
                .map(|u| (af.itag, format!("{}&sq=%d", u)))
        })
        .collect()
}

/// Pick the video itag for a quality label, preferring h264 as the original
/// tool does. `best` walks the label table from the top.
fn select_video_itag(urls: &HashMap<i64, String>, quality: &str) -> Option<i64> {
    if quality.eq_ignore_ascii_case("best") {
        for (_, itags) in VIDEO_LABEL_ITAGS.iter().rev() {
            if urls.contains_key(&itags.h264) {
                return Some(itags.h264);
            }
            if urls.contains_key(&itags.vp9) {
                return Some(itags.vp9);
            }
        }
        return None;
    }

    let itags = VIDEO_LABEL_ITAGS
        .iter()
        .find(|(label, _)| label.eq_ignore_ascii_case(quality))
        .map(|(_, itags)| itags)?;

    if urls.contains_key(&itags.h264) {
        Some(itags.h264)
    } else if urls.contains_key(&itags.vp9) {
        Some(itags.vp9)
    } else {
        None
    }
}

/// First-time setup: install both tracks' URL templates, the target
/// duration and the live flag from a parsed player response.
///
/// `quality` is a label from [`VIDEO_LABEL_ITAGS`], `best`, or `audio_only`.
pub async fn apply_video_info(
    state: &DownloadState,
    client: &HttpClient,
    pr: &InitialPlayerResponse,
    quality: &str,
) -> Result<(), InfoError> {
    let streaming = pr.streaming_data.as_ref().ok_or(InfoError::NoStreamingData)?;

    if let Some(dash_url) = streaming.dash_manifest_url.as_ref() {
        state.set_dash_url(dash_url);
    }
    if let Some(target) = pr.target_duration() {
        state.set_target_duration(target.round() as u64);
    }

    let urls = download_urls(state, client, pr).await;

    let audio_url = urls.get(&AUDIO_ITAG).ok_or(InfoError::NoAudioFormat)?;
    state.set_download_url(DataType::Audio, audio_url);

    if quality.eq_ignore_ascii_case("audio_only") {
        state.set_quality(AUDIO_ONLY_QUALITY);
    } else {
        let itag = select_video_itag(&urls, quality)
            .ok_or_else(|| InfoError::QualityUnavailable(quality.to_string()))?;
        state.set_quality(itag);
        if let Some(video_url) = urls.get(&itag) {
            state.set_download_url(DataType::Video, video_url);
        }
    }

    state.set_live(pr.is_live_now());
    state.set_in_progress();
    state.touch_last_updated();

    Ok(())
}

/// Re-query the watch page and refresh the live flag, target duration and
/// both tracks' URL templates.
///
/// Gated: no-op while stopping or unavailable, and at most once per
/// [`DEFAULT_POLL_SECS`] — almost nothing worth knowing changes faster.
/// Returns whether a refresh was applied.
pub async fn get_video_info(state: &DownloadState, client: &HttpClient) -> bool {
    if state.is_stopping() || state.is_unavailable() {
        return false;
    }

    if state.last_updated_elapsed() < Duration::from_secs(DEFAULT_POLL_SECS) {
        return false;
    }
    state.touch_last_updated();

    let video_url = state.video_url();
    let html = match client.fetch_text(&video_url).await {
        Ok(html) => html,
        Err(e) => {
            warn!("Error fetching {} for a metadata refresh: {}", video_url, e);
            return false;
        }
    };

    let pr = match InitialPlayerResponse::from_html(&html) {
        Ok(pr) => pr,
        Err(PlayerResponseError::NoInitialPlayerResponse) => {
            warn!("Player response is gone; marking the stream unavailable");
            state.set_live(false);
            state.set_unavailable();
            return false;
        }
        Err(e) => {
            debug!("Could not parse refreshed player response: {}", e);
            return false;
        }
    };

    let Some(streaming) = pr.streaming_data.as_ref() else {
        debug!("Refreshed player response has no streaming data");
        return false;
    };

    if let Some(dash_url) = streaming.dash_manifest_url.as_ref() {
        state.set_dash_url(dash_url);
    }
    if let Some(target) = pr.target_duration() {
        state.set_target_duration(target.round() as u64);
    }

    let urls = download_urls(state, client, &pr).await;

    if let Some(audio_url) = urls.get(&AUDIO_ITAG) {
        state.set_download_url(DataType::Audio, audio_url);
    }

    let quality = state.quality();
    if quality > AUDIO_ONLY_QUALITY {
        if let Some(video_url) = urls.get(&quality) {
            state.set_download_url(DataType::Video, video_url);
        }
    }

    state.set_live(pr.is_live_now());

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(itags: &[i64]) -> HashMap<i64, String> {
        itags
            .iter()
            .map(|itag| (*itag, format!("https://example.com/{}?x=1&sq=%d", itag)))
            .collect()
    }

    #[test]
    fn best_prefers_the_highest_available_label() {
        // 1080p h264 and 480p available: best takes 1080p.
        let itag = select_video_itag(&urls(&[140, 137, 135]), "best");
        assert_eq!(itag, Some(137));
    }

    #[test]
    fn best_falls_back_to_vp9() {
        // Only the VP9 1080p60 itag exists.
        let itag = select_video_itag(&urls(&[140, 303]), "best");
        assert_eq!(itag, Some(303));
    }

    #[test]
    fn explicit_label_is_honored() {
        let itag = select_video_itag(&urls(&[140, 137, 135]), "480p");
        assert_eq!(itag, Some(135));

        assert_eq!(select_video_itag(&urls(&[140]), "480p"), None);
        assert_eq!(select_video_itag(&urls(&[140, 135]), "nonsense"), None);
    }

    #[tokio::test]
    async fn refresh_is_gated_by_poll_interval() {
        let state = DownloadState::new("http://127.0.0.1:9/watch", 1);
        let client = HttpClient::new().unwrap();

        state.touch_last_updated();
        // Freshly updated: the gate holds and no request is made.
        assert!(!get_video_info(&state, &client).await);
    }

    #[tokio::test]
    async fn refresh_is_gated_when_stopping() {
        let state = DownloadState::new("http://127.0.0.1:9/watch", 1);
        let client = HttpClient::new().unwrap();

        state.stop();
        assert!(!get_video_info(&state, &client).await);
    }
}
