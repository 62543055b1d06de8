//! Fragment fetchers.
//!
//! Each track runs a pool of identical workers. A worker pulls a
//! [`SeqRequest`] from the dispatch channel, fetches that sequence from the
//! upstream endpoint with the retry policy below, and publishes exactly one
//! [`Fragment`] on the data channel, or a sentinel marked `abandoned` when it
//! gives up. Workers never touch the output file.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::fragment::{frag_file_path, seq_url, Fragment, SeqRequest, FRAG_FULL_RETRIES, FRAG_MAX_TRIES};
use crate::info;
use crate::state::{DataType, DownloadState};
use crate::util::{try_delete, HttpClient, USER_AGENT};

/// Retry bookkeeping for the sequence a worker is currently fetching.
/// Reset at the start of each new sequence.
#[derive(Debug)]
pub struct WorkerState {
    pub name: String,
    pub data_type: DataType,
    pub base_path: String,
    pub to_file: bool,
    /// Inter-attempt sleep, equal to the stream's target fragment duration.
    pub sleep_time: Duration,

    pub seq: i64,
    pub max_seq: i64,
    pub tries: u32,
    pub full_retries: u32,
    pub is_403: bool,
}

impl WorkerState {
    fn new(state: &DownloadState, data_type: DataType, name: String) -> Self {
        WorkerState {
            name,
            data_type,
            base_path: state.base_file_path(data_type),
            to_file: state.frag_files(),
            sleep_time: state.target_duration(),
            seq: 0,
            max_seq: -1,
            tries: 0,
            full_retries: FRAG_FULL_RETRIES,
            is_403: false,
        }
    }

    fn reset_for(&mut self, req: SeqRequest) {
        self.seq = req.cur_seq;
        self.max_seq = req.max_seq;
        self.tries = 0;
        self.full_retries = FRAG_FULL_RETRIES;
        self.is_403 = false;
    }

    /// An error near the head of a stream that is no longer live usually
    /// just means the last fragments were never produced.
    fn at_ended_stream_head(&self, state: &DownloadState) -> bool {
        self.max_seq > -1 && !state.is_live() && self.seq >= self.max_seq - 2
    }
}

fn handle_frag_download_error(state: &DownloadState, ws: &WorkerState, err: &dyn std::fmt::Display) {
    debug!("{}: error with fragment {}: {}", ws.name, ws.seq, err);

    if ws.at_ended_stream_head(state) {
        debug!(
            "{}: stream has ended and fragment {} is within the last fragments, probably fine",
            ws.name, ws.seq
        );
        state.set_finished(ws.data_type);
    }
}

fn handle_frag_http_error(state: &DownloadState, ws: &mut WorkerState, status: u16) {
    debug!("{}: HTTP error {} for fragment {}", ws.name, status, ws.seq);

    if status == 403 {
        ws.is_403 = true;
    } else if status == 404 && ws.at_ended_stream_head(state) {
        debug!(
            "{}: stream has ended and fragment {} is within the last fragments, probably fine",
            ws.name, ws.seq
        );
        state.set_finished(ws.data_type);
    }
}

/// Authoritative decision whether the current sequence is worth another
/// attempt. Exhausting `FRAG_MAX_TRIES` spends one full retry; a 403 along
/// the way triggers a metadata refresh since the URL has likely expired.
async fn continue_fragment_download(
    state: &DownloadState,
    client: &HttpClient,
    ws: &mut WorkerState,
) -> bool {
    if state.is_stopping() {
        return false;
    }

    // In-budget retries proceed even on a finished track: a sibling
    // finishing the track must not lose a fragment that is still being
    // fetched within the advertised window.
    if ws.tries < FRAG_MAX_TRIES {
        return true;
    }

    ws.full_retries -= 1;
    debug!(
        "{}: fragment {}: {} full retries remaining",
        ws.name, ws.seq, ws.full_retries
    );

    if ws.is_403 {
        debug!("{}: fragment {}: retrieving a new download URL", ws.name, ws.seq);
        info::get_video_info(state, client).await;
    } else if state.is_live() {
        // The stream may have ended while we were grinding on this
        // sequence; a refresh flips the live flag if so.
        info::get_video_info(state, client).await;
    }

    if state.is_finished(ws.data_type) {
        return false;
    }

    if ws.at_ended_stream_head(state) {
        state.set_finished(ws.data_type);
        return false;
    }

    if ws.full_retries == 0 {
        return false;
    }

    ws.tries = 0;
    ws.is_403 = false;
    true
}

async fn write_frag_file(path: &str, data: &[u8]) -> std::io::Result<()> {
    let mut opts = tokio::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    opts.mode(0o644);

    let mut file = opts.open(path).await?;
    file.write_all(data).await?;
    file.flush().await
}

async fn publish_abandoned(ws: &WorkerState, fname: String, data_tx: &mpsc::Sender<Fragment>) {
    debug!("{}: giving up on fragment {}", ws.name, ws.seq);
    let _ = data_tx
        .send(Fragment {
            seq: ws.seq,
            head_seq: -1,
            file_name: fname,
            payload: None,
            abandoned: true,
        })
        .await;
}

/// Fetch one sequence, retrying per the policy above, and publish the result.
async fn download_fragment(
    state: &DownloadState,
    client: &HttpClient,
    ws: &mut WorkerState,
    data_tx: &mpsc::Sender<Fragment>,
) {
    let fname = frag_file_path(&ws.base_path, ws.seq);

    loop {
        if state.is_stopping() {
            return;
        }

        // Re-read the template every attempt; a metadata refresh may have
        // moved the stream to a new host.
        let template = state.download_url(ws.data_type);
        let url = seq_url(&template, ws.seq);
        let host = state.url_host(ws.data_type);

        let mut request = client
            .client
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .header("Origin", "https://www.youtube.com")
            .header("Cache-Control", "no-cache")
            .header("Pragma", "no-cache")
            .header("Accept", "*/*");
        if !host.is_empty() {
            request = request
                .header("Host", host.clone())
                .header("Referer", format!("https://{}/", host));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                handle_frag_download_error(state, ws, &e);
                ws.tries += 1;
                if !continue_fragment_download(state, client, ws).await {
                    publish_abandoned(ws, fname, data_tx).await;
                    return;
                }
                tokio::time::sleep(ws.sleep_time).await;
                continue;
            }
        };

        let status = response.status().as_u16();
        let head_seq = response
            .headers()
            .get("X-Head-Seqnum")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(-1);

        if status >= 400 {
            handle_frag_http_error(state, ws, status);
            ws.tries += 1;
            if !continue_fragment_download(state, client, ws).await {
                publish_abandoned(ws, fname, data_tx).await;
                return;
            }
            tokio::time::sleep(ws.sleep_time).await;
            continue;
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                handle_frag_download_error(state, ws, &e);
                ws.tries += 1;
                if !continue_fragment_download(state, client, ws).await {
                    publish_abandoned(ws, fname, data_tx).await;
                    return;
                }
                tokio::time::sleep(ws.sleep_time).await;
                continue;
            }
        };

        // A success with no data means the fragment has not been produced
        // yet; treat it like a failed attempt and wait.
        if body.is_empty() {
            ws.tries += 1;
            if !continue_fragment_download(state, client, ws).await {
                publish_abandoned(ws, fname, data_tx).await;
                return;
            }
            tokio::time::sleep(ws.sleep_time).await;
            continue;
        }

        let payload = if ws.to_file {
            if let Err(e) = write_frag_file(&fname, &body).await {
                debug!("{}: failed to write fragment {} to file: {}", ws.name, ws.seq, e);
                ws.tries += 1;
                if !continue_fragment_download(state, client, ws).await {
                    try_delete(&fname).await;
                    publish_abandoned(ws, fname, data_tx).await;
                    return;
                }
                tokio::time::sleep(ws.sleep_time).await;
                continue;
            }
            None
        } else {
            Some(body.to_vec())
        };

        let _ = data_tx
            .send(Fragment {
                seq: ws.seq,
                head_seq,
                file_name: fname,
                payload,
                abandoned: false,
            })
            .await;

        return;
    }
}

/// Pool member loop: take requests until the dispatch channel closes, the
/// track finishes, or the process stops.
pub async fn download_frags(
    state: Arc<DownloadState>,
    client: Arc<HttpClient>,
    data_type: DataType,
    seq_rx: flume::Receiver<SeqRequest>,
    data_tx: mpsc::Sender<Fragment>,
    name: String,
) {
    let mut ws = WorkerState::new(&state, data_type, name);

    while let Ok(req) = seq_rx.recv_async().await {
        if state.is_stopping() {
            break;
        }

        // Past the advertised head of a stream that is no longer live
        // there is nothing left to fetch.
        if req.max_seq > -1 && !state.is_live() && req.cur_seq > req.max_seq {
            debug!("{}: stream is finished and head sequence reached", ws.name);
            state.set_finished(data_type);
            break;
        }

        // A request within the advertised window is real work even when a
        // sibling just finished the track; only beyond-window requests are
        // dropped here.
        if state.is_finished(data_type) && req.max_seq > -1 && req.cur_seq > req.max_seq {
            break;
        }

        ws.reset_for(req);
        download_fragment(&state, &client, &mut ws, &data_tx).await;
    }

    debug!("{}: exiting", ws.name);
    state.decrement_jobs(data_type);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> DownloadState {
        let state = DownloadState::new("http://127.0.0.1:1/watch", 1);
        // Gate metadata refresh for the duration of the test.
        state.touch_last_updated();
        state
    }

    fn test_worker_state(state: &DownloadState) -> WorkerState {
        let mut ws = WorkerState::new(state, DataType::Audio, "audio1".to_string());
        ws.reset_for(SeqRequest { cur_seq: 0, max_seq: -1 });
        ws
    }

    #[tokio::test]
    async fn continue_allows_retries_under_budget() {
        let state = test_state();
        let client = HttpClient::new().unwrap();
        let mut ws = test_worker_state(&state);

        ws.tries = FRAG_MAX_TRIES - 1;
        assert!(continue_fragment_download(&state, &client, &mut ws).await);
        assert_eq!(ws.tries, FRAG_MAX_TRIES - 1, "budget untouched below the limit");
    }

    #[tokio::test]
    async fn continue_spends_full_retries_then_gives_up() {
        let state = test_state();
        state.set_live(false);
        let client = HttpClient::new().unwrap();
        let mut ws = test_worker_state(&state);

        // Each exhaustion of the try budget burns one full retry.
        for remaining in (1..FRAG_FULL_RETRIES).rev() {
            ws.tries = FRAG_MAX_TRIES;
            assert!(continue_fragment_download(&state, &client, &mut ws).await);
            assert_eq!(ws.full_retries, remaining);
            assert_eq!(ws.tries, 0, "try counter resets for the next round");
        }

        ws.tries = FRAG_MAX_TRIES;
        assert!(!continue_fragment_download(&state, &client, &mut ws).await);
    }

    #[tokio::test]
    async fn continue_refuses_when_stopping() {
        let state = test_state();
        let client = HttpClient::new().unwrap();
        let mut ws = test_worker_state(&state);

        state.stop();
        assert!(!continue_fragment_download(&state, &client, &mut ws).await);
    }

    #[tokio::test]
    async fn finished_track_keeps_in_budget_retries() {
        let state = test_state();
        state.set_live(false);
        state.set_finished(DataType::Audio);
        let client = HttpClient::new().unwrap();
        let mut ws = test_worker_state(&state);

        // A fragment mid-retry is still real work while under budget.
        ws.tries = 1;
        assert!(continue_fragment_download(&state, &client, &mut ws).await);

        // Once the budget is exhausted, a finished track is not worth a
        // full retry round.
        ws.tries = FRAG_MAX_TRIES;
        assert!(!continue_fragment_download(&state, &client, &mut ws).await);
    }

    #[tokio::test]
    async fn exhaustion_near_ended_stream_head_finishes_track() {
        let state = test_state();
        state.set_live(false);
        let client = HttpClient::new().unwrap();
        let mut ws = test_worker_state(&state);
        ws.seq = 9;
        ws.max_seq = 10;
        ws.tries = FRAG_MAX_TRIES;

        assert!(!continue_fragment_download(&state, &client, &mut ws).await);
        assert!(state.is_finished(DataType::Audio));
    }

    #[test]
    fn http_403_flags_for_url_refresh() {
        let state = test_state();
        let mut ws = test_worker_state(&state);

        handle_frag_http_error(&state, &mut ws, 403);
        assert!(ws.is_403);
        assert!(!state.is_finished(DataType::Audio));
    }
}
