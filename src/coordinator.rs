//! Per-track download coordination.
//!
//! One coordinator owns one track: it spawns the worker pool, dispatches
//! sequence requests, widens its dispatch window from the server-advertised
//! head sequence, and writes completed fragments to the output file in
//! strict ascending order regardless of the order they finish downloading.

use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use crate::fragment::{Fragment, ProgressInfo, SeqRequest, BUFFER_SIZE};
use crate::info;
use crate::sidx::remove_sidx;
use crate::state::{DataType, DownloadState};
use crate::util::{try_delete, HttpClient};
use crate::worker;

/// Output-file write attempts per fragment before the whole download is
/// declared broken.
const WRITE_RETRIES: i32 = 10;

const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Long-running streams refresh their metadata at this coarse cadence.
const METADATA_REFRESH_AGE: Duration = Duration::from_secs(3600);

/// Receivers handed to the caller of [`spawn_download`].
pub struct DownloadHandles {
    /// One message per fragment written to an output file.
    pub progress: mpsc::Receiver<ProgressInfo>,
    /// One value per track once its coordinator has cleaned up.
    pub done: Vec<(DataType, oneshot::Receiver<()>)>,
}

/// Spawn a coordinator for every track with a configured download URL.
/// Output files are `{base_path}.ts`.
pub fn spawn_download(state: Arc<DownloadState>, client: Arc<HttpClient>) -> DownloadHandles {
    let (progress_tx, progress_rx) = mpsc::channel(64);
    let mut done = Vec::new();

    for data_type in DataType::all() {
        if state.download_url(data_type).is_empty() {
            continue;
        }

        let (done_tx, done_rx) = oneshot::channel();
        let out_path = format!("{}.ts", state.base_file_path(data_type));
        tokio::spawn(download_track(
            state.clone(),
            client.clone(),
            data_type,
            out_path,
            progress_tx.clone(),
            done_tx,
        ));
        done.push((data_type, done_rx));
    }

    DownloadHandles {
        progress: progress_rx,
        done,
    }
}

/// Download one track to `out_path`. Sends on `done_tx` after cleanup,
/// whatever the outcome.
pub async fn download_track(
    state: Arc<DownloadState>,
    client: Arc<HttpClient>,
    data_type: DataType,
    out_path: String,
    progress_tx: mpsc::Sender<ProgressInfo>,
    done_tx: oneshot::Sender<()>,
) {
    let log_name = format!("{}-download", data_type);

    let file = match File::create(&out_path).await {
        Ok(file) => file,
        Err(e) => {
            error!("{}: error opening {} for writing: {}", log_name, out_path, e);
            state.stop();
            let _ = done_tx.send(());
            return;
        }
    };

    run_track(&state, &client, data_type, file, &out_path, &progress_tx, &log_name).await;
    let _ = done_tx.send(());
}

#[allow(clippy::too_many_arguments)]
async fn run_track(
    state: &Arc<DownloadState>,
    client: &Arc<HttpClient>,
    data_type: DataType,
    mut file: File,
    out_path: &str,
    progress_tx: &mpsc::Sender<ProgressInfo>,
    log_name: &str,
) {
    let jobs = state.jobs() as i64;
    let frag_files = state.frag_files();

    let (seq_tx, seq_rx) = flume::bounded::<SeqRequest>(jobs as usize);
    let (data_tx, mut data_rx) = mpsc::channel::<Fragment>(jobs as usize);
    // Dropping the sender is what closes the dispatch channel; wrap it so
    // the close is idempotent.
    let mut seq_tx = Some(seq_tx);

    let mut cur_frag: i64 = 0;
    let mut cur_seq: i64 = 0;
    let mut max_seq: i64 = -1;
    let mut active_downloads: i64 = 0;
    let mut tries = WRITE_RETRIES;
    let mut pending: Vec<Fragment> = Vec::with_capacity(jobs as usize);
    let mut deferred_deletes: Vec<String> = Vec::new();
    let mut file_pos: u64 = 0;

    // Prime each worker with a distinct starting sequence 0..jobs-1.
    let mut job_num = 1;
    while !state.is_stopping() && state.active_job_count(data_type) < jobs {
        let worker_name = format!("{}{}", data_type, job_num);
        state.increment_jobs(data_type);
        if let Some(tx) = &seq_tx {
            let _ = tx.send_async(SeqRequest { cur_seq, max_seq }).await;
        }
        cur_seq += 1;
        active_downloads += 1;
        job_num += 1;

        tokio::spawn(worker::download_frags(
            state.clone(),
            client.clone(),
            data_type,
            seq_rx.clone(),
            data_tx.clone(),
            worker_name,
        ));
    }

    loop {
        let mut data_received = false;
        let finished = state.is_finished(data_type);
        let downloading = !finished || state.active_job_count(data_type) > 0;
        let stopping = state.is_stopping();

        // Closing the dispatch channel is what lets idle workers exit; a
        // finished track will never dispatch again, so close as soon as the
        // flag is observed rather than waiting for the pool to drain.
        if (stopping || finished) && seq_tx.is_some() {
            seq_tx = None;
        }

        // Drain completed fragments without blocking.
        while let Ok(frag) = data_rx.try_recv() {
            data_received = true;
            active_downloads -= 1;

            if frag.abandoned {
                // The worker gave up on this sequence. Re-dispatch it so
                // the output stays gap-free; a later attempt may succeed
                // once the URL has been refreshed.
                if downloading && !stopping {
                    if let Some(tx) = &seq_tx {
                        debug!("{}: re-dispatching abandoned fragment {}", log_name, frag.seq);
                        let _ = tx.send_async(SeqRequest { cur_seq: frag.seq, max_seq }).await;
                        active_downloads += 1;
                    }
                }
                continue;
            }

            let head_seq = frag.head_seq;
            pending.push(frag);

            if !downloading || stopping {
                continue;
            }

            // Head decreases are ignored; the window only ever widens.
            if head_seq > max_seq {
                max_seq = head_seq;
            }

            if let Some(tx) = &seq_tx {
                if max_seq > 0 {
                    while cur_seq <= max_seq + 1 && active_downloads < jobs {
                        let _ = tx.send_async(SeqRequest { cur_seq, max_seq }).await;
                        cur_seq += 1;
                        active_downloads += 1;
                    }
                } else {
                    // No head seen yet; probe one sequence at a time.
                    let _ = tx.send_async(SeqRequest { cur_seq, max_seq }).await;
                    cur_seq += 1;
                    active_downloads += 1;
                }
            }
        }

        if !downloading {
            // Flush whatever is still contiguous before terminating.
            if !pending.iter().any(|f| f.seq == cur_frag) {
                break;
            }
        } else if pending.is_empty() || !data_received {
            if !stopping && active_downloads <= 0 {
                debug!(
                    "{}: no active downloads and no data to write at fragment {}",
                    log_name, cur_frag
                );
                if let Some(tx) = &seq_tx {
                    while active_downloads < state.active_job_count(data_type) {
                        let _ = tx.send_async(SeqRequest { cur_seq, max_seq }).await;
                        cur_seq += 1;
                        active_downloads += 1;
                    }
                }
            }

            tokio::time::sleep(IDLE_SLEEP).await;
            continue;
        }

        // Write phase: flush every contiguous fragment currently pending.
        let mut i = 0;
        while i < pending.len() && tries > 0 {
            if pending[i].seq != cur_frag {
                i += 1;
                continue;
            }

            let spilled;
            let payload: &[u8] = if frag_files {
                match tokio::fs::read(&pending[i].file_name).await {
                    Ok(bytes) => {
                        spilled = bytes;
                        &spilled
                    }
                    Err(e) => {
                        tries -= 1;
                        warn!(
                            "{}: error reading fragment {} for writing: {}",
                            log_name, cur_frag, e
                        );
                        if tries > 0 {
                            warn!("{}: will try {} more time(s)", log_name, tries);
                        }
                        continue;
                    }
                }
            } else {
                pending[i].payload.as_deref().unwrap_or_default()
            };

            // Only the head of a fragment can carry a sidx box.
            let head_len = payload.len().min(BUFFER_SIZE);
            let head = remove_sidx(&payload[..head_len]);
            let byte_count = head.len() + (payload.len() - head_len);

            let write_result = async {
                file.write_all(&head).await?;
                file.write_all(&payload[head_len..]).await?;
                file.flush().await
            }
            .await;

            if let Err(e) = write_result {
                tries -= 1;
                warn!(
                    "{}: error writing fragment {} to {}: {}",
                    log_name, cur_frag, out_path, e
                );

                // Rewind to the fragment boundary so the retry rewrites the
                // fragment whole and the file position stays exact.
                if let Err(e) = file.seek(SeekFrom::Start(file_pos)).await {
                    warn!("{}: error seeking back to fragment boundary: {}", log_name, e);
                }

                if tries > 0 {
                    warn!("{}: will try {} more time(s)", log_name, tries);
                }
                continue;
            }

            file_pos += byte_count as u64;
            cur_frag += 1;
            let _ = progress_tx
                .send(ProgressInfo {
                    data_type,
                    byte_count,
                    max_seq,
                })
                .await;

            let written = pending.remove(i);
            if frag_files {
                if let Err(e) = tokio::fs::remove_file(&written.file_name).await {
                    warn!(
                        "{}: error deleting fragment {}: {}; will retry after the download finishes",
                        log_name, written.seq, e
                    );
                    deferred_deletes.push(written.file_name);
                }
            }

            tries = WRITE_RETRIES;
            // An earlier-received fragment may now be the next contiguous
            // one; restart the scan.
            i = 0;
        }

        if !stopping && !state.is_unavailable() && state.last_updated_elapsed() > METADATA_REFRESH_AGE
        {
            info::get_video_info(state, client).await;
        }

        if tries <= 0 {
            warn!("{}: stopping download, something must be wrong", log_name);
            state.stop();
            break;
        }
    }

    // Partial bytes of a failed trailing write must not survive in the
    // output file.
    let _ = file.set_len(file_pos).await;

    // Fragments still queued on the data channel were never owned by the
    // write phase; their spill files go too.
    while let Ok(frag) = data_rx.try_recv() {
        if !frag.abandoned {
            pending.push(frag);
        }
    }

    if frag_files {
        for frag in &pending {
            try_delete(&frag.file_name).await;
        }
    }

    if !deferred_deletes.is_empty() {
        info!(
            "{}: deleting fragment files that could not be deleted earlier",
            log_name
        );
        for path in &deferred_deletes {
            try_delete(path).await;
        }
    }

    debug!("{} closing", log_name);
}
