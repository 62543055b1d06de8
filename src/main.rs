use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;
use ytlive_rs::{
    coordinator, ffmpeg, info,
    player_response::InitialPlayerResponse,
    state::{DataType, DownloadState},
    stats::DownloadStatistics,
    util,
};

#[tokio::main]
async fn main() {
    // Read url and optional quality label from args
    let url = std::env::args().nth(1).expect("No url provided");
    let quality = std::env::args().nth(2).unwrap_or_else(|| "best".to_string());

    // Create HttpClient
    let client = Arc::new(util::HttpClient::new().expect("Could not create HttpClient"));

    // Fetch the watch page
    println!("Fetching {}", url);
    let html = client.fetch_text(&url).await.expect("Could not fetch URL");

    // Parse the initial player response
    println!("Parsing initial player response");
    let ipr = InitialPlayerResponse::from_html(html.as_str())
        .expect("Could not parse player response");

    if !ipr.is_usable() {
        println!("Video is not live");
        if let Some(start) = ipr.scheduled_start_time() {
            println!("Stream is scheduled to start at {}", start);
        }
        return;
    }

    // Resolve the per-track download URLs
    let state = Arc::new(DownloadState::new(&url, 4));
    info::apply_video_info(&state, &client, &ipr, &quality)
        .await
        .expect("Could not resolve download URLs");

    let video_id = ipr.video_id().expect("usable stream always has a video id");
    state.set_base_file_path(DataType::Audio, &format!("{}.f{}", video_id, info::AUDIO_ITAG));
    let audio_only = state.download_url(DataType::Video).is_empty();
    if !audio_only {
        state.set_base_file_path(DataType::Video, &format!("{}.f{}", video_id, state.quality()));
        println!("Selected video itag {}", state.quality());
    }

    // Start both track pipelines
    let mut handles = coordinator::spawn_download(state.clone(), client.clone());

    // Ctrl-C requests a cooperative stop; fragments in flight still land
    let stop_state = state.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nStopping download");
            stop_state.stop();
        }
    });

    // The progress channel closes once every coordinator has exited
    let mut statistics = DownloadStatistics::new();
    while let Some(progress) = handles.progress.recv().await {
        statistics.update(&progress);
        statistics.print();
    }
    println!();

    join_all(handles.done.into_iter().map(|(_, rx)| rx)).await;

    let audio_file = format!("{}.ts", state.base_file_path(DataType::Audio));
    if audio_only {
        println!("Done. Mux the audio track with:");
        println!(
            "  {}",
            ffmpeg::mux_command(
                Path::new(&audio_file),
                None,
                Path::new(&format!("{}.m4a", video_id)),
            )
        );
    } else {
        let video_file = format!("{}.ts", state.base_file_path(DataType::Video));
        println!("Done. Mux the tracks with:");
        println!(
            "  {}",
            ffmpeg::mux_command(
                Path::new(&audio_file),
                Some(Path::new(&video_file)),
                Path::new(&format!("{}.mp4", video_id)),
            )
        );
    }
}
