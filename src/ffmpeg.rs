use std::path::Path;

/// Build the ffmpeg command line that muxes the finished track files into
/// one container. The download only records; merging is left to the user.
pub fn mux_command(audio: &Path, video: Option<&Path>, output: &Path) -> String {
    match video {
        Some(video) => format!(
            "ffmpeg -hide_banner -loglevel error -i '{}' -i '{}' -c copy '{}'",
            audio.display(),
            video.display(),
            output.display()
        ),
        None => format!(
            "ffmpeg -hide_banner -loglevel error -i '{}' -c copy '{}'",
            audio.display(),
            output.display()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_both_tracks() {
        let cmd = mux_command(
            Path::new("stream.f140.ts"),
            Some(Path::new("stream.f137.ts")),
            Path::new("stream.mp4"),
        );
        assert!(cmd.contains("-i 'stream.f140.ts'"));
        assert!(cmd.contains("-i 'stream.f137.ts'"));
        assert!(cmd.ends_with("'stream.mp4'"));
    }

    #[test]
    fn audio_only_has_a_single_input() {
        let cmd = mux_command(Path::new("stream.f140.ts"), None, Path::new("stream.m4a"));
        assert_eq!(cmd.matches("-i ").count(), 1);
    }
}
