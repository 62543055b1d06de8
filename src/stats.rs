use std::io::Write;

use crate::fragment::ProgressInfo;
use crate::state::DataType;
use crate::util;

/// Running totals fed from the progress channel.
pub struct DownloadStatistics {
    pub bytes_downloaded: u64,
    pub audio_fragments: u64,
    pub video_fragments: u64,
    pub max_seq: i64,
}

impl DownloadStatistics {
    pub fn new() -> Self {
        Self {
            bytes_downloaded: 0,
            audio_fragments: 0,
            video_fragments: 0,
            max_seq: -1,
        }
    }

    pub fn update(&mut self, progress: &ProgressInfo) {
        self.bytes_downloaded += progress.byte_count as u64;
        match progress.data_type {
            DataType::Audio => self.audio_fragments += 1,
            DataType::Video => self.video_fragments += 1,
        }
        if progress.max_seq > self.max_seq {
            self.max_seq = progress.max_seq;
        }
    }

    pub fn print(&self) {
        print!(
            "\x1b[2K\rVideo fragments: {}; Audio fragments: {}; Total downloaded: {}",
            self.video_fragments,
            self.audio_fragments,
            util::format_bytes(self.bytes_downloaded)
        );
        let _ = std::io::stdout().lock().flush();
    }
}

impl Default for DownloadStatistics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_accumulates_per_track() {
        let mut stats = DownloadStatistics::new();
        stats.update(&ProgressInfo {
            data_type: DataType::Audio,
            byte_count: 100,
            max_seq: 3,
        });
        stats.update(&ProgressInfo {
            data_type: DataType::Video,
            byte_count: 4000,
            max_seq: 2,
        });

        assert_eq!(stats.bytes_downloaded, 4100);
        assert_eq!(stats.audio_fragments, 1);
        assert_eq!(stats.video_fragments, 1);
        assert_eq!(stats.max_seq, 3, "head sequence only moves up");
    }
}
