//! File-type detection: magic-byte MIME sniff plus a video-stream probe.

use std::path::Path;

use crate::engines::VideoProber;
use crate::store::FileType;

/// Classify a file by its magic bytes.
///
/// `video/*` containers are probed for an actual video stream and downgraded
/// to [`FileType::Audio`] when none is found (e.g. m4a inside an mp4
/// container). When the probe itself fails the video classification stands.
pub async fn detect_file_type(path: &Path, prober: &dyn VideoProber) -> FileType {
    let Ok(Some(kind)) = infer::get_from_path(path) else {
        return FileType::Other;
    };
    let mime = kind.mime_type();
    if mime.starts_with("image/") {
        FileType::Image
    } else if mime.starts_with("video/") {
        match prober.has_video_stream(path).await {
            Ok(true) | Err(_) => FileType::Video,
            Ok(false) => FileType::Audio,
        }
    } else if mime.starts_with("audio/") {
        FileType::Audio
    } else {
        FileType::Other
    }
}
