//! Limits applied to content before it is registered

use crate::error::{IngestError, IngestResult};
use crate::media_file::MediaFile;
use crate::sniffer::FileFormat;

#[derive(Debug, Clone, PartialEq)]
pub struct IngestPolicy {
    /// Largest accepted file, in bytes
    pub max_file_size: u64,
    /// Largest accepted `width * height`
    pub max_image_resolution: u64,
    /// Longest accepted animation or video, in seconds
    pub max_video_duration: f64,
    /// Accepted file extensions, see [`FileFormat::extension`]
    pub allowed_extensions: Vec<String>,
}

impl IngestPolicy {
    /// Accept or reject a file, returning the rejection reason as
    /// [`IngestError::Rejected`]
    pub fn check(&self, file: &MediaFile) -> IngestResult<()> {
        let format = file.format();
        if format == FileFormat::Binary {
            return Err(IngestError::Rejected(
                "file type is not supported".to_string(),
            ));
        }

        let ext = format.extension();
        if !self.allowed_extensions.iter().any(|allowed| allowed == ext) {
            return Err(IngestError::Rejected(format!(
                "{} files are not allowed",
                ext
            )));
        }

        let size = file.size()?;
        if size > self.max_file_size {
            return Err(IngestError::Rejected(format!(
                "file size {} exceeds the maximum of {} bytes",
                size, self.max_file_size
            )));
        }

        let (width, height) = file.dimensions();
        let resolution = u64::from(width) * u64::from(height);
        if resolution > self.max_image_resolution {
            return Err(IngestError::Rejected(format!(
                "image resolution {}x{} is too large",
                width, height
            )));
        }

        if let Some(duration) = file.duration()
            && duration > self.max_video_duration
        {
            return Err(IngestError::Rejected(format!(
                "duration of {:.1}s exceeds the maximum of {:.1}s",
                duration, self.max_video_duration
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::media_file::MediaSource;
    use crate::media_file::fixtures::encoded_image;
    use image::ImageFormat;

    fn open(bytes: &[u8]) -> MediaFile {
        MediaFile::open(MediaSource::from_bytes(bytes).unwrap(), false).unwrap()
    }

    fn rejection(policy: &IngestPolicy, file: &MediaFile) -> String {
        match policy.check(file) {
            Err(IngestError::Rejected(message)) => message,
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_accepts_default_image() {
        let policy = IngestConfig::default().policy();
        let file = open(&encoded_image(16, 16, ImageFormat::Png));
        assert!(policy.check(&file).is_ok());
    }

    #[test]
    fn test_rejects_binary() {
        let policy = IngestConfig::default().policy();
        let file = open(b"plain text is not media");
        assert_eq!(rejection(&policy, &file), "file type is not supported");
    }

    #[test]
    fn test_rejects_disallowed_extension() {
        let policy = IngestPolicy {
            allowed_extensions: vec!["jpg".to_string()],
            ..IngestConfig::default().policy()
        };
        let file = open(&encoded_image(16, 16, ImageFormat::Png));
        assert_eq!(rejection(&policy, &file), "png files are not allowed");
    }

    #[test]
    fn test_rejects_large_files_and_resolutions() {
        let file = open(&encoded_image(100, 100, ImageFormat::Png));

        let small_files = IngestPolicy {
            max_file_size: 10,
            ..IngestConfig::default().policy()
        };
        assert!(rejection(&small_files, &file).contains("exceeds the maximum"));

        let small_images = IngestPolicy {
            max_image_resolution: 99 * 100,
            ..IngestConfig::default().policy()
        };
        assert_eq!(
            rejection(&small_images, &file),
            "image resolution 100x100 is too large"
        );
    }
}
