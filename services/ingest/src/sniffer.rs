//! Content-based file type detection.
//!
//! The format of a file is decided from its leading bytes only. Filenames and
//! declared content types are never consulted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;

/// Number of leading bytes inspected by [`sniff`].
pub const HEADER_LEN: usize = 16;

const WEBM_MAGIC: &[u8] = b"\x1a\x45\xdf\xa3";
const MP4_BRANDS: [&[u8]; 6] = [b"isom", b"iso5", b"3gp5", b"mp42", b"avc1", b"M4V"];

/// Detected file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileFormat {
    #[serde(rename = "jpg")]
    Jpeg,
    #[serde(rename = "gif")]
    Gif,
    #[serde(rename = "png")]
    Png,
    #[serde(rename = "swf")]
    Flash,
    #[serde(rename = "webm")]
    Webm,
    #[serde(rename = "mp4")]
    Mp4,
    #[serde(rename = "zip")]
    Zip,
    #[serde(rename = "bin")]
    Binary,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Jpeg => "image/jpeg",
            FileFormat::Gif => "image/gif",
            FileFormat::Png => "image/png",
            FileFormat::Flash => "vector/flash",
            FileFormat::Webm => "video/webm",
            FileFormat::Mp4 => "video/mp4",
            FileFormat::Zip => "application/zip",
            FileFormat::Binary => "application/octet-stream",
        }
    }

    /// Canonical file extension for the format
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Jpeg => "jpg",
            FileFormat::Gif => "gif",
            FileFormat::Png => "png",
            FileFormat::Flash => "swf",
            FileFormat::Webm => "webm",
            FileFormat::Mp4 => "mp4",
            FileFormat::Zip => "zip",
            FileFormat::Binary => "bin",
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, FileFormat::Jpeg | FileFormat::Gif | FileFormat::Png)
    }

    pub fn is_video(&self) -> bool {
        matches!(self, FileFormat::Webm | FileFormat::Mp4)
    }

    pub fn is_flash(&self) -> bool {
        matches!(self, FileFormat::Flash)
    }

    /// Zip containers are treated as ugoira frame archives
    pub fn is_ugoira(&self) -> bool {
        matches!(self, FileFormat::Zip)
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a byte header. Signatures are checked in priority order.
pub fn detect(header: &[u8]) -> FileFormat {
    if header.starts_with(b"\xff\xd8") {
        FileFormat::Jpeg
    } else if header.starts_with(b"GIF87a") || header.starts_with(b"GIF89a") {
        FileFormat::Gif
    } else if header.starts_with(b"\x89PNG\r\n\x1a\n") {
        FileFormat::Png
    } else if header.starts_with(b"CWS") || header.starts_with(b"FWS") || header.starts_with(b"ZWS")
    {
        FileFormat::Flash
    } else if header.windows(WEBM_MAGIC.len()).any(|w| w == WEBM_MAGIC) {
        FileFormat::Webm
    } else if is_mp4(header) {
        FileFormat::Mp4
    } else if header.starts_with(b"PK\x03\x04") {
        FileFormat::Zip
    } else {
        FileFormat::Binary
    }
}

fn is_mp4(header: &[u8]) -> bool {
    if header.len() < 8 || &header[4..8] != b"ftyp" {
        return false;
    }

    let brand = &header[8..];
    MP4_BRANDS.iter().any(|b| brand.starts_with(b))
}

/// Read up to [`HEADER_LEN`] bytes from `reader` and classify them.
///
/// Read errors resolve to [`FileFormat::Binary`].
pub fn sniff<R: Read>(reader: R) -> FileFormat {
    let mut header = Vec::with_capacity(HEADER_LEN);
    match reader.take(HEADER_LEN as u64).read_to_end(&mut header) {
        Ok(_) => detect(&header),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read file header");
            FileFormat::Binary
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("boom"))
        }
    }

    fn padded(prefix: &[u8]) -> Vec<u8> {
        let mut bytes = prefix.to_vec();
        bytes.resize(HEADER_LEN, 0);
        bytes
    }

    #[test]
    fn test_detects_each_signature() {
        let cases: Vec<(Vec<u8>, FileFormat)> = vec![
            (padded(b"\xff\xd8\xff\xe0"), FileFormat::Jpeg),
            (padded(b"GIF87a"), FileFormat::Gif),
            (padded(b"GIF89a"), FileFormat::Gif),
            (padded(b"\x89PNG\r\n\x1a\n"), FileFormat::Png),
            (padded(b"CWS\x0a"), FileFormat::Flash),
            (padded(b"FWS\x0a"), FileFormat::Flash),
            (padded(b"ZWS\x0d"), FileFormat::Flash),
            (padded(b"\x1a\x45\xdf\xa3"), FileFormat::Webm),
            (padded(b"\x00\x00\x00\x20ftypisom"), FileFormat::Mp4),
            (padded(b"\x00\x00\x00\x18ftypiso5"), FileFormat::Mp4),
            (padded(b"\x00\x00\x00\x18ftyp3gp5"), FileFormat::Mp4),
            (padded(b"\x00\x00\x00\x18ftypmp42"), FileFormat::Mp4),
            (padded(b"\x00\x00\x00\x18ftypavc1"), FileFormat::Mp4),
            (padded(b"\x00\x00\x00\x1cftypM4V "), FileFormat::Mp4),
            (padded(b"PK\x03\x04"), FileFormat::Zip),
        ];

        for (header, expected) in cases {
            assert_eq!(detect(&header), expected, "header {:02x?}", header);
        }
    }

    #[test]
    fn test_webm_magic_anywhere_in_header() {
        let mut header = padded(b"");
        header[9..13].copy_from_slice(b"\x1a\x45\xdf\xa3");
        assert_eq!(detect(&header), FileFormat::Webm);
    }

    #[test]
    fn test_unknown_mp4_brand_is_binary() {
        assert_eq!(
            detect(&padded(b"\x00\x00\x00\x18ftypqt  ")),
            FileFormat::Binary
        );
    }

    #[test]
    fn test_priority_order() {
        // A jpeg marker wins even if a webm marker appears later.
        let mut header = padded(b"\xff\xd8");
        header[4..8].copy_from_slice(b"\x1a\x45\xdf\xa3");
        assert_eq!(detect(&header), FileFormat::Jpeg);
    }

    #[test]
    fn test_short_and_empty_input() {
        assert_eq!(detect(b""), FileFormat::Binary);
        assert_eq!(detect(b"\xff"), FileFormat::Binary);
        assert_eq!(detect(b"GIF8"), FileFormat::Binary);
        assert_eq!(detect(b"\x00\x00\x00\x18ftyp"), FileFormat::Binary);
        assert_eq!(detect(b"\xff\xd8"), FileFormat::Jpeg);
    }

    #[test]
    fn test_sniff_reads_only_header() {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend(std::iter::repeat_n(0u8, 1024));
        assert_eq!(sniff(bytes.as_slice()), FileFormat::Png);
    }

    #[test]
    fn test_sniff_read_error_is_binary() {
        assert_eq!(sniff(FailingReader), FileFormat::Binary);
    }

    #[test]
    fn test_format_names() {
        assert_eq!(FileFormat::Png.as_str(), "image/png");
        assert_eq!(FileFormat::Flash.extension(), "swf");
        assert!(FileFormat::Gif.is_image());
        assert!(FileFormat::Mp4.is_video());
        assert!(FileFormat::Zip.is_ugoira());
        assert!(!FileFormat::Binary.is_image());
    }
}
