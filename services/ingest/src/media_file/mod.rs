//! Polymorphic media file abstraction.
//!
//! A [`MediaFile`] owns an open file and exposes a uniform set of properties
//! (dimensions, duration, frame data, hash, metadata, previews). The concrete
//! behaviour is chosen from the sniffed [`FileFormat`] when the file is opened.

mod flash;
mod image;
pub mod tools;
mod ugoira;
mod video;

use crate::error::MediaError;
use crate::sniffer::{self, FileFormat};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tempfile::{NamedTempFile, TempPath};

pub use self::flash::FlashFile;
pub use self::image::ImageFile;
pub use self::ugoira::UgoiraFile;
pub use self::video::VideoFile;

/// Readable, seekable file backing a [`MediaFile`].
///
/// Temporary files are deleted once the last source referring to them is
/// dropped.
#[derive(Debug)]
pub struct MediaSource {
    file: File,
    path: PathBuf,
    temp: Option<Arc<TempPath>>,
}

impl MediaSource {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            file,
            path,
            temp: None,
        })
    }

    /// Take ownership of a temporary file, which is removed on drop
    pub fn from_temp(temp: NamedTempFile) -> Self {
        let (file, temp_path) = temp.into_parts();
        Self {
            file,
            path: temp_path.to_path_buf(),
            temp: Some(Arc::new(temp_path)),
        }
    }

    /// Write `bytes` to a new temporary file
    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        let mut temp = NamedTempFile::new()?;
        temp.write_all(bytes)?;
        temp.flush()?;
        Ok(Self::from_temp(temp))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// A handle positioned at the start of the file.
    ///
    /// Handles share the cursor of the underlying file, so readers must not
    /// be interleaved.
    pub fn reader(&self) -> io::Result<File> {
        let mut file = self.file.try_clone()?;
        file.rewind()?;
        Ok(file)
    }

    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            file: self.file.try_clone()?,
            path: self.path.clone(),
            temp: self.temp.clone(),
        })
    }
}

/// Anything [`MediaFile::open`] accepts
pub enum MediaInput<'a> {
    Path(&'a Path),
    Source(MediaSource),
    Media(&'a MediaFile),
}

impl<'a> From<&'a Path> for MediaInput<'a> {
    fn from(path: &'a Path) -> Self {
        MediaInput::Path(path)
    }
}

impl<'a> From<&'a PathBuf> for MediaInput<'a> {
    fn from(path: &'a PathBuf) -> Self {
        MediaInput::Path(path.as_path())
    }
}

impl<'a> From<&'a str> for MediaInput<'a> {
    fn from(path: &'a str) -> Self {
        MediaInput::Path(Path::new(path))
    }
}

impl From<MediaSource> for MediaInput<'_> {
    fn from(source: MediaSource) -> Self {
        MediaInput::Source(source)
    }
}

impl<'a> From<&'a MediaFile> for MediaInput<'a> {
    fn from(file: &'a MediaFile) -> Self {
        MediaInput::Media(file)
    }
}

/// Options for [`MediaFile::preview`]
#[derive(Debug, Clone)]
pub struct PreviewOptions {
    /// JPEG quality, 1-100
    pub quality: u8,
    /// Fill both bounds and crop the overflow instead of fitting inside them
    pub crop: bool,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            quality: 85,
            crop: false,
        }
    }
}

/// Serialized view of a media file handed to other layers.
///
/// Field order is part of the external contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAttributes {
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub format: FileFormat,
    pub size: u64,
    pub hash: String,
    pub is_corrupt: bool,
    pub duration: Option<f64>,
    pub frame_count: Option<u32>,
    pub frame_rate: Option<f64>,
    pub metadata: Map<String, Value>,
}

/// Format specific behaviour. Every method has the generic default.
pub(crate) trait MediaKind: Send + Sync + fmt::Debug {
    fn dimensions(&self, _source: &MediaSource) -> (u32, u32) {
        (0, 0)
    }

    /// Why the content is malformed, if it is
    fn corruption(&self, _source: &MediaSource) -> Option<String> {
        None
    }

    /// Checks run when a file is opened in strict mode
    fn validate(&self, source: &MediaSource, format: FileFormat) -> Result<(), MediaError> {
        match self.corruption(source) {
            Some(reason) => Err(MediaError::Corrupt {
                format: format.as_str(),
                reason,
            }),
            None => Ok(()),
        }
    }

    fn duration(&self, _source: &MediaSource) -> Option<f64> {
        None
    }

    fn frame_count(&self, _source: &MediaSource) -> Option<u32> {
        None
    }

    fn frame_rate(&self, _source: &MediaSource) -> Option<f64> {
        None
    }

    fn has_audio(&self, _source: &MediaSource) -> bool {
        false
    }

    fn metadata(&self, _source: &MediaSource) -> Map<String, Value> {
        Map::new()
    }

    fn preview(
        &self,
        _source: &MediaSource,
        _max_width: Option<u32>,
        _max_height: Option<u32>,
        _options: &PreviewOptions,
    ) -> Result<Option<MediaFile>, MediaError> {
        Ok(None)
    }
}

/// Fallback for content with no specific handling
#[derive(Debug, Default)]
pub struct GenericFile;

impl MediaKind for GenericFile {}

fn kind_for(format: FileFormat) -> Box<dyn MediaKind> {
    match format {
        FileFormat::Zip => Box::new(UgoiraFile::default()),
        FileFormat::Jpeg | FileFormat::Gif | FileFormat::Png => Box::new(ImageFile::default()),
        FileFormat::Webm | FileFormat::Mp4 => Box::new(VideoFile::default()),
        FileFormat::Flash => Box::new(FlashFile::default()),
        FileFormat::Binary => Box::new(GenericFile),
    }
}

pub struct MediaFile {
    source: MediaSource,
    strict: bool,
    format: FileFormat,
    kind: Box<dyn MediaKind>,
    size: OnceLock<u64>,
    hash: OnceLock<String>,
    metadata: OnceLock<Map<String, Value>>,
}

impl fmt::Debug for MediaFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaFile")
            .field("path", &self.source.path)
            .field("format", &self.format)
            .field("strict", &self.strict)
            .finish()
    }
}

impl MediaFile {
    /// Open a file and pick its variant from the content.
    ///
    /// Passing an existing `MediaFile` returns a second view onto the same
    /// file without detecting the format again. With `strict` set, malformed
    /// content is an error instead of being reported by [`is_corrupt`].
    ///
    /// [`is_corrupt`]: MediaFile::is_corrupt
    pub fn open<'a>(input: impl Into<MediaInput<'a>>, strict: bool) -> Result<Self, MediaError> {
        let source = match input.into() {
            MediaInput::Media(file) => return file.duplicate(),
            MediaInput::Path(path) => MediaSource::open(path)?,
            MediaInput::Source(source) => source,
        };

        let format = match source.reader() {
            Ok(reader) => sniffer::sniff(reader),
            Err(_) => FileFormat::Binary,
        };

        let file = Self::with_format(source, format, strict);
        if strict {
            file.kind.validate(&file.source, format)?;
        }

        tracing::debug!(path = %file.source.path.display(), format = %format, "Opened media file");
        Ok(file)
    }

    fn with_format(source: MediaSource, format: FileFormat, strict: bool) -> Self {
        Self {
            source,
            strict,
            format,
            kind: kind_for(format),
            size: OnceLock::new(),
            hash: OnceLock::new(),
            metadata: OnceLock::new(),
        }
    }

    /// A new view onto the same file. Cached properties are not shared.
    pub fn duplicate(&self) -> Result<Self, MediaError> {
        Ok(Self::with_format(
            self.source.try_clone()?,
            self.format,
            self.strict,
        ))
    }

    pub fn source(&self) -> &MediaSource {
        &self.source
    }

    pub fn path(&self) -> &Path {
        self.source.path()
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn size(&self) -> Result<u64, MediaError> {
        if let Some(size) = self.size.get() {
            return Ok(*size);
        }
        let size = self.source.len()?;
        Ok(*self.size.get_or_init(|| size))
    }

    /// SHA-256 of the full file content, hex encoded
    pub fn content_hash(&self) -> Result<String, MediaError> {
        if let Some(hash) = self.hash.get() {
            return Ok(hash.clone());
        }

        let mut reader = self.source.reader()?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        let hash = hex::encode(hasher.finalize());
        Ok(self.hash.get_or_init(|| hash).clone())
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.kind.dimensions(&self.source)
    }

    pub fn width(&self) -> u32 {
        self.dimensions().0
    }

    pub fn height(&self) -> u32 {
        self.dimensions().1
    }

    pub fn is_image(&self) -> bool {
        self.format.is_image()
    }

    pub fn is_video(&self) -> bool {
        self.format.is_video()
    }

    pub fn is_ugoira(&self) -> bool {
        self.format.is_ugoira()
    }

    pub fn is_flash(&self) -> bool {
        self.format.is_flash()
    }

    pub fn is_corrupt(&self) -> bool {
        self.kind.corruption(&self.source).is_some()
    }

    pub fn is_animated(&self) -> bool {
        self.is_video() || self.frame_count().is_some_and(|count| count > 1)
    }

    pub fn duration(&self) -> Option<f64> {
        self.kind.duration(&self.source)
    }

    pub fn frame_count(&self) -> Option<u32> {
        self.kind.frame_count(&self.source)
    }

    pub fn frame_rate(&self) -> Option<f64> {
        self.kind.frame_rate(&self.source)
    }

    pub fn has_audio(&self) -> bool {
        self.kind.has_audio(&self.source)
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        self.metadata
            .get_or_init(|| self.kind.metadata(&self.source))
    }

    /// A smaller JPEG rendition fitting within the bounds, or `None` when the
    /// format has nothing to show or the file is already small enough.
    pub fn preview(
        &self,
        max_width: Option<u32>,
        max_height: Option<u32>,
        options: &PreviewOptions,
    ) -> Result<Option<MediaFile>, MediaError> {
        self.kind
            .preview(&self.source, max_width, max_height, options)
    }

    pub fn attributes(&self) -> Result<MediaAttributes, MediaError> {
        let (width, height) = self.dimensions();
        Ok(MediaAttributes {
            path: self.path().display().to_string(),
            width,
            height,
            format: self.format,
            size: self.size()?,
            hash: self.content_hash()?,
            is_corrupt: self.is_corrupt(),
            duration: self.duration(),
            frame_count: self.frame_count(),
            frame_rate: self.frame_rate(),
            metadata: self.metadata().clone(),
        })
    }

    /// Attributes as a JSON object, keys in [`MediaAttributes`] field order
    pub fn to_attribute_map(&self) -> Result<Map<String, Value>, MediaError> {
        match serde_json::to_value(self.attributes()?)? {
            Value::Object(map) => Ok(map),
            other => Err(MediaError::Serialize(serde::ser::Error::custom(format!(
                "attributes serialized to {}",
                other
            )))),
        }
    }
}

/// Encode `img` as a JPEG within the bounds and open it as a new media file
pub(crate) fn render_preview(
    img: ::image::DynamicImage,
    max_width: Option<u32>,
    max_height: Option<u32>,
    options: &PreviewOptions,
) -> Result<MediaFile, MediaError> {
    use ::image::codecs::jpeg::JpegEncoder;
    use ::image::imageops::FilterType;

    let resized = if options.crop {
        img.resize_to_fill(
            max_width.unwrap_or(img.width()),
            max_height.unwrap_or(img.height()),
            FilterType::Lanczos3,
        )
    } else {
        let (width, height) =
            crate::scaler::scale_dimensions(img.width(), img.height(), max_width, max_height);
        img.resize_exact(width.max(1), height.max(1), FilterType::Lanczos3)
    };

    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, options.quality.clamp(1, 100));
    ::image::DynamicImage::ImageRgb8(resized.to_rgb8()).write_with_encoder(encoder)?;

    let mut temp = tempfile::Builder::new().suffix(".jpg").tempfile()?;
    temp.write_all(&bytes)?;
    temp.flush()?;

    MediaFile::open(MediaSource::from_temp(temp), false)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use ::image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    pub fn encoded_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), format)
            .expect("encode test image");
        bytes
    }
}
