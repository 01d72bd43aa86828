use super::{MediaFile, MediaKind, MediaSource, PreviewOptions, render_preview};
use crate::error::MediaError;
use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::{AnimationDecoder, DynamicImage, ImageFormat, ImageReader};
use serde_json::{Map, Value};
use std::io::BufReader;
use std::sync::OnceLock;
use tracing::debug;

/// Raster images: jpeg, gif and png (including apng)
#[derive(Debug, Default)]
pub struct ImageFile {
    info: OnceLock<ImageInfo>,
}

#[derive(Debug, Default)]
struct ImageInfo {
    dimensions: (u32, u32),
    color: Option<String>,
    error: Option<String>,
    /// Per-frame delays in milliseconds, only for animated formats
    frame_delays: Option<Vec<f64>>,
}

impl ImageFile {
    fn info(&self, source: &MediaSource) -> &ImageInfo {
        self.info.get_or_init(|| inspect(source))
    }
}

fn decode(source: &MediaSource) -> Result<(DynamicImage, ImageFormat), MediaError> {
    let reader = ImageReader::new(BufReader::new(source.reader()?)).with_guessed_format()?;
    let format = reader
        .format()
        .ok_or_else(|| MediaError::Corrupt {
            format: "image",
            reason: "unrecognized image format".to_string(),
        })?;
    Ok((reader.decode()?, format))
}

fn inspect(source: &MediaSource) -> ImageInfo {
    let (img, format) = match decode(source) {
        Ok(decoded) => decoded,
        Err(e) => {
            debug!(path = %source.path().display(), error = %e, "Image failed to decode");
            return ImageInfo {
                error: Some(e.to_string()),
                ..ImageInfo::default()
            };
        }
    };

    let frame_delays = match format {
        ImageFormat::Gif => gif_frame_delays(source).ok(),
        ImageFormat::Png => png_frame_delays(source).ok().flatten(),
        _ => None,
    };

    ImageInfo {
        dimensions: (img.width(), img.height()),
        color: Some(format!("{:?}", img.color())),
        error: None,
        frame_delays,
    }
}

fn gif_frame_delays(source: &MediaSource) -> Result<Vec<f64>, MediaError> {
    let decoder = GifDecoder::new(BufReader::new(source.reader()?))?;
    frame_delays(decoder)
}

fn png_frame_delays(source: &MediaSource) -> Result<Option<Vec<f64>>, MediaError> {
    let decoder = PngDecoder::new(BufReader::new(source.reader()?))?;
    if !decoder.is_apng()? {
        return Ok(None);
    }
    Ok(Some(frame_delays(decoder.apng()?)?))
}

fn frame_delays<'a>(decoder: impl AnimationDecoder<'a>) -> Result<Vec<f64>, MediaError> {
    decoder
        .into_frames()
        .map(|frame| -> Result<f64, MediaError> {
            let (numer, denom) = frame?.delay().numer_denom_ms();
            Ok(f64::from(numer) / f64::from(denom.max(1)))
        })
        .collect()
}

fn read_exif(source: &MediaSource) -> Map<String, Value> {
    let mut metadata = Map::new();
    let Ok(file) = source.reader() else {
        return metadata;
    };

    match exif::Reader::new().read_from_container(&mut BufReader::new(file)) {
        Ok(exif) => {
            for field in exif.fields() {
                metadata
                    .entry(format!("EXIF:{}", field.tag))
                    .or_insert_with(|| {
                        Value::String(field.display_value().with_unit(&exif).to_string())
                    });
            }
        }
        Err(e) => debug!(error = %e, "No EXIF data"),
    }

    metadata
}

impl MediaKind for ImageFile {
    fn dimensions(&self, source: &MediaSource) -> (u32, u32) {
        self.info(source).dimensions
    }

    fn corruption(&self, source: &MediaSource) -> Option<String> {
        self.info(source).error.clone()
    }

    fn duration(&self, source: &MediaSource) -> Option<f64> {
        let delays = self.info(source).frame_delays.as_ref()?;
        let total_ms: f64 = delays.iter().sum();
        (delays.len() > 1 && total_ms > 0.0).then(|| total_ms / 1000.0)
    }

    fn frame_count(&self, source: &MediaSource) -> Option<u32> {
        let delays = self.info(source).frame_delays.as_ref()?;
        u32::try_from(delays.len()).ok()
    }

    fn frame_rate(&self, source: &MediaSource) -> Option<f64> {
        let count = self.frame_count(source)?;
        let duration = self.duration(source)?;
        Some(f64::from(count) / duration)
    }

    fn metadata(&self, source: &MediaSource) -> Map<String, Value> {
        let mut metadata = read_exif(source);
        if let Some(color) = &self.info(source).color {
            metadata.insert("Image:ColorType".to_string(), Value::String(color.clone()));
        }
        metadata
    }

    fn preview(
        &self,
        source: &MediaSource,
        max_width: Option<u32>,
        max_height: Option<u32>,
        options: &PreviewOptions,
    ) -> Result<Option<MediaFile>, MediaError> {
        let (width, height) = self.dimensions(source);
        let fits = max_width.is_none_or(|max| width <= max)
            && max_height.is_none_or(|max| height <= max);
        if fits && !options.crop {
            return Ok(None);
        }

        let (img, _) = decode(source)?;
        render_preview(img, max_width, max_height, options).map(Some)
    }
}
