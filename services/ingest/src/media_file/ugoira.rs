use super::{MediaFile, MediaKind, MediaSource, PreviewOptions, render_preview};
use crate::error::MediaError;
use image::DynamicImage;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::io::{BufReader, Read};
use std::sync::OnceLock;
use zip::ZipArchive;

const ANIMATION_JSON: &str = "animation.json";
const FRAME_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];
/// Largest frame or manifest read out of an archive
const MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct Animation {
    frames: Vec<AnimationFrame>,
}

#[derive(Debug, Deserialize)]
struct AnimationFrame {
    file: String,
    /// Milliseconds
    delay: u32,
}

#[derive(Debug)]
struct Frames {
    names: Vec<String>,
    delays: Option<Vec<u32>>,
    dimensions: (u32, u32),
}

/// Zip archives of animation frames
#[derive(Debug, Default)]
pub struct UgoiraFile {
    frames: OnceLock<Result<Frames, String>>,
}

impl UgoiraFile {
    fn frames(&self, source: &MediaSource) -> Result<&Frames, &str> {
        self.frames
            .get_or_init(|| read_frames(source).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(String::as_str)
    }
}

fn is_frame(name: &str) -> bool {
    name.rsplit_once('.').is_some_and(|(_, ext)| {
        FRAME_EXTENSIONS
            .iter()
            .any(|allowed| ext.eq_ignore_ascii_case(allowed))
    })
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>, MediaError> {
    read_entry_limited(archive, name, MAX_ENTRY_BYTES)
}

/// Read one entry, refusing entries larger than `limit` whether the size is
/// declared in the header or only found while inflating
fn read_entry_limited<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    limit: u64,
) -> Result<Vec<u8>, MediaError> {
    let too_large = || MediaError::Corrupt {
        format: "application/zip",
        reason: format!("{} exceeds {} bytes", name, limit),
    };

    let entry = archive.by_name(name)?;
    if entry.size() > limit {
        return Err(too_large());
    }

    let mut bytes = Vec::new();
    entry.take(limit + 1).read_to_end(&mut bytes)?;
    if bytes.len() as u64 > limit {
        return Err(too_large());
    }
    Ok(bytes)
}

fn open_archive(source: &MediaSource) -> Result<ZipArchive<BufReader<std::fs::File>>, MediaError> {
    Ok(ZipArchive::new(BufReader::new(source.reader()?))?)
}

fn read_frames(source: &MediaSource) -> Result<Frames, MediaError> {
    let mut archive = open_archive(source)?;

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|name| is_frame(name))
        .map(str::to_string)
        .collect();
    names.sort();

    let animation = match read_entry(&mut archive, ANIMATION_JSON) {
        Ok(bytes) => serde_json::from_slice::<Animation>(&bytes).ok(),
        Err(_) => None,
    };

    let delays = match animation {
        Some(animation) => {
            let listed: Vec<AnimationFrame> = animation
                .frames
                .into_iter()
                .filter(|frame| names.contains(&frame.file))
                .collect();
            names = listed.iter().map(|frame| frame.file.clone()).collect();
            Some(listed.into_iter().map(|frame| frame.delay).collect())
        }
        None => None,
    };

    let Some(first) = names.first() else {
        return Err(MediaError::Corrupt {
            format: "application/zip",
            reason: "archive contains no frames".to_string(),
        });
    };
    let first = image::load_from_memory(&read_entry(&mut archive, first)?)?;

    Ok(Frames {
        dimensions: (first.width(), first.height()),
        names,
        delays,
    })
}

fn first_frame(source: &MediaSource, frames: &Frames) -> Result<DynamicImage, MediaError> {
    let mut archive = open_archive(source)?;
    match frames.names.first() {
        Some(name) => Ok(image::load_from_memory(&read_entry(&mut archive, name)?)?),
        None => Err(MediaError::Corrupt {
            format: "application/zip",
            reason: "archive contains no frames".to_string(),
        }),
    }
}

impl MediaKind for UgoiraFile {
    fn dimensions(&self, source: &MediaSource) -> (u32, u32) {
        self.frames(source)
            .map(|frames| frames.dimensions)
            .unwrap_or((0, 0))
    }

    fn corruption(&self, source: &MediaSource) -> Option<String> {
        self.frames(source).err().map(str::to_string)
    }

    fn duration(&self, source: &MediaSource) -> Option<f64> {
        let delays = self.frames(source).ok()?.delays.as_ref()?;
        let total_ms: u64 = delays.iter().map(|delay| u64::from(*delay)).sum();
        (total_ms > 0).then(|| total_ms as f64 / 1000.0)
    }

    fn frame_count(&self, source: &MediaSource) -> Option<u32> {
        let frames = self.frames(source).ok()?;
        u32::try_from(frames.names.len()).ok()
    }

    fn frame_rate(&self, source: &MediaSource) -> Option<f64> {
        let count = self.frame_count(source)?;
        let duration = self.duration(source)?;
        Some(f64::from(count) / duration)
    }

    fn metadata(&self, source: &MediaSource) -> Map<String, Value> {
        let mut metadata = Map::new();
        if let Some(delays) = self
            .frames(source)
            .ok()
            .and_then(|frames| frames.delays.as_ref())
        {
            metadata.insert("Ugoira:FrameDelays".to_string(), delays.clone().into());
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
        let frames = self.frames(source).map_err(|reason| MediaError::Corrupt {
            format: "application/zip",
            reason: reason.to_string(),
        })?;
        let frame = first_frame(source, frames)?;
        render_preview(frame, max_width, max_height, options).map(Some)
    }
}
