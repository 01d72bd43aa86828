use super::tools::{self, FFMPEG, FFPROBE};
use super::{MediaFile, MediaKind, MediaSource, PreviewOptions, render_preview};
use crate::error::MediaError;
use crate::sniffer::FileFormat;
use serde_json::{Map, Value};
use std::ffi::OsStr;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Summary of the ffprobe report for a file
#[derive(Debug, Clone, Default, PartialEq)]
struct Probe {
    width: u32,
    height: u32,
    duration: Option<f64>,
    frame_count: Option<u32>,
    frame_rate: Option<f64>,
    has_video: bool,
    has_audio: bool,
    metadata: Map<String, Value>,
}

/// Webm and mp4 videos, inspected with ffprobe
#[derive(Debug, Default)]
pub struct VideoFile {
    probe: OnceLock<Result<Probe, String>>,
}

impl VideoFile {
    fn probe(&self, source: &MediaSource) -> Result<&Probe, &str> {
        self.probe
            .get_or_init(|| run_probe(source).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(String::as_str)
    }
}

fn run_probe(source: &MediaSource) -> Result<Probe, MediaError> {
    info!(path = %source.path().display(), "Probing video");

    let input = tools::path_arg(source.path());
    let stdout = tools::run(
        FFPROBE,
        [
            OsStr::new("-v"),
            OsStr::new("quiet"),
            OsStr::new("-print_format"),
            OsStr::new("json"),
            OsStr::new("-show_format"),
            OsStr::new("-show_streams"),
            input.as_os_str(),
        ],
    )?;

    let report: Value = serde_json::from_slice(&stdout).map_err(|e| MediaError::ToolFailed {
        tool: FFPROBE,
        message: format!("invalid json output: {}", e),
    })?;
    Ok(parse_probe(&report))
}

/// Parse a number ffprobe reports either as a string or as a json number
fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Parse an "n/d" rational, treating a zero denominator as unknown
fn rational(value: Option<&Value>) -> Option<f64> {
    let (numer, denom) = value?.as_str()?.split_once('/')?;
    let numer: f64 = numer.parse().ok()?;
    let denom: f64 = denom.parse().ok()?;
    (denom != 0.0 && numer != 0.0).then(|| numer / denom)
}

fn parse_probe(report: &Value) -> Probe {
    let mut probe = Probe::default();

    if let Some(format) = report.get("format") {
        probe.duration = number(format.get("duration"));

        if let Some(name) = format.get("format_name").and_then(|v| v.as_str()) {
            probe
                .metadata
                .insert("Format:Name".to_string(), name.into());
        }
        if let Some(bit_rate) = number(format.get("bit_rate")) {
            probe
                .metadata
                .insert("Format:BitRate".to_string(), bit_rate.into());
        }
        if let Some(tags) = format.get("tags").and_then(|v| v.as_object()) {
            for (key, value) in tags {
                probe
                    .metadata
                    .insert(format!("Format:{}", key), value.clone());
            }
        }
    }

    let streams = report
        .get("streams")
        .and_then(|v| v.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();

    for stream in streams {
        let codec = stream.get("codec_name").and_then(|v| v.as_str());
        match stream.get("codec_type").and_then(|v| v.as_str()) {
            // first video stream wins
            Some("video") if !probe.has_video => {
                probe.has_video = true;
                probe.width = stream
                    .get("width")
                    .and_then(|v| v.as_u64())
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or(0);
                probe.height = stream
                    .get("height")
                    .and_then(|v| v.as_u64())
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or(0);
                probe.frame_count = number(stream.get("nb_frames")).map(|n| n as u32);
                probe.frame_rate = rational(stream.get("avg_frame_rate"))
                    .or_else(|| rational(stream.get("r_frame_rate")));
                if probe.duration.is_none() {
                    probe.duration = number(stream.get("duration"));
                }
                if let Some(codec) = codec {
                    probe
                        .metadata
                        .insert("Video:Codec".to_string(), codec.into());
                }
            }
            Some("audio") if !probe.has_audio => {
                probe.has_audio = true;
                if let Some(codec) = codec {
                    probe
                        .metadata
                        .insert("Audio:Codec".to_string(), codec.into());
                }
                if let Some(channels) = stream.get("channels").and_then(|v| v.as_i64()) {
                    probe
                        .metadata
                        .insert("Audio:Channels".to_string(), channels.into());
                }
            }
            _ => {}
        }
    }

    if probe.frame_count.is_none() {
        probe.frame_count = probe
            .duration
            .zip(probe.frame_rate)
            .map(|(duration, rate)| (duration * rate).round() as u32);
    }

    probe
}

/// Extract the first frame with ffmpeg into a temporary png
fn first_frame(source: &MediaSource) -> Result<image::DynamicImage, MediaError> {
    let frame = tempfile::Builder::new().suffix(".png").tempfile()?;
    let input = tools::path_arg(source.path());

    tools::run(
        FFMPEG,
        [
            OsStr::new("-y"),
            OsStr::new("-v"),
            OsStr::new("error"),
            OsStr::new("-i"),
            input.as_os_str(),
            OsStr::new("-vframes"),
            OsStr::new("1"),
            OsStr::new("-f"),
            OsStr::new("image2"),
            frame.path().as_os_str(),
        ],
    )?;

    Ok(image::open(frame.path())?)
}

impl MediaKind for VideoFile {
    fn dimensions(&self, source: &MediaSource) -> (u32, u32) {
        self.probe(source)
            .map(|probe| (probe.width, probe.height))
            .unwrap_or((0, 0))
    }

    fn corruption(&self, source: &MediaSource) -> Option<String> {
        match self.probe(source) {
            Ok(probe) if !probe.has_video => Some("no video stream".to_string()),
            Ok(_) => None,
            Err(reason) => Some(reason.to_string()),
        }
    }

    fn validate(&self, source: &MediaSource, format: FileFormat) -> Result<(), MediaError> {
        if !tools::probe_supported() {
            return Err(MediaError::ToolUnavailable(FFPROBE));
        }
        match self.corruption(source) {
            Some(reason) => Err(MediaError::Corrupt {
                format: format.as_str(),
                reason,
            }),
            None => Ok(()),
        }
    }

    fn duration(&self, source: &MediaSource) -> Option<f64> {
        self.probe(source).ok()?.duration
    }

    fn frame_count(&self, source: &MediaSource) -> Option<u32> {
        self.probe(source).ok()?.frame_count
    }

    fn frame_rate(&self, source: &MediaSource) -> Option<f64> {
        self.probe(source).ok()?.frame_rate
    }

    fn has_audio(&self, source: &MediaSource) -> bool {
        self.probe(source).is_ok_and(|probe| probe.has_audio)
    }

    fn metadata(&self, source: &MediaSource) -> Map<String, Value> {
        self.probe(source)
            .map(|probe| probe.metadata.clone())
            .unwrap_or_default()
    }

    fn preview(
        &self,
        source: &MediaSource,
        max_width: Option<u32>,
        max_height: Option<u32>,
        options: &PreviewOptions,
    ) -> Result<Option<MediaFile>, MediaError> {
        if let Some(tool) = tools::missing_video_preview_tool() {
            return Err(MediaError::ToolUnavailable(tool));
        }

        debug!(path = %source.path().display(), "Rendering video preview");
        let frame = first_frame(source)?;
        render_preview(frame, max_width, max_height, options).map(Some)
    }
}
