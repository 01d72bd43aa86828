use super::{MediaKind, MediaSource};
use flate2::read::ZlibDecoder;
use serde_json::{Map, Value};
use std::io::Read;
use std::sync::OnceLock;

const TWIPS_PER_PIXEL: i64 = 20;
/// Longest possible RECT plus frame rate and frame count
const MAX_HEADER_BODY: u64 = 17 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    None,
    Zlib,
    Lzma,
}

impl Compression {
    fn as_str(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Zlib => "zlib",
            Compression::Lzma => "lzma",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SwfHeader {
    version: u8,
    compression: Compression,
    file_length: u32,
    /// Stage size and timing, unavailable for lzma bodies
    frame: Option<SwfFrame>,
}

#[derive(Debug, Clone, PartialEq)]
struct SwfFrame {
    width: u32,
    height: u32,
    frame_rate: f64,
    frame_count: u16,
}

/// Shockwave flash movies
#[derive(Debug, Default)]
pub struct FlashFile {
    header: OnceLock<Result<SwfHeader, String>>,
}

impl FlashFile {
    fn header(&self, source: &MediaSource) -> Result<&SwfHeader, &str> {
        self.header
            .get_or_init(|| {
                let reader = source.reader().map_err(|e| e.to_string())?;
                parse_header(reader)
            })
            .as_ref()
            .map_err(String::as_str)
    }

    fn frame(&self, source: &MediaSource) -> Option<&SwfFrame> {
        self.header(source).ok()?.frame.as_ref()
    }
}

fn parse_header(mut reader: impl Read) -> Result<SwfHeader, String> {
    let mut fixed = [0u8; 8];
    reader
        .read_exact(&mut fixed)
        .map_err(|_| "truncated swf header".to_string())?;

    let compression = match &fixed[..3] {
        b"FWS" => Compression::None,
        b"CWS" => Compression::Zlib,
        b"ZWS" => Compression::Lzma,
        _ => return Err("missing swf signature".to_string()),
    };
    let version = fixed[3];
    let file_length = u32::from_le_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);

    let mut body = Vec::new();
    let read = match compression {
        Compression::None => reader.take(MAX_HEADER_BODY).read_to_end(&mut body),
        Compression::Zlib => ZlibDecoder::new(reader)
            .take(MAX_HEADER_BODY)
            .read_to_end(&mut body),
        Compression::Lzma => {
            return Ok(SwfHeader {
                version,
                compression,
                file_length,
                frame: None,
            });
        }
    };
    read.map_err(|e| format!("unreadable swf body: {}", e))?;

    Ok(SwfHeader {
        version,
        compression,
        file_length,
        frame: Some(parse_frame(&body)?),
    })
}

fn parse_frame(body: &[u8]) -> Result<SwfFrame, String> {
    let mut bits = BitReader::new(body);
    let nbits = bits.read(5).ok_or("truncated stage rect")?;

    let mut fields = [0i64; 4];
    for field in &mut fields {
        *field = bits.read_signed(nbits).ok_or("truncated stage rect")?;
    }
    let [x_min, x_max, y_min, y_max] = fields;

    let rest = &body[bits.byte_len()..];
    if rest.len() < 4 {
        return Err("truncated frame header".to_string());
    }
    // 8.8 fixed point, fractional byte first
    let frame_rate = f64::from(rest[1]) + f64::from(rest[0]) / 256.0;
    let frame_count = u16::from_le_bytes([rest[2], rest[3]]);

    Ok(SwfFrame {
        width: twips_to_pixels(x_max - x_min),
        height: twips_to_pixels(y_max - y_min),
        frame_rate,
        frame_count,
    })
}

fn twips_to_pixels(twips: i64) -> u32 {
    u32::try_from((twips / TWIPS_PER_PIXEL).max(0)).unwrap_or(u32::MAX)
}

struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read(&mut self, count: u32) -> Option<u32> {
        let mut value = 0u32;
        for _ in 0..count {
            let byte = self.bytes.get(self.pos / 8)?;
            let bit = (byte >> (7 - self.pos % 8)) & 1;
            value = (value << 1) | u32::from(bit);
            self.pos += 1;
        }
        Some(value)
    }

    fn read_signed(&mut self, count: u32) -> Option<i64> {
        let raw = i64::from(self.read(count)?);
        if count > 0 && raw & (1 << (count - 1)) != 0 {
            Some(raw - (1 << count))
        } else {
            Some(raw)
        }
    }

    /// Bytes consumed, counting a partial byte as whole
    fn byte_len(&self) -> usize {
        self.pos.div_ceil(8)
    }
}

impl MediaKind for FlashFile {
    fn dimensions(&self, source: &MediaSource) -> (u32, u32) {
        self.frame(source)
            .map(|frame| (frame.width, frame.height))
            .unwrap_or((0, 0))
    }

    fn corruption(&self, source: &MediaSource) -> Option<String> {
        self.header(source).err().map(str::to_string)
    }

    fn duration(&self, source: &MediaSource) -> Option<f64> {
        let frame = self.frame(source)?;
        (frame.frame_rate > 0.0).then(|| f64::from(frame.frame_count) / frame.frame_rate)
    }

    fn frame_count(&self, source: &MediaSource) -> Option<u32> {
        self.frame(source).map(|frame| u32::from(frame.frame_count))
    }

    fn frame_rate(&self, source: &MediaSource) -> Option<f64> {
        self.frame(source).map(|frame| frame.frame_rate)
    }

    fn metadata(&self, source: &MediaSource) -> Map<String, Value> {
        let mut metadata = Map::new();
        if let Ok(header) = self.header(source) {
            metadata.insert("SWF:Version".to_string(), header.version.into());
            metadata.insert(
                "SWF:Compression".to_string(),
                header.compression.as_str().into(),
            );
            metadata.insert("SWF:FileLength".to_string(), header.file_length.into());
        }
        metadata
    }
}
