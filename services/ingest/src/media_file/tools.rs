//! External media tools and capability probes

use crate::error::MediaError;
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use tracing::{debug, error};

pub const FFMPEG: &str = "ffmpeg";
pub const FFPROBE: &str = "ffprobe";
pub const MKVMERGE: &str = "mkvmerge";

/// Whether `program` can be executed and exits successfully with `arg`
pub fn tool_available(program: &str, arg: &str) -> bool {
    Command::new(program)
        .arg(arg)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// First tool of `tools` (program, version flag) that cannot be run
fn first_missing(tools: &[(&'static str, &str)]) -> Option<&'static str> {
    tools
        .iter()
        .find(|(program, arg)| !tool_available(program, arg))
        .map(|(program, _)| *program)
}

/// The transcoder or remuxer needed for video previews that is not
/// installed, if any. Checked once per process.
pub fn missing_video_preview_tool() -> Option<&'static str> {
    static MISSING: OnceLock<Option<&'static str>> = OnceLock::new();
    *MISSING.get_or_init(|| {
        let missing = first_missing(&[(FFMPEG, "-version"), (MKVMERGE, "--version")]);
        debug!(?missing, "Probed video preview tools");
        missing
    })
}

pub fn video_preview_supported() -> bool {
    missing_video_preview_tool().is_none()
}

/// Whether ffprobe is installed. Checked once per process.
pub fn probe_supported() -> bool {
    static SUPPORTED: OnceLock<bool> = OnceLock::new();
    *SUPPORTED.get_or_init(|| tool_available(FFPROBE, "-version"))
}

/// `path` as a tool argument. Relative paths get a `./` prefix so a leading
/// dash is never taken for an option.
pub(crate) fn path_arg(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        Path::new(".").join(path)
    }
}

/// Run a tool to completion and return its stdout
pub(crate) fn run<I, S>(tool: &'static str, args: I) -> Result<Vec<u8>, MediaError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => MediaError::ToolUnavailable(tool),
            _ => MediaError::Io(e),
        })?;

    if !output.status.success() {
        error!(tool, status = ?output.status, "External tool failed");
        return Err(MediaError::ToolFailed {
            tool,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output.stdout)
}
