//! Decoder subprocess invocation.
//!
//! [`ProcessInvoker`] runs the external decoder (FFmpeg by default) to pull
//! exactly one scaled frame out of a source file into a temporary image
//! file. The run is bounded by a timeout and by the caller's cancellation
//! token; in both cases the child is killed.
//!
//! Seeking is split in two when the target lies past
//! [`SEEK_PREROLL`]: a fast keyframe-aligned `-ss` before `-i`, then a
//! frame-accurate `-ss` of the preroll after it. Short offsets use the
//! accurate seek alone.
//!
//! The temporary file is owned by a [`TempFrameFile`] guard and removed
//! when the guard drops, whichever way the extraction ends.

use std::ffi::OsString;
use std::io::{Error as IoError, ErrorKind};
use std::mem::ManuallyDrop;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tempfile::TempPath;
use tokio::process::{Child, Command};

use crate::cancellation::CancellationToken;
use crate::configuration::DecoderOptions;
use crate::error::FrameCacheError;
use crate::source::FrameRequest;
use crate::utilities::format_seek_seconds;

/// Distance before the target covered by the accurate (post-input) seek.
pub const SEEK_PREROLL: Duration = Duration::from_millis(500);

const TEMP_PREFIX: &str = "framecache-";
const TEMP_SUFFIX: &str = ".jpg";

/// Where the decoder is told to seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekPlan {
    /// Coarse seek applied before the input is opened, if any.
    pub before_input: Option<Duration>,
    /// Accurate seek applied after the input is opened.
    pub after_input: Duration,
}

impl SeekPlan {
    /// Plan the seek for `timestamp`.
    pub fn for_timestamp(timestamp: Duration) -> Self {
        if timestamp > SEEK_PREROLL {
            Self {
                before_input: Some(timestamp - SEEK_PREROLL),
                after_input: SEEK_PREROLL,
            }
        } else {
            Self {
                before_input: None,
                after_input: timestamp,
            }
        }
    }
}

/// A decoded frame file on disk, deleted on drop.
///
/// Deletion failures are logged and otherwise ignored.
#[derive(Debug)]
pub struct TempFrameFile {
    path: ManuallyDrop<TempPath>,
}

impl TempFrameFile {
    fn new(path: TempPath) -> Self {
        Self {
            path: ManuallyDrop::new(path),
        }
    }

    /// Location of the frame file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFrameFile {
    fn drop(&mut self) {
        // SAFETY: `path` is taken exactly once, here, and never touched again.
        let path = unsafe { ManuallyDrop::take(&mut self.path) };
        let display = path.to_path_buf();
        if let Err(error) = path.close() {
            if error.kind() != ErrorKind::NotFound {
                log::warn!("Failed to remove temporary frame {}: {error}", display.display());
            }
        }
    }
}

enum ProcessOutcome {
    Exited(Result<ExitStatus, IoError>),
    TimedOut,
    Cancelled,
}

/// Runs the external decoder for single-frame extraction.
#[derive(Debug, Clone, Default)]
pub struct ProcessInvoker {
    options: DecoderOptions,
}

impl ProcessInvoker {
    /// Create an invoker with the given decoder settings.
    pub fn new(options: DecoderOptions) -> Self {
        Self { options }
    }

    /// Decoder settings in use.
    pub fn options(&self) -> &DecoderOptions {
        &self.options
    }

    /// Build the decoder command line for `request`, writing to `output`.
    pub fn build_arguments(&self, request: &FrameRequest, output: &Path) -> Vec<OsString> {
        let seek = SeekPlan::for_timestamp(request.timestamp());
        let mut arguments: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
            .into_iter()
            .map(OsString::from)
            .collect();

        if let Some(before) = seek.before_input {
            arguments.push("-ss".into());
            arguments.push(format_seek_seconds(before).into());
        }

        arguments.push("-i".into());
        arguments.push(request.path.as_os_str().to_owned());
        arguments.push("-ss".into());
        arguments.push(format_seek_seconds(seek.after_input).into());
        arguments.push("-frames:v".into());
        arguments.push("1".into());
        arguments.push("-vf".into());
        arguments.push(
            format!(
                "scale={}:{}:force_original_aspect_ratio=decrease",
                request.width, request.height
            )
            .into(),
        );
        arguments.push("-q:v".into());
        arguments.push(self.options.output_quality.to_string().into());
        arguments.push("-y".into());
        arguments.push(output.as_os_str().to_owned());
        arguments
    }

    /// Run the decoder for `request` and return the resulting frame file.
    ///
    /// # Errors
    ///
    /// - [`FrameCacheError::InvalidRequest`] if `request` fails
    ///   [`FrameRequest::validate`].
    /// - [`FrameCacheError::SourceNotFound`] if the source is not a file
    ///   (the decoder is not started).
    /// - [`FrameCacheError::ProcessLaunch`] if the decoder cannot be spawned.
    /// - [`FrameCacheError::Timeout`] if it runs past the timeout.
    /// - [`FrameCacheError::Cancelled`] if `cancel` fires first.
    /// - [`FrameCacheError::ProcessExit`] on a non-zero exit status.
    /// - [`FrameCacheError::MissingOutput`] if no image was written.
    pub async fn invoke(
        &self,
        request: &FrameRequest,
        cancel: &CancellationToken,
    ) -> Result<TempFrameFile, FrameCacheError> {
        request.validate()?;

        let source_exists = tokio::fs::metadata(&request.path)
            .await
            .is_ok_and(|metadata| metadata.is_file());
        if !source_exists {
            return Err(FrameCacheError::SourceNotFound {
                path: request.path.clone(),
            });
        }
        if cancel.is_cancelled() {
            return Err(FrameCacheError::Cancelled);
        }

        let output = TempFrameFile::new(
            tempfile::Builder::new()
                .prefix(TEMP_PREFIX)
                .suffix(TEMP_SUFFIX)
                .tempfile()?
                .into_temp_path(),
        );
        let arguments = self.build_arguments(request, output.path());

        log::debug!(
            "Launching decoder for {} frame {} ({}x{})",
            request.path.display(),
            request.frame_index,
            request.width,
            request.height
        );

        let mut child = Command::new(&self.options.program)
            .args(&arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                let program = self.options.program.to_string_lossy().into_owned();
                log::warn!("Failed to launch decoder {program}: {source}");
                FrameCacheError::ProcessLaunch { program, source }
            })?;

        let outcome = tokio::select! {
            status = child.wait() => ProcessOutcome::Exited(status),
            () = tokio::time::sleep(self.options.timeout) => ProcessOutcome::TimedOut,
            () = cancel.cancelled() => ProcessOutcome::Cancelled,
        };

        let status = match outcome {
            ProcessOutcome::Exited(status) => status?,
            ProcessOutcome::TimedOut => {
                log::warn!(
                    "Decoder timed out after {:?} on {} frame {}",
                    self.options.timeout,
                    request.path.display(),
                    request.frame_index
                );
                terminate(&mut child).await;
                return Err(FrameCacheError::Timeout(self.options.timeout));
            }
            ProcessOutcome::Cancelled => {
                log::debug!(
                    "Decoder cancelled on {} frame {}",
                    request.path.display(),
                    request.frame_index
                );
                terminate(&mut child).await;
                return Err(FrameCacheError::Cancelled);
            }
        };

        if !status.success() {
            return Err(FrameCacheError::ProcessExit {
                code: status.code(),
            });
        }

        match tokio::fs::metadata(output.path()).await {
            Ok(metadata) if metadata.len() > 0 => Ok(output),
            _ => Err(FrameCacheError::MissingOutput(output.path().to_path_buf())),
        }
    }
}

/// Kill the child, logging instead of failing if that does not work.
async fn terminate(child: &mut Child) {
    if let Err(error) = child.kill().await {
        log::warn!("Failed to kill decoder process: {error}");
    }
}
