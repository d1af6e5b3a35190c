//! Output writer capability and its implementations.
//!
//! The export pipeline only sees [`WriterFactory`] and [`VideoWriter`].
//! [`FfmpegWriterFactory`] pipes BGRA frames into an `ffmpeg` process that
//! encodes H.264 into MP4. [`RecordingWriterFactory`] keeps everything in
//! memory and writes a plain-text manifest, for dry runs and tests.

use std::fmt::Write as _;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ExportError, Result};
use crate::pipeline::pool::{PixelBuffer, PixelBufferPool, PixelFormat};
use crate::video::time::{frame_index_at, MediaTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp4,
}

/// Everything a writer needs to know before the first frame arrives
#[derive(Debug, Clone, PartialEq)]
pub struct WriterSettings {
    pub codec: VideoCodec,
    pub container: Container,
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    /// Encoder implementation (ffmpeg encoder name)
    pub encoder: String,
    /// Constant rate factor, 0 (lossless) to 51
    pub crf: u8,
    /// Pixel buffers in flight at once
    pub pool_capacity: usize,
}

impl WriterSettings {
    /// Checks every writer shares
    pub fn validate(&self) -> Result<()> {
        let unsupported = |details: String| Err(ExportError::UnsupportedSettings { details }.into());

        if self.width == 0 || self.height == 0 {
            return unsupported(format!("frame size {}x{}", self.width, self.height));
        }
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return unsupported(format!("frame rate {}", self.frame_rate));
        }
        if self.crf > 51 {
            return unsupported(format!("crf {}", self.crf));
        }
        Ok(())
    }

    /// Frame size in the encoded stream. 4:2:0 chroma needs even sides, so
    /// odd sizes grow by one pixel of padding.
    pub fn encoded_size(&self) -> (u32, u32) {
        (self.width + self.width % 2, self.height + self.height % 2)
    }
}

/// Accepts pixel buffers at presentation times and produces a container
pub trait VideoWriter: Send {
    /// Where the finished container is written
    fn output(&self) -> &Path;

    /// Pool that `append` expects its buffers to come from
    fn pixel_buffer_pool(&self) -> &PixelBufferPool;

    /// Open the writing session; later timestamps are relative to `at`
    fn start_session(&mut self, at: MediaTime) -> Result<()>;

    /// Append one frame. Ownership of the buffer moves to the writer.
    fn append(&mut self, buffer: PixelBuffer, at: MediaTime) -> Result<()>;

    /// No more frames will be appended
    fn mark_input_finished(&mut self);

    /// Flush and close the container. Blocks until it is complete.
    fn finish_writing(&mut self) -> Result<()>;

    /// Abandon the output and delete whatever was written
    fn cancel_writing(&mut self);
}

/// Creates writers for a given output and settings
pub trait WriterFactory: Send + Sync {
    /// Fails with `UnsupportedSettings` when a writer could not accept `settings`
    fn can_apply(&self, settings: &WriterSettings) -> Result<()>;

    fn create(&self, output: &Path, settings: &WriterSettings) -> Result<Box<dyn VideoWriter>>;
}

fn check_monotonic(last: Option<MediaTime>, at: MediaTime) -> Result<()> {
    match last {
        Some(previous) if at < previous => Err(ExportError::NonMonotonicTimestamp {
            previous: previous.seconds(),
            current: at.seconds(),
        }
        .into()),
        _ => Ok(()),
    }
}

fn check_buffer(pool: &PixelBufferPool, buffer: &PixelBuffer) -> Result<()> {
    let key = (buffer.format(), buffer.width(), buffer.height());
    if key != pool.key() {
        return Err(ExportError::AppendFailed {
            reason: format!("buffer {:?} does not match pool {:?}", key, pool.key()),
        }
        .into());
    }
    Ok(())
}

fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial output {}: {}", path.display(), e),
    }
}

/// Writers backed by an `ffmpeg` child process
#[derive(Debug, Clone)]
pub struct FfmpegWriterFactory {
    ffmpeg: PathBuf,
}

impl FfmpegWriterFactory {
    pub fn new() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }

    pub fn with_binary<P: Into<PathBuf>>(ffmpeg: P) -> Self {
        Self { ffmpeg: ffmpeg.into() }
    }

    fn encoder_available(&self, encoder: &str) -> Result<bool> {
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ExportError::WriterSetup {
                reason: format!("Failed to run {}: {}", self.ffmpeg.display(), e),
            })?;

        let listing = String::from_utf8_lossy(&output.stdout);
        Ok(listing
            .lines()
            .any(|line| line.split_whitespace().nth(1) == Some(encoder)))
    }
}

impl Default for FfmpegWriterFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl WriterFactory for FfmpegWriterFactory {
    fn can_apply(&self, settings: &WriterSettings) -> Result<()> {
        settings.validate()?;
        if !self.encoder_available(&settings.encoder)? {
            return Err(ExportError::UnsupportedSettings {
                details: format!("ffmpeg has no encoder named '{}'", settings.encoder),
            }
            .into());
        }
        Ok(())
    }

    fn create(&self, output: &Path, settings: &WriterSettings) -> Result<Box<dyn VideoWriter>> {
        Ok(Box::new(FfmpegWriter::spawn(&self.ffmpeg, output, settings)?))
    }
}

struct FeedItem {
    buffer: PixelBuffer,
    /// Copies of the previous frame to write first, covering dropped frames
    gap: u64,
}

struct FfmpegWriter {
    output: PathBuf,
    frame_rate: f64,
    pool: PixelBufferPool,
    child: Child,
    frames: Option<Sender<FeedItem>>,
    feeder: Option<JoinHandle<std::result::Result<u64, String>>>,
    stderr: Option<JoinHandle<String>>,
    session_start: Option<MediaTime>,
    next_index: i64,
    last_time: Option<MediaTime>,
    done: bool,
}

impl FfmpegWriter {
    fn spawn(ffmpeg: &Path, output: &Path, settings: &WriterSettings) -> Result<Self> {
        let setup_failed = |reason: String| ExportError::WriterSetup { reason };

        let encoded = settings.encoded_size();
        if encoded != (settings.width, settings.height) {
            info!(
                "Padding {}x{} frames to {}x{} for yuv420p",
                settings.width, settings.height, encoded.0, encoded.1
            );
        }

        let mut child = Command::new(ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", settings.pixel_format.ffmpeg_name()])
            .arg("-s")
            .arg(format!("{}x{}", settings.width, settings.height))
            .arg("-framerate")
            .arg(format!("{}", settings.frame_rate))
            .args(["-i", "pipe:0", "-an"])
            .arg("-vf")
            .arg(format!("pad={}:{}", encoded.0, encoded.1))
            .args(["-c:v", settings.encoder.as_str(), "-pix_fmt", "yuv420p"])
            .arg("-crf")
            .arg(settings.crf.to_string())
            .args(["-movflags", "+faststart", "-f", "mp4"])
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| setup_failed(format!("Failed to spawn FFmpeg process: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| setup_failed("ffmpeg stdin unavailable".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| setup_failed("ffmpeg stderr unavailable".to_string()))?;

        let capacity = settings.pool_capacity.max(1);
        let (tx, rx) = bounded(capacity);

        let feeder = std::thread::Builder::new()
            .name("videofx-encode-feed".to_string())
            .spawn(move || feed(stdin, rx))
            .map_err(|e| setup_failed(format!("Failed to start feeder thread: {}", e)))?;

        let stderr = std::thread::Builder::new()
            .name("videofx-encode-log".to_string())
            .spawn(move || {
                let mut log = String::new();
                let _ = stderr.read_to_string(&mut log);
                log
            })
            .map_err(|e| setup_failed(format!("Failed to start log thread: {}", e)))?;

        info!(
            "Encoding {}x{} @ {:.2}fps with {} (crf {}) to {}",
            settings.width,
            settings.height,
            settings.frame_rate,
            settings.encoder,
            settings.crf,
            output.display()
        );

        Ok(Self {
            output: output.to_path_buf(),
            frame_rate: settings.frame_rate,
            pool: PixelBufferPool::new(settings.pixel_format, settings.width, settings.height, capacity),
            child,
            frames: Some(tx),
            feeder: Some(feeder),
            stderr: Some(stderr),
            session_start: None,
            next_index: 0,
            last_time: None,
            done: false,
        })
    }

    fn join_threads(&mut self) -> (std::result::Result<u64, String>, String) {
        let fed = match self.feeder.take().map(JoinHandle::join) {
            Some(Ok(result)) => result,
            Some(Err(_)) => Err("feeder thread panicked".to_string()),
            None => Ok(0),
        };
        let log = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        (fed, log)
    }
}

fn feed(mut stdin: ChildStdin, frames: Receiver<FeedItem>) -> std::result::Result<u64, String> {
    let mut previous: Vec<u8> = Vec::new();
    let mut written = 0u64;

    for item in frames {
        let current = item.buffer.as_bytes();
        let fill: &[u8] = if previous.is_empty() { current } else { &previous };
        for _ in 0..item.gap {
            stdin.write_all(fill).map_err(|e| e.to_string())?;
            written += 1;
        }
        stdin.write_all(current).map_err(|e| e.to_string())?;
        written += 1;

        previous.clear();
        previous.extend_from_slice(current);
    }

    stdin.flush().map_err(|e| e.to_string())?;
    Ok(written)
}

impl VideoWriter for FfmpegWriter {
    fn output(&self) -> &Path {
        &self.output
    }

    fn pixel_buffer_pool(&self) -> &PixelBufferPool {
        &self.pool
    }

    fn start_session(&mut self, at: MediaTime) -> Result<()> {
        self.session_start = Some(at);
        self.next_index = 0;
        self.last_time = None;
        Ok(())
    }

    fn append(&mut self, buffer: PixelBuffer, at: MediaTime) -> Result<()> {
        check_buffer(&self.pool, &buffer)?;
        check_monotonic(self.last_time, at)?;
        let start = self.session_start.ok_or_else(|| ExportError::AppendFailed {
            reason: "writing session not started".to_string(),
        })?;

        let index = frame_index_at((at.seconds() - start.seconds()).max(0.0), self.frame_rate);
        self.last_time = Some(at);
        if index < self.next_index {
            debug!("Output slot {} already written, skipping frame at {}", index, at);
            return Ok(());
        }

        let gap = (index - self.next_index) as u64;
        if gap > 0 {
            debug!("Repeating previous frame {} times before {}", gap, at);
        }

        let frames = self.frames.as_ref().ok_or_else(|| ExportError::AppendFailed {
            reason: "input already marked finished".to_string(),
        })?;
        frames
            .send(FeedItem { buffer, gap })
            .map_err(|_| ExportError::AppendFailed {
                reason: "encoder stopped accepting frames".to_string(),
            })?;

        self.next_index = index + 1;
        Ok(())
    }

    fn mark_input_finished(&mut self) {
        self.frames = None;
    }

    fn finish_writing(&mut self) -> Result<()> {
        self.mark_input_finished();
        let (fed, log) = self.join_threads();
        let status = self.child.wait().map_err(|e| ExportError::FinalizeFailed {
            reason: format!("Failed to wait for ffmpeg: {}", e),
        })?;
        self.done = true;

        let frames = fed.map_err(|e| ExportError::FinalizeFailed {
            reason: format!("Feeding ffmpeg failed: {} {}", e, log.trim()),
        })?;
        if !status.success() {
            return Err(ExportError::FinalizeFailed {
                reason: format!("FFmpeg failed: {}", log.trim()),
            }
            .into());
        }

        info!("Wrote {} frames to {}", frames, self.output.display());
        Ok(())
    }

    fn cancel_writing(&mut self) {
        if self.done {
            return;
        }
        self.mark_input_finished();
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.join_threads();
        self.done = true;
        remove_partial(&self.output);
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        self.cancel_writing();
    }
}

/// What a [`RecordingWriterFactory`] saw
#[derive(Debug, Clone, Default)]
pub struct Recording {
    pub output: Option<PathBuf>,
    pub settings: Option<WriterSettings>,
    pub session_start: Option<MediaTime>,
    /// Presentation time of every appended frame, in order
    pub timestamps: Vec<MediaTime>,
    /// First BGRA pixel of every appended frame
    pub first_pixels: Vec<[u8; 4]>,
    pub input_finished: bool,
    pub finished: bool,
    pub cancelled: bool,
}

/// In-memory writer that records appends and writes a text manifest
#[derive(Debug, Clone)]
pub struct RecordingWriterFactory {
    recording: Arc<Mutex<Recording>>,
    reject: Option<String>,
    fail_finalize: bool,
}

impl RecordingWriterFactory {
    pub fn new() -> Self {
        Self {
            recording: Arc::new(Mutex::new(Recording::default())),
            reject: None,
            fail_finalize: false,
        }
    }

    /// Refuse every setting with `reason`
    pub fn rejecting<S: Into<String>>(mut self, reason: S) -> Self {
        self.reject = Some(reason.into());
        self
    }

    /// Fail at `finish_writing`
    pub fn failing_finalize(mut self) -> Self {
        self.fail_finalize = true;
        self
    }

    pub fn recording(&self) -> Recording {
        self.recording.lock().clone()
    }
}

impl Default for RecordingWriterFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl WriterFactory for RecordingWriterFactory {
    fn can_apply(&self, settings: &WriterSettings) -> Result<()> {
        settings.validate()?;
        match &self.reject {
            Some(reason) => Err(ExportError::UnsupportedSettings {
                details: reason.clone(),
            }
            .into()),
            None => Ok(()),
        }
    }

    fn create(&self, output: &Path, settings: &WriterSettings) -> Result<Box<dyn VideoWriter>> {
        std::fs::File::create(output).map_err(|e| ExportError::WriterSetup {
            reason: format!("Cannot create {}: {}", output.display(), e),
        })?;

        {
            let mut recording = self.recording.lock();
            *recording = Recording::default();
            recording.output = Some(output.to_path_buf());
            recording.settings = Some(settings.clone());
        }

        Ok(Box::new(RecordingWriter {
            output: output.to_path_buf(),
            pool: PixelBufferPool::new(
                settings.pixel_format,
                settings.width,
                settings.height,
                settings.pool_capacity,
            ),
            recording: Arc::clone(&self.recording),
            fail_finalize: self.fail_finalize,
            last_time: None,
        }))
    }
}

struct RecordingWriter {
    output: PathBuf,
    pool: PixelBufferPool,
    recording: Arc<Mutex<Recording>>,
    fail_finalize: bool,
    last_time: Option<MediaTime>,
}

impl VideoWriter for RecordingWriter {
    fn output(&self) -> &Path {
        &self.output
    }

    fn pixel_buffer_pool(&self) -> &PixelBufferPool {
        &self.pool
    }

    fn start_session(&mut self, at: MediaTime) -> Result<()> {
        self.recording.lock().session_start = Some(at);
        Ok(())
    }

    fn append(&mut self, buffer: PixelBuffer, at: MediaTime) -> Result<()> {
        check_buffer(&self.pool, &buffer)?;
        check_monotonic(self.last_time, at)?;
        self.last_time = Some(at);

        let bytes = buffer.as_bytes();
        let mut first = [0u8; 4];
        if bytes.len() >= 4 {
            first.copy_from_slice(&bytes[..4]);
        }

        let mut recording = self.recording.lock();
        recording.timestamps.push(at);
        recording.first_pixels.push(first);
        Ok(())
    }

    fn mark_input_finished(&mut self) {
        self.recording.lock().input_finished = true;
    }

    fn finish_writing(&mut self) -> Result<()> {
        if self.fail_finalize {
            return Err(ExportError::FinalizeFailed {
                reason: "recording writer configured to fail".to_string(),
            }
            .into());
        }

        let manifest = {
            let mut recording = self.recording.lock();
            recording.finished = true;
            let mut manifest = format!("frames {}\n", recording.timestamps.len());
            for time in &recording.timestamps {
                let _ = writeln!(manifest, "{}", time);
            }
            manifest
        };

        std::fs::write(&self.output, manifest).map_err(|e| ExportError::FinalizeFailed {
            reason: format!("Cannot write {}: {}", self.output.display(), e),
        })?;
        Ok(())
    }

    fn cancel_writing(&mut self) {
        self.recording.lock().cancelled = true;
        remove_partial(&self.output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn settings(width: u32, height: u32) -> WriterSettings {
        WriterSettings {
            codec: VideoCodec::H264,
            container: Container::Mp4,
            pixel_format: PixelFormat::Bgra32,
            width,
            height,
            frame_rate: 30.0,
            encoder: "libx264".to_string(),
            crf: 18,
            pool_capacity: 2,
        }
    }

    #[test]
    fn test_settings_validation() {
        assert!(settings(64, 36).validate().is_ok());
        assert!(settings(0, 36).validate().is_err());

        let mut bad_rate = settings(64, 36);
        bad_rate.frame_rate = 0.0;
        assert!(bad_rate.validate().is_err());
    }

    #[test]
    fn test_odd_sizes_are_padded_to_even() {
        assert_eq!(settings(64, 36).encoded_size(), (64, 36));
        assert_eq!(settings(1079, 1919).encoded_size(), (1080, 1920));
        assert_eq!(settings(1, 2).encoded_size(), (2, 2));
    }

    #[test]
    fn test_recording_writer_records_appends() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.mp4");
        let factory = RecordingWriterFactory::new();

        let mut writer = factory.create(&output, &settings(2, 2)).unwrap();
        writer.start_session(MediaTime::ZERO).unwrap();

        let mut buffer = writer.pixel_buffer_pool().borrow();
        buffer.as_bytes_mut()[..4].copy_from_slice(&[9, 8, 7, 255]);
        writer.append(buffer, MediaTime::from_seconds(0.5, 600)).unwrap();

        writer.mark_input_finished();
        writer.finish_writing().unwrap();

        let recording = factory.recording();
        assert_eq!(recording.timestamps, vec![MediaTime::from_seconds(0.5, 600)]);
        assert_eq!(recording.first_pixels, vec![[9, 8, 7, 255]]);
        assert!(recording.finished);
        assert!(std::fs::read_to_string(&output).unwrap().starts_with("frames 1"));
    }

    #[test]
    fn test_backwards_timestamp_rejected() {
        let dir = tempdir().unwrap();
        let factory = RecordingWriterFactory::new();
        let mut writer = factory.create(&dir.path().join("out.mp4"), &settings(1, 1)).unwrap();
        writer.start_session(MediaTime::ZERO).unwrap();

        let pool = writer.pixel_buffer_pool().clone();
        writer.append(pool.borrow(), MediaTime::new(600, 600)).unwrap();
        // Equal timestamps are allowed, earlier ones are not
        writer.append(pool.borrow(), MediaTime::new(600, 600)).unwrap();
        let err = writer.append(pool.borrow(), MediaTime::new(300, 600)).unwrap_err();
        assert!(matches!(
            err,
            crate::error::VideoFxError::Export(ExportError::NonMonotonicTimestamp { .. })
        ));
    }

    #[test]
    fn test_foreign_buffer_rejected() {
        let dir = tempdir().unwrap();
        let factory = RecordingWriterFactory::new();
        let mut writer = factory.create(&dir.path().join("out.mp4"), &settings(4, 4)).unwrap();
        writer.start_session(MediaTime::ZERO).unwrap();

        let other = PixelBufferPool::new(PixelFormat::Bgra32, 2, 2, 1);
        assert!(writer.append(other.borrow(), MediaTime::ZERO).is_err());
    }

    #[test]
    fn test_cancel_removes_output() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("partial.mp4");
        let factory = RecordingWriterFactory::new();

        let mut writer = factory.create(&output, &settings(1, 1)).unwrap();
        assert!(output.exists());
        writer.cancel_writing();

        assert!(!output.exists());
        assert!(factory.recording().cancelled);
    }

    #[test]
    fn test_rejecting_factory() {
        let factory = RecordingWriterFactory::new().rejecting("no encoder");
        assert!(matches!(
            factory.can_apply(&settings(8, 8)),
            Err(crate::error::VideoFxError::Export(ExportError::UnsupportedSettings { .. }))
        ));
    }
}
