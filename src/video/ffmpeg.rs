//! Asset loading and decoding through the `ffprobe` / `ffmpeg` command line tools.
//!
//! Frames are streamed as raw RGBA over a pipe. A reader thread pulls whole
//! frames off the pipe into a bounded channel, so a decoder that falls behind
//! shows up as "no frame yet" instead of blocking the caller.
//!
//! Orientation: `TrackInfo::preferred_transform` is expressed in top-left
//! origin image space and maps the display orientation back onto the encoded
//! raster. Its inverse uprights decoded frames.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Result, SourceError};
use crate::video::asset::{AssetLoader, FrameDecoder, MediaAsset};
use crate::video::geometry::AffineTransform;
use crate::video::time::{frame_index_at, frame_time, MediaTime, DEFAULT_TIMESCALE};
use crate::video::types::{DecodedFrame, Image, TrackInfo};

/// Frames a decoder may run ahead of the consumer
const DEFAULT_QUEUE_DEPTH: usize = 8;

/// How long a frame request waits on the reader before reporting a stall
const DEFAULT_FRAME_WAIT: Duration = Duration::from_millis(20);

/// Requests further ahead than this are served by restarting the decoder
const MAX_FORWARD_SKIP_SECONDS: f64 = 2.0;

/// Loader backed by the FFmpeg command line tools
#[derive(Debug, Clone)]
pub struct FfmpegLoader {
    ffprobe: PathBuf,
    ffmpeg: PathBuf,
    queue_depth: usize,
    frame_wait: Duration,
}

impl FfmpegLoader {
    /// Create a loader using `ffprobe` and `ffmpeg` from `PATH`
    pub fn new() -> Result<Self> {
        let loader = Self {
            ffprobe: PathBuf::from("ffprobe"),
            ffmpeg: PathBuf::from("ffmpeg"),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            frame_wait: DEFAULT_FRAME_WAIT,
        };

        if !Self::tool_available(&loader.ffprobe) || !Self::tool_available(&loader.ffmpeg) {
            return Err(SourceError::DecodeFailed {
                reason: "ffmpeg/ffprobe not found. Please install FFmpeg.".to_string(),
            }
            .into());
        }

        info!("Initialized FFmpeg asset loader");
        Ok(loader)
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    pub fn with_frame_wait(mut self, wait: Duration) -> Self {
        self.frame_wait = wait;
        self
    }

    fn tool_available(tool: &Path) -> bool {
        Command::new(tool)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn probe(&self, locator: &Path) -> Result<ProbeOutput> {
        let unavailable = || SourceError::AssetUnavailable {
            locator: locator.display().to_string(),
        };

        if !locator.exists() {
            return Err(unavailable().into());
        }

        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(locator)
            .output()
            .map_err(|e| SourceError::ProbeFailed {
                locator: locator.display().to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            warn!("ffprobe rejected {}", locator.display());
            return Err(unavailable().into());
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            SourceError::ProbeFailed {
                locator: locator.display().to_string(),
                reason: format!("invalid ffprobe output: {}", e),
            }
            .into()
        })
    }
}

impl AssetLoader for FfmpegLoader {
    fn load(&self, locator: &Path) -> Result<Box<dyn MediaAsset>> {
        let probe = self.probe(locator)?;

        let tracks: Vec<TrackInfo> = probe
            .streams
            .iter()
            .filter(|s| s.codec_type.as_deref() == Some("video"))
            .filter_map(|s| s.track_info())
            .collect();

        let duration = probe
            .format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .or_else(|| probe.streams.iter().find_map(|s| s.duration.as_deref()))
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);

        debug!(
            "Probed {}: {:.2}s, {} video track(s)",
            locator.display(),
            duration,
            tracks.len()
        );

        Ok(Box::new(FfmpegAsset {
            path: locator.to_path_buf(),
            ffmpeg: self.ffmpeg.clone(),
            duration: MediaTime::from_seconds(duration, DEFAULT_TIMESCALE),
            tracks,
            queue_depth: self.queue_depth,
            frame_wait: self.frame_wait,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    index: usize,
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    side_data_list: Vec<serde_json::Value>,
}

impl ProbeStream {
    fn track_info(&self) -> Option<TrackInfo> {
        let (width, height) = (self.width?, self.height?);
        if width == 0 || height == 0 {
            return None;
        }

        let fps = [&self.avg_frame_rate, &self.r_frame_rate]
            .into_iter()
            .flatten()
            .find_map(|rate| parse_rate(rate))?;

        Some(TrackInfo {
            index: self.index,
            nominal_frame_rate: fps,
            natural_size: (width, height),
            preferred_transform: AffineTransform::rotation(-self.display_rotation()),
        })
    }

    /// Clockwise rotation, in degrees, needed to show the stream upright
    fn display_rotation(&self) -> f64 {
        // Display matrix side data reports counter-clockwise degrees
        let from_side_data = self
            .side_data_list
            .iter()
            .find_map(|entry| entry.get("rotation").and_then(|r| r.as_f64()))
            .map(|ccw| -ccw);

        from_side_data
            .or_else(|| self.tags.get("rotate").and_then(|r| r.parse::<f64>().ok()))
            .unwrap_or(0.0)
    }
}

/// Parse an ffprobe rate such as "30000/1001"
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

struct FfmpegAsset {
    path: PathBuf,
    ffmpeg: PathBuf,
    duration: MediaTime,
    tracks: Vec<TrackInfo>,
    queue_depth: usize,
    frame_wait: Duration,
}

impl MediaAsset for FfmpegAsset {
    fn duration(&self) -> MediaTime {
        self.duration
    }

    fn video_tracks(&self) -> Vec<TrackInfo> {
        self.tracks.clone()
    }

    fn open_decoder(&self, track: &TrackInfo) -> Result<Box<dyn FrameDecoder>> {
        let mut decoder = FfmpegDecoder {
            path: self.path.clone(),
            ffmpeg: self.ffmpeg.clone(),
            stream_index: track.index,
            size: track.natural_size,
            fps: track.nominal_frame_rate,
            last_index: frame_index_at(self.duration.seconds(), track.nominal_frame_rate).max(1) - 1,
            queue_depth: self.queue_depth,
            frame_wait: self.frame_wait,
            reader: None,
            current: None,
            next_index: 0,
        };
        decoder.restart(0)?;
        Ok(Box::new(decoder))
    }
}

struct FrameReader {
    child: Child,
    frames: Receiver<Vec<u8>>,
    thread: Option<JoinHandle<()>>,
}

impl FrameReader {
    fn stop(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        // Unblocks the reader thread if it is waiting on a full channel
        drop(self.frames);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct FfmpegDecoder {
    path: PathBuf,
    ffmpeg: PathBuf,
    stream_index: usize,
    size: (u32, u32),
    fps: f64,
    last_index: i64,
    queue_depth: usize,
    frame_wait: Duration,
    reader: Option<FrameReader>,
    current: Option<(i64, DecodedFrame)>,
    next_index: i64,
}

impl FfmpegDecoder {
    /// Restart the ffmpeg process so that its first frame is `index`
    fn restart(&mut self, index: i64) -> Result<()> {
        if let Some(reader) = self.reader.take() {
            reader.stop();
        }

        let index = index.clamp(0, self.last_index.max(0));
        let start = index as f64 / self.fps;
        debug!("Starting ffmpeg decode of {} at {:.3}s", self.path.display(), start);

        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-nostdin", "-noautorotate"])
            .args(["-ss", &format!("{:.6}", start)])
            .arg("-i")
            .arg(&self.path)
            .args(["-map", &format!("0:{}", self.stream_index)])
            .args(["-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SourceError::DecodeFailed {
                reason: format!("Failed to spawn ffmpeg: {}", e),
            })?;

        let mut stdout = child.stdout.take().ok_or_else(|| SourceError::DecodeFailed {
            reason: "ffmpeg stdout unavailable".to_string(),
        })?;

        let frame_len = self.size.0 as usize * self.size.1 as usize * 4;
        let (tx, rx) = bounded(self.queue_depth);
        let thread = std::thread::Builder::new()
            .name("ffmpeg-frame-reader".to_string())
            .spawn(move || loop {
                let mut frame = vec![0u8; frame_len];
                if stdout.read_exact(&mut frame).is_err() {
                    break;
                }
                if tx.send(frame).is_err() {
                    break;
                }
            })?;

        self.reader = Some(FrameReader {
            child,
            frames: rx,
            thread: Some(thread),
        });
        self.current = None;
        self.next_index = index;
        Ok(())
    }

    fn needs_restart(&self, target: i64) -> bool {
        if self.reader.is_none() {
            return true;
        }
        let max_skip = (MAX_FORWARD_SKIP_SECONDS * self.fps).ceil() as i64;
        let behind = match &self.current {
            Some((index, _)) => target < *index,
            None => target < self.next_index,
        };
        behind || target > self.next_index + max_skip
    }

    fn current_if(&self, target: i64) -> Option<DecodedFrame> {
        match &self.current {
            Some((index, frame)) if *index == target => Some(frame.clone()),
            _ => None,
        }
    }
}

impl FrameDecoder for FfmpegDecoder {
    fn frame_at(&mut self, time: MediaTime) -> Result<Option<DecodedFrame>> {
        let target = frame_index_at(time.seconds(), self.fps).min(self.last_index);

        if let Some(frame) = self.current_if(target) {
            return Ok(Some(frame));
        }
        if self.needs_restart(target) {
            self.restart(target)?;
        }

        let Some(reader) = self.reader.as_ref() else {
            return Ok(None);
        };

        while self.next_index <= target {
            match reader.frames.recv_timeout(self.frame_wait) {
                Ok(bytes) => {
                    let index = self.next_index;
                    self.next_index += 1;
                    let image = Image::from_rgba_bytes(self.size.0, self.size.1, bytes)
                        .ok_or_else(|| SourceError::DecodeFailed {
                            reason: "short frame from ffmpeg".to_string(),
                        })?;
                    self.current = Some((
                        index,
                        DecodedFrame {
                            image,
                            presentation_time: frame_time(index, self.fps, time.timescale),
                        },
                    ));
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    // End of stream: keep showing the last decoded frame
                    return Ok(self.current.as_ref().map(|(_, frame)| frame.clone()));
                }
            }
        }

        Ok(self.current_if(target))
    }

    fn seek(&mut self, time: MediaTime) -> Result<()> {
        let target = frame_index_at(time.seconds(), self.fps).min(self.last_index);
        if self.current_if(target).is_some() || target == self.next_index {
            return Ok(());
        }
        self.restart(target)
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.stop();
        }
    }
}
