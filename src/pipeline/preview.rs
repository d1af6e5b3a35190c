//! Clock-driven preview.
//!
//! Ticked from the display refresh on the main context. Each tick maps host
//! time to media time, pulls a frame if a new one is ready, filters it and
//! posts it along with the playback position. Reaching the end pauses.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::filters::Filter;
use crate::pipeline::events::{EngineEvent, EventSender};
use crate::pipeline::stage::FilterStage;
use crate::video::source::FrameSource;
use crate::video::time::MediaTime;
use crate::video::types::DecodedFrame;

pub struct PreviewLoop {
    paused: bool,
    position: f64,
    /// Last decoded frame, kept so a filter change can re-render it
    last_frame: Option<DecodedFrame>,
    /// A seek whose frame was not decoded yet; retried on later ticks
    pending_seek: Option<MediaTime>,
    stage: Arc<FilterStage>,
    events: EventSender,
}

impl PreviewLoop {
    pub fn new(stage: Arc<FilterStage>, events: EventSender) -> Self {
        Self {
            paused: true,
            position: 0.0,
            last_frame: None,
            pending_seek: None,
            stage,
            events,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Normalized playback position in [0, 1]
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Forget everything about the previous asset
    pub fn reset(&mut self) {
        self.paused = true;
        self.position = 0.0;
        self.last_frame = None;
        self.pending_seek = None;
    }

    /// Start clock-driven playback. At the end of the asset, restarts from zero.
    pub fn play(&mut self, source: &mut FrameSource, host: f64) {
        if !self.paused {
            return;
        }
        if self.position >= 1.0 {
            source.seek(MediaTime::ZERO);
            self.position = 0.0;
        }
        self.pending_seek = None;
        source.play(host);
        self.set_paused(false);
    }

    pub fn pause(&mut self, source: &mut FrameSource, host: f64) {
        if self.paused {
            return;
        }
        source.pause(host);
        self.set_paused(true);
    }

    /// One display refresh
    pub fn tick(&mut self, source: &mut FrameSource, filter: &dyn Filter, host: f64) {
        if self.paused {
            if let Some(at) = self.pending_seek {
                if let Some(frame) = source.fetch(at) {
                    self.pending_seek = None;
                    self.render(source, filter, frame);
                }
            }
            return;
        }

        let at = source.current_time_at(host);
        let reopens = source.reopen_count();
        match source.fetch(at) {
            Some(frame) => self.render(source, filter, frame),
            None => {
                // Stall accounting happens inside the source
                if source.reopen_count() != reopens {
                    self.events.send(EngineEvent::SourceReopened {
                        reopen_count: source.reopen_count(),
                    });
                }
            }
        }

        self.position = source.normalized_time(at);
        self.events.send(EngineEvent::PositionUpdated(self.position));

        if self.position >= 1.0 {
            debug!("Reached end of media at {}", at);
            self.pause(source, host);
        }
    }

    /// Jump to a normalized position and show the frame there
    pub fn seek(&mut self, source: &mut FrameSource, filter: &dyn Filter, fraction: f64) {
        source.seek_normalized(fraction);
        let at = source.current_time();
        self.position = source.normalized_time(at);

        match source.fetch(at) {
            Some(frame) => {
                self.pending_seek = None;
                self.render(source, filter, frame);
            }
            None if self.paused => self.pending_seek = Some(at),
            None => {}
        }
        self.events.send(EngineEvent::PositionUpdated(self.position));
    }

    /// Re-filter the last decoded frame, e.g. after the filter changed
    pub fn refresh(&mut self, source: &FrameSource, filter: &dyn Filter) {
        if let Some(frame) = self.last_frame.clone() {
            self.emit(source, filter, frame);
        }
    }

    fn render(&mut self, source: &FrameSource, filter: &dyn Filter, frame: DecodedFrame) {
        self.last_frame = Some(frame.clone());
        self.emit(source, filter, frame);
    }

    fn emit(&self, source: &FrameSource, filter: &dyn Filter, frame: DecodedFrame) {
        match self.stage.apply(frame, source.session().transform(), filter) {
            Ok(filtered) => self.events.send(EngineEvent::FrameRendered {
                image: Arc::new(filtered.image),
                presentation_time: filtered.presentation_time,
            }),
            Err(e) => warn!("Dropping preview frame, {} failed: {}", filter.name(), e),
        }
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        self.events.send(EngineEvent::PlaybackChanged { paused });
    }
}
