//! Consumers of the frame source: the filter stage they share, the
//! clock-driven preview, and the offline export with its writer, buffer
//! pool and hand-off.

pub mod events;
pub mod export;
pub mod handoff;
pub mod pool;
pub mod preview;
pub mod stage;
pub mod writer;

pub use events::{main_queue, Delivery, EngineEvent, EventSender, MainQueue};
pub use export::{ExportCancel, ExportJob, ExportPipeline, ExportReport, ExportState};
pub use handoff::{DirectoryHandOff, HandOff};
pub use pool::{PixelBuffer, PixelBufferPool, PixelFormat};
pub use preview::PreviewLoop;
pub use stage::FilterStage;
pub use writer::{
    FfmpegWriterFactory, RecordingWriterFactory, VideoWriter, WriterFactory, WriterSettings,
};
