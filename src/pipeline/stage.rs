use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::error::{Result, VideoFxError};
use crate::filters::Filter;
use crate::video::geometry::AffineTransform;
use crate::video::types::{DecodedFrame, FilteredFrame};

/// Orients decoded frames and runs them through a filter
///
/// Stateless between calls. Pixel work runs on a dedicated rayon pool so
/// export rendering does not compete with the global pool.
pub struct FilterStage {
    pool: ThreadPool,
}

impl FilterStage {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("videofx-render-{}", i))
            .build()
            .map_err(|e| VideoFxError::generic(format!("Failed to build render pool: {}", e)))?;

        debug!("Filter stage using {} render threads", pool.current_num_threads());
        Ok(Self { pool })
    }

    /// Transform `frame`, move its extent back to (0, 0) and filter it
    pub fn apply(
        &self,
        frame: DecodedFrame,
        transform: &AffineTransform,
        filter: &dyn Filter,
    ) -> Result<FilteredFrame> {
        let presentation_time = frame.presentation_time;

        let image = self.pool.install(|| {
            let oriented = frame.image.transformed(transform);
            let (x, y) = oriented.origin();
            let anchored = oriented.translated(-x, -y);
            filter.output_image(anchored)
        })?;

        Ok(FilteredFrame {
            image,
            presentation_time,
        })
    }
}
