use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;

use crate::video::geometry::{AffineTransform, Rect};
use crate::video::time::MediaTime;

/// An RGBA image placed at an origin in image space
///
/// The pixel grid always starts at the extent origin. Transforms that only
/// translate move the origin; anything else resamples the pixels into the
/// transformed bounding box.
#[derive(Clone, Debug)]
pub struct Image {
    buffer: RgbaImage,
    origin: (f64, f64),
}

impl Image {
    /// Create an image at the zero origin
    pub fn new(buffer: RgbaImage) -> Self {
        Self {
            buffer,
            origin: (0.0, 0.0),
        }
    }

    /// Create an image with the given dimensions filled with the specified color
    pub fn new_filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        Self::new(ImageBuffer::from_pixel(width, height, Rgba(color)))
    }

    /// Create an image from tightly packed RGBA bytes
    pub fn from_rgba_bytes(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        ImageBuffer::from_raw(width, height, data).map(Self::new)
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub fn origin(&self) -> (f64, f64) {
        self.origin
    }

    pub fn extent(&self) -> Rect {
        Rect::new(
            self.origin.0,
            self.origin.1,
            self.width() as f64,
            self.height() as f64,
        )
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.buffer.get_pixel(x, y).0
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 4]) {
        self.buffer.put_pixel(x, y, Rgba(color));
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.buffer
    }

    pub fn as_image_mut(&mut self) -> &mut RgbaImage {
        &mut self.buffer
    }

    pub fn into_buffer(self) -> RgbaImage {
        self.buffer
    }

    /// Move the extent without touching pixels
    pub fn translated(mut self, dx: f64, dy: f64) -> Self {
        self.origin = (self.origin.0 + dx, self.origin.1 + dy);
        self
    }

    /// Apply an affine transform to the image
    pub fn transformed(&self, transform: &AffineTransform) -> Self {
        if transform.is_translation_only() {
            return self.clone().translated(transform.tx, transform.ty);
        }

        let Some(inverse) = transform.inverted() else {
            // Degenerate transforms collapse the image to nothing
            return Self::new(RgbaImage::new(0, 0)).translated(transform.tx, transform.ty);
        };

        let bounds = transform.apply_to_rect(&self.extent());
        let width = bounds.width.round().max(0.0) as u32;
        let height = bounds.height.round().max(0.0) as u32;
        let mut output = RgbaImage::new(width, height);

        let src = &self.buffer;
        let (src_w, src_h) = (src.width() as f64, src.height() as f64);
        let (src_x, src_y) = self.origin;
        let row_len = width as usize * 4;

        if row_len > 0 {
            let raw: &mut [u8] = &mut output;
            raw.par_chunks_mut(row_len)
                .enumerate()
                .for_each(|(row, pixels)| {
                    let py = bounds.y + row as f64 + 0.5;
                    for col in 0..width as usize {
                        let px = bounds.x + col as f64 + 0.5;
                        let (sx, sy) = inverse.apply_to_point(px, py);
                        let (lx, ly) = ((sx - src_x).floor(), (sy - src_y).floor());
                        if lx < 0.0 || ly < 0.0 || lx >= src_w || ly >= src_h {
                            continue;
                        }
                        let pixel = src.get_pixel(lx as u32, ly as u32).0;
                        pixels[col * 4..col * 4 + 4].copy_from_slice(&pixel);
                    }
                });
        }

        Self {
            buffer: output,
            origin: (bounds.x, bounds.y),
        }
    }

    /// Render into a 32-bit BGRA buffer of `width` x `height`
    ///
    /// Pixels outside the image are left transparent black.
    pub fn write_bgra(&self, dest: &mut [u8], width: u32, height: u32) {
        let row_len = width as usize * 4;
        if row_len == 0 {
            return;
        }
        let src = &self.buffer;
        let copy_w = width.min(src.width()) as usize;

        dest.par_chunks_mut(row_len)
            .take(height as usize)
            .enumerate()
            .for_each(|(y, row)| {
                row.fill(0);
                if y as u32 >= src.height() {
                    return;
                }
                for x in 0..copy_w {
                    let [r, g, b, a] = src.get_pixel(x as u32, y as u32).0;
                    row[x * 4..x * 4 + 4].copy_from_slice(&[b, g, r, a]);
                }
            });
    }

    /// Save the image as a PNG file
    pub fn save_png<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), image::ImageError> {
        self.buffer.save(path)
    }
}

/// A decoded frame and the presentation time the decoder assigned to it
#[derive(Clone, Debug)]
pub struct DecodedFrame {
    pub image: Image,
    pub presentation_time: MediaTime,
}

/// A frame after transform normalization and filtering
#[derive(Clone, Debug)]
pub struct FilteredFrame {
    pub image: Image,
    pub presentation_time: MediaTime,
}

/// Properties of a video track needed to open a session
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    /// Index of the stream inside its container
    pub index: usize,

    /// Nominal frames per second
    pub nominal_frame_rate: f64,

    /// Encoded pixel dimensions (width, height)
    pub natural_size: (u32, u32),

    /// Orientation transform the track asks players to apply
    pub preferred_transform: AffineTransform,
}

impl TrackInfo {
    /// Dimensions after applying the preferred transform
    pub fn presentation_size(&self) -> (u32, u32) {
        let rect = Rect::new(
            0.0,
            0.0,
            self.natural_size.0 as f64,
            self.natural_size.1 as f64,
        );
        let shown = self.preferred_transform.apply_to_rect(&rect);
        (shown.width.round() as u32, shown.height.round() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Image {
        let buffer = ImageBuffer::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 0, 255]));
        Image::new(buffer)
    }

    #[test]
    fn test_translation_moves_origin_only() {
        let image = gradient(4, 3);
        let moved = image.transformed(&AffineTransform::translation(2.5, -1.0));
        assert_eq!(moved.origin(), (2.5, -1.0));
        assert_eq!(moved.get_pixel(3, 2), image.get_pixel(3, 2));
    }

    #[test]
    fn test_quarter_turn_swaps_dimensions() {
        let image = gradient(4, 2);
        let rotated = image.transformed(&AffineTransform::rotation(90.0));
        assert_eq!((rotated.width(), rotated.height()), (2, 4));
        assert_eq!(rotated.origin(), (-2.0, 0.0));
        // (x, y) -> (-y, x): source (3, 0) lands in the last row, right column
        assert_eq!(rotated.get_pixel(1, 3), image.get_pixel(3, 0));
        assert_eq!(rotated.get_pixel(0, 0), image.get_pixel(0, 1));
    }

    #[test]
    fn test_write_bgra_swizzles_channels() {
        let image = Image::new_filled(2, 2, [10, 20, 30, 255]);
        let mut dest = vec![0u8; 2 * 2 * 4];
        image.write_bgra(&mut dest, 2, 2);
        assert_eq!(&dest[0..4], &[30, 20, 10, 255]);
        assert_eq!(&dest[12..16], &[30, 20, 10, 255]);
    }

    #[test]
    fn test_write_bgra_zero_fills_outside_image() {
        let image = Image::new_filled(1, 1, [1, 2, 3, 4]);
        let mut dest = vec![9u8; 2 * 2 * 4];
        image.write_bgra(&mut dest, 2, 2);
        assert_eq!(&dest[0..4], &[3, 2, 1, 4]);
        assert!(dest[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_presentation_size_of_portrait_track() {
        let track = TrackInfo {
            index: 0,
            nominal_frame_rate: 30.0,
            natural_size: (1920, 1080),
            preferred_transform: AffineTransform::rotation(90.0),
        };
        assert_eq!(track.presentation_size(), (1080, 1920));
    }
}
