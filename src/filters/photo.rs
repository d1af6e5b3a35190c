//! Photo-effect presets: a colour matrix followed by a tone curve.

use rayon::prelude::*;

use crate::{
    error::Result,
    filters::traits::{Filter, FilterConfig, FilterMetadata},
    video::types::Image,
};

pub const CONTRAST: &str = "contrast";
pub const LIFT: &str = "lift";

const LUMA: [f32; 3] = [0.2126, 0.7152, 0.0722];

/// 3x3 colour matrix with per-channel offset, on 0..1 values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorMatrix {
    pub m: [[f32; 3]; 3],
    pub offset: [f32; 3],
}

impl ColorMatrix {
    pub const IDENTITY: ColorMatrix = ColorMatrix {
        m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        offset: [0.0; 3],
    };

    /// Saturation scaling around Rec. 709 luma; 0.0 is grayscale
    pub fn saturation(s: f32) -> Self {
        let mut m = [[0.0; 3]; 3];
        for (row, out) in m.iter_mut().enumerate() {
            for (col, value) in out.iter_mut().enumerate() {
                let identity = if row == col { 1.0 } else { 0.0 };
                *value = LUMA[col] * (1.0 - s) + identity * s;
            }
        }
        Self { m, offset: [0.0; 3] }
    }

    /// Follow this matrix with per-channel gain and offset
    pub fn then_gain(mut self, gain: [f32; 3], offset: [f32; 3]) -> Self {
        for channel in 0..3 {
            for col in 0..3 {
                self.m[channel][col] *= gain[channel];
            }
            self.offset[channel] = self.offset[channel] * gain[channel] + offset[channel];
        }
        self
    }

    fn apply(&self, rgb: [f32; 3]) -> [f32; 3] {
        let mut out = [0.0; 3];
        for (channel, value) in out.iter_mut().enumerate() {
            let row = &self.m[channel];
            *value = row[0] * rgb[0] + row[1] * rgb[1] + row[2] * rgb[2] + self.offset[channel];
        }
        out
    }
}

/// Contrast around mid-grey, then a black-level lift
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneCurve {
    pub contrast: f32,
    pub lift: f32,
}

impl ToneCurve {
    pub const NEUTRAL: ToneCurve = ToneCurve { contrast: 1.0, lift: 0.0 };

    fn apply(&self, v: f32) -> f32 {
        let v = (v - 0.5) * self.contrast + 0.5;
        (self.lift + v * (1.0 - self.lift)).clamp(0.0, 1.0)
    }
}

/// A named colour-matrix + tone-curve effect
#[derive(Debug, Clone)]
pub struct PhotoEffect {
    name: &'static str,
    description: &'static str,
    matrix: ColorMatrix,
    curve: ToneCurve,
    intensity: f32,
}

impl PhotoEffect {
    pub fn new(name: &'static str, description: &'static str, matrix: ColorMatrix, curve: ToneCurve) -> Self {
        Self {
            name,
            description,
            matrix,
            curve,
            intensity: 1.0,
        }
    }

    /// Apply intensity and curve overrides from a filter config
    pub fn configured(mut self, config: &FilterConfig) -> Self {
        self.intensity = config.intensity.clamp(0.0, 1.0);
        self.curve.contrast = config.get_f32_or(CONTRAST, self.curve.contrast).max(0.0);
        self.curve.lift = config.get_f32_or(LIFT, self.curve.lift).clamp(0.0, 1.0);
        self
    }

    pub fn chrome() -> Self {
        Self::new(
            "chrome",
            "Punchy colour with extra saturation and contrast",
            ColorMatrix::saturation(1.3),
            ToneCurve { contrast: 1.1, lift: 0.0 },
        )
    }

    pub fn fade() -> Self {
        Self::new(
            "fade",
            "Washed-out colour with lifted blacks",
            ColorMatrix::saturation(0.65),
            ToneCurve { contrast: 0.85, lift: 0.1 },
        )
    }

    pub fn instant() -> Self {
        Self::new(
            "instant",
            "Warm, slightly faded instant-camera look",
            ColorMatrix::saturation(0.85).then_gain([1.05, 1.0, 0.88], [0.03, 0.02, 0.0]),
            ToneCurve { contrast: 0.95, lift: 0.05 },
        )
    }

    pub fn mono() -> Self {
        Self::new(
            "mono",
            "Neutral black and white",
            ColorMatrix::saturation(0.0),
            ToneCurve::NEUTRAL,
        )
    }

    pub fn noir() -> Self {
        Self::new(
            "noir",
            "High-contrast black and white",
            ColorMatrix::saturation(0.0),
            ToneCurve { contrast: 1.45, lift: 0.0 },
        )
    }

    pub fn process() -> Self {
        Self::new(
            "process",
            "Cool cross-processed colour",
            ColorMatrix::saturation(0.9).then_gain([0.95, 1.0, 1.08], [0.0, 0.01, 0.04]),
            ToneCurve { contrast: 1.15, lift: 0.0 },
        )
    }

    pub fn tonal() -> Self {
        Self::new(
            "tonal",
            "Soft black and white with gentle tones",
            ColorMatrix::saturation(0.0),
            ToneCurve { contrast: 0.85, lift: 0.04 },
        )
    }

    pub fn transfer() -> Self {
        Self::new(
            "transfer",
            "Warm vintage print transfer",
            ColorMatrix::saturation(0.9).then_gain([1.08, 1.02, 0.85], [0.02, 0.0, 0.0]),
            ToneCurve { contrast: 1.05, lift: 0.02 },
        )
    }

    fn map_pixel(&self, pixel: &mut [u8]) {
        let rgb = [
            pixel[0] as f32 / 255.0,
            pixel[1] as f32 / 255.0,
            pixel[2] as f32 / 255.0,
        ];
        let graded = self.matrix.apply(rgb);
        for channel in 0..3 {
            let target = self.curve.apply(graded[channel]);
            let mixed = rgb[channel] + (target - rgb[channel]) * self.intensity;
            pixel[channel] = (mixed.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
    }
}

impl Filter for PhotoEffect {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn output_image(&self, mut input: Image) -> Result<Image> {
        if self.intensity > 0.0 {
            let raw: &mut [u8] = input.as_image_mut();
            raw.par_chunks_mut(4).for_each(|pixel| self.map_pixel(pixel));
        }
        Ok(input)
    }

    fn metadata(&self) -> FilterMetadata {
        FilterMetadata {
            performance_impact: 0.2,
            preserves_extent: true,
            optional_parameters: vec![
                (CONTRAST.to_string(), "Contrast around mid-grey (1.0 = unchanged)".to_string()),
                (LIFT.to_string(), "Black level lift (0.0-1.0)".to_string()),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(effect: PhotoEffect, color: [u8; 4]) -> [u8; 4] {
        effect
            .output_image(Image::new_filled(3, 2, color))
            .unwrap()
            .get_pixel(2, 1)
    }

    #[test]
    fn test_mono_is_gray() {
        let [r, g, b, a] = apply(PhotoEffect::mono(), [200, 40, 90, 255]);
        assert_eq!(r, g);
        assert_eq!(g, b);
        assert_eq!(a, 255);
    }

    #[test]
    fn test_noir_pushes_contrast() {
        let mono = apply(PhotoEffect::mono(), [200, 200, 200, 255])[0];
        let noir = apply(PhotoEffect::noir(), [200, 200, 200, 255])[0];
        assert!(noir > mono);
    }

    #[test]
    fn test_fade_lifts_blacks() {
        let [r, g, b, _] = apply(PhotoEffect::fade(), [0, 0, 0, 255]);
        assert!(r > 0 && g > 0 && b > 0);
    }

    #[test]
    fn test_zero_intensity_is_identity() {
        let effect = PhotoEffect::chrome().configured(&FilterConfig::named("chrome", 0.0));
        assert_eq!(apply(effect, [12, 34, 56, 78]), [12, 34, 56, 78]);
    }

    #[test]
    fn test_saturation_one_is_identity_matrix() {
        let m = ColorMatrix::saturation(1.0);
        for row in 0..3 {
            for col in 0..3 {
                let expected = ColorMatrix::IDENTITY.m[row][col];
                assert!((m.m[row][col] - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_contrast_override() {
        let flat = PhotoEffect::noir().configured(&FilterConfig::named("noir", 1.0).set(CONTRAST, 0.0f32));
        // Zero contrast collapses everything to mid-grey
        assert_eq!(apply(flat, [250, 10, 10, 255])[0], 128);
    }
}
