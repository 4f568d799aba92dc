//! Contrast Limited Adaptive Histogram Equalization on CIELAB lightness
//!
//! Colour frames are converted to CIELAB, the lightness channel is quantised
//! to 8 bits (`L * 255 / 100`) and equalised tile by tile with a clipped
//! histogram, then the image is converted back. Chroma (`a`, `b`) is kept
//! in floating point so only lightness changes.

use std::time::Instant;

use tracing::trace;

use super::FrameTransform;
use crate::capture::{Frame, PixelFormat};
use crate::FilterConfig;

const BINS: usize = 256;

// D65 white point
const XN: f32 = 0.950_47;
const ZN: f32 = 1.088_83;

const DELTA: f32 = 6.0 / 29.0;

#[derive(Debug, Clone)]
pub struct ClaheFilter {
    enabled: bool,
    clip_limit: f32,
    tiles_x: usize,
    tiles_y: usize,
    /// sRGB byte to linear light
    linear: [f32; BINS],
}

impl ClaheFilter {
    pub fn new(clip_limit: f32, tiles_x: usize, tiles_y: usize) -> Self {
        let mut linear = [0.0; BINS];
        for (i, slot) in linear.iter_mut().enumerate() {
            *slot = srgb_to_linear(i as f32 / 255.0);
        }

        Self {
            enabled: true,
            clip_limit,
            tiles_x: tiles_x.max(1),
            tiles_y: tiles_y.max(1),
            linear,
        }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        let mut filter = Self::new(config.clip_limit, config.tiles_x, config.tiles_y);
        filter.enabled = config.enabled;
        filter
    }

    /// Equalise a single 8-bit channel in place.
    pub fn equalize(&self, channel: &mut [u8], width: usize, height: usize) {
        if width == 0 || height == 0 {
            return;
        }

        let tiles_x = self.tiles_x.min(width);
        let tiles_y = self.tiles_y.min(height);
        let luts = self.tile_luts(channel, width, height, tiles_x, tiles_y);

        let tile_w = width as f32 / tiles_x as f32;
        let tile_h = height as f32 / tiles_y as f32;

        for y in 0..height {
            let (ty0, ty1, wy) = neighbours(y, tile_h, tiles_y);
            for x in 0..width {
                let (tx0, tx1, wx) = neighbours(x, tile_w, tiles_x);
                let idx = y * width + x;
                let v = channel[idx] as usize;

                let top = lerp(
                    luts[ty0 * tiles_x + tx0][v],
                    luts[ty0 * tiles_x + tx1][v],
                    wx,
                );
                let bottom = lerp(
                    luts[ty1 * tiles_x + tx0][v],
                    luts[ty1 * tiles_x + tx1][v],
                    wx,
                );
                channel[idx] = lerp(top, bottom, wy).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    fn tile_luts(
        &self,
        channel: &[u8],
        width: usize,
        height: usize,
        tiles_x: usize,
        tiles_y: usize,
    ) -> Vec<[f32; BINS]> {
        let mut luts = Vec::with_capacity(tiles_x * tiles_y);

        for ty in 0..tiles_y {
            let (y0, y1) = (ty * height / tiles_y, (ty + 1) * height / tiles_y);
            for tx in 0..tiles_x {
                let (x0, x1) = (tx * width / tiles_x, (tx + 1) * width / tiles_x);

                let mut hist = [0u32; BINS];
                for row in channel[y0 * width..y1 * width].chunks_exact(width) {
                    for &v in &row[x0..x1] {
                        hist[v as usize] += 1;
                    }
                }

                let area = ((x1 - x0) * (y1 - y0)) as u32;
                if self.clip_limit > 0.0 {
                    let limit = ((self.clip_limit * area as f32 / BINS as f32) as u32).max(1);
                    clip_histogram(&mut hist, limit);
                }

                let scale = 255.0 / area.max(1) as f32;
                let mut lut = [0.0f32; BINS];
                let mut sum = 0u32;
                for (slot, count) in lut.iter_mut().zip(hist) {
                    sum += count;
                    *slot = (sum as f32 * scale).min(255.0);
                }
                luts.push(lut);
            }
        }

        luts
    }

    fn apply_interleaved(&self, pixels: &mut [u8], width: usize, height: usize, bgr: bool) {
        let count = width * height;
        let mut lightness = Vec::with_capacity(count);
        let mut chroma = Vec::with_capacity(count);

        for px in pixels.chunks_exact(3).take(count) {
            let (r, g, b) = if bgr {
                (px[2], px[1], px[0])
            } else {
                (px[0], px[1], px[2])
            };
            let (l, a, b) = self.to_lab(r, g, b);
            lightness.push((l * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8);
            chroma.push((a, b));
        }

        self.equalize(&mut lightness, width, height);

        for ((px, &l), &(a, b)) in pixels.chunks_exact_mut(3).zip(&lightness).zip(&chroma) {
            let [r, g, bl] = from_lab(l as f32 * 100.0 / 255.0, a, b);
            if bgr {
                px.copy_from_slice(&[bl, g, r]);
            } else {
                px.copy_from_slice(&[r, g, bl]);
            }
        }
    }

    fn to_lab(&self, r: u8, g: u8, b: u8) -> (f32, f32, f32) {
        let (r, g, b) = (
            self.linear[r as usize],
            self.linear[g as usize],
            self.linear[b as usize],
        );

        let x = 0.412_456_4 * r + 0.357_576_1 * g + 0.180_437_5 * b;
        let y = 0.212_672_9 * r + 0.715_152_2 * g + 0.072_175_0 * b;
        let z = 0.019_333_9 * r + 0.119_192_0 * g + 0.950_304_1 * b;

        let (fx, fy, fz) = (lab_f(x / XN), lab_f(y), lab_f(z / ZN));
        (116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz))
    }
}

impl Default for ClaheFilter {
    fn default() -> Self {
        Self::from_config(&FilterConfig::default())
    }
}

impl FrameTransform for ClaheFilter {
    fn apply(&self, frame: Frame) -> Frame {
        let bgr = match frame.meta.format {
            PixelFormat::Rgb24 => false,
            PixelFormat::Bgr24 => true,
            _ => return frame,
        };
        if !self.enabled {
            return frame;
        }

        let started = Instant::now();
        let width = frame.meta.width as usize;
        let height = frame.meta.height as usize;
        if frame.data.len() < width * height * 3 {
            trace!(sequence = frame.sequence(), "short frame, skipping filter");
            return frame;
        }

        let mut pixels = frame.data.to_vec();
        self.apply_interleaved(&mut pixels, width, height, bgr);

        metrics::histogram!("filter_time_us").record(started.elapsed().as_micros() as f64);
        frame.with_data(pixels)
    }
}

/// Redistribute counts above `limit` evenly over all bins.
fn clip_histogram(hist: &mut [u32; BINS], limit: u32) {
    let mut excess = 0u32;
    for count in hist.iter_mut() {
        if *count > limit {
            excess += *count - limit;
            *count = limit;
        }
    }

    let batch = excess / BINS as u32;
    let residual = (excess % BINS as u32) as usize;
    for count in hist.iter_mut() {
        *count += batch;
    }
    if residual > 0 {
        let step = (BINS / residual).max(1);
        for count in hist.iter_mut().step_by(step).take(residual) {
            *count += 1;
        }
    }
}

/// Tile indices surrounding `pos` and the weight of the second one.
fn neighbours(pos: usize, tile_size: f32, tiles: usize) -> (usize, usize, f32) {
    let grid = (pos as f32 + 0.5) / tile_size - 0.5;
    let first = grid.floor();
    let weight = grid - first;
    let last = tiles as isize - 1;

    let t0 = (first as isize).clamp(0, last) as usize;
    let t1 = (first as isize + 1).clamp(0, last) as usize;
    (t0, t1, weight)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> u8 {
    let c = c.clamp(0.0, 1.0);
    let v = if c <= 0.003_130_8 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

fn lab_f(t: f32) -> f32 {
    if t > DELTA * DELTA * DELTA {
        t.cbrt()
    } else {
        t / (3.0 * DELTA * DELTA) + 4.0 / 29.0
    }
}

fn lab_f_inv(t: f32) -> f32 {
    if t > DELTA {
        t * t * t
    } else {
        3.0 * DELTA * DELTA * (t - 4.0 / 29.0)
    }
}

fn from_lab(l: f32, a: f32, b: f32) -> [u8; 3] {
    let fy = (l + 16.0) / 116.0;
    let x = XN * lab_f_inv(fy + a / 500.0);
    let y = lab_f_inv(fy);
    let z = ZN * lab_f_inv(fy - b / 200.0);

    [
        linear_to_srgb(3.240_454_2 * x - 1.537_138_5 * y - 0.498_531_4 * z),
        linear_to_srgb(-0.969_266_0 * x + 1.876_010_8 * y + 0.041_556_0 * z),
        linear_to_srgb(0.055_643_4 * x - 0.204_025_9 * y + 1.057_225_2 * z),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameMetadata;

    fn gradient(width: u32, height: u32, lo: u8, hi: u8) -> Frame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for _y in 0..height {
            for x in 0..width {
                let v = lo as u32 + (hi - lo) as u32 * x / (width - 1);
                data.extend_from_slice(&[v as u8; 3]);
            }
        }
        Frame::new(data, FrameMetadata::packed(1, width, height, PixelFormat::Rgb24))
    }

    fn spread(frame: &Frame) -> u8 {
        let greens = frame.data.chunks_exact(3).map(|px| px[1]);
        greens.clone().max().unwrap() - greens.min().unwrap()
    }

    #[test]
    fn lab_round_trip_is_close_to_identity() {
        let filter = ClaheFilter::new(3.0, 8, 8);
        for rgb in [[0u8, 0, 0], [255, 255, 255], [200, 30, 90], [12, 140, 250]] {
            let (l, a, b) = filter.to_lab(rgb[0], rgb[1], rgb[2]);
            let back = from_lab(l, a, b);
            for (got, want) in back.iter().zip(rgb) {
                assert!((*got as i16 - want as i16).abs() <= 1, "{rgb:?} -> {back:?}");
            }
        }
    }

    #[test]
    fn low_contrast_image_gets_wider_range() {
        let filter = ClaheFilter::new(3.0, 8, 8);
        let input = gradient(256, 256, 100, 140);
        let before = spread(&input);

        let output = filter.apply(input);

        assert_eq!(output.byte_size(), 256 * 256 * 3);
        assert!(spread(&output) > before, "spread {} -> {}", before, spread(&output));
    }

    #[test]
    fn greys_stay_grey() {
        let filter = ClaheFilter::new(3.0, 8, 8);
        let output = filter.apply(gradient(32, 16, 40, 200));

        for px in output.data.chunks_exact(3) {
            let max = *px.iter().max().unwrap() as i16;
            let min = *px.iter().min().unwrap() as i16;
            assert!(max - min <= 2, "pixel {px:?} picked up colour");
        }
    }

    #[test]
    fn clipped_histogram_keeps_total_count() {
        let mut hist = [0u32; BINS];
        hist[10] = 1000;
        hist[200] = 24;

        clip_histogram(&mut hist, 12);

        assert_eq!(hist.iter().sum::<u32>(), 1024);
        assert!(hist.iter().all(|&c| c <= 12 + 4));
    }

    #[test]
    fn tiny_images_use_fewer_tiles() {
        let filter = ClaheFilter::new(3.0, 8, 8);
        let mut channel = vec![10u8, 20, 30, 40, 50, 60];

        filter.equalize(&mut channel, 3, 2);

        assert_eq!(channel.len(), 6);
    }

    #[test]
    fn disabled_filter_and_packed_yuv_pass_through() {
        let mut config = FilterConfig::default();
        config.enabled = false;
        let disabled = ClaheFilter::from_config(&config);
        let frame = gradient(16, 16, 0, 255);
        let data = frame.data.clone();
        assert_eq!(disabled.apply(frame).data, data);

        let yuyv = Frame::new(vec![16u8; 8], FrameMetadata::packed(1, 2, 2, PixelFormat::Yuyv4));
        let out = ClaheFilter::new(3.0, 8, 8).apply(yuyv);
        assert_eq!(&out.data[..], &[16u8; 8][..]);
    }
}
