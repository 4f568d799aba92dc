use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use jpeg_decoder::Decoder;

use super::frame::PixelFormat;

/// Decoded image: packed RGB24 pixels plus the dimensions actually decoded.
pub struct Decoded {
    pub pixels: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Decode a raw capture buffer into packed RGB24.
pub fn decode_frame(data: &[u8], format: PixelFormat, width: u32, height: u32) -> Result<Decoded> {
    match format {
        PixelFormat::Mjpeg => decode_mjpeg(data),
        PixelFormat::Rgb24 => {
            let len = expect_len(data, width, height, 3)?;
            Ok(Decoded {
                pixels: Bytes::copy_from_slice(&data[..len]),
                width,
                height,
            })
        }
        PixelFormat::Bgr24 => {
            let len = expect_len(data, width, height, 3)?;
            let mut rgb = data[..len].to_vec();
            for px in rgb.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            Ok(Decoded {
                pixels: rgb.into(),
                width,
                height,
            })
        }
        PixelFormat::Yuyv4 => {
            let len = expect_len(data, width, height, 2)?;
            Ok(Decoded {
                pixels: yuyv_to_rgb(&data[..len]).into(),
                width,
                height,
            })
        }
    }
}

fn decode_mjpeg(data: &[u8]) -> Result<Decoded> {
    let mut decoder = Decoder::new(data);
    let pixels = decoder.decode()?;
    let info = decoder
        .info()
        .ok_or_else(|| eyre!("JPEG decoder returned no image info"))?;

    let rgb = match info.pixel_format {
        jpeg_decoder::PixelFormat::RGB24 => pixels,
        jpeg_decoder::PixelFormat::L8 => pixels.iter().flat_map(|&l| [l, l, l]).collect(),
        other => return Err(eyre!("Unsupported JPEG pixel format: {:?}", other)),
    };

    Ok(Decoded {
        pixels: rgb.into(),
        width: u32::from(info.width),
        height: u32::from(info.height),
    })
}

/// Byte length of a packed `width`x`height` image, checked against `data`.
fn expect_len(data: &[u8], width: u32, height: u32, bpp: usize) -> Result<usize> {
    let needed = (width as usize)
        .checked_mul(height as usize)
        .and_then(|px| px.checked_mul(bpp))
        .ok_or_else(|| eyre!("Frame size {}x{} overflows", width, height))?;
    if data.len() < needed {
        return Err(eyre!(
            "Short buffer: {} bytes for {}x{} (need {})",
            data.len(),
            width,
            height,
            needed
        ));
    }
    Ok(needed)
}

/// YUYV 4:2:2 to RGB24, BT.601 limited range, integer arithmetic.
pub fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    rgb
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;

    let clamp = |x: i32| (x >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e + 128),
        clamp(298 * c - 100 * d - 208 * e + 128),
        clamp(298 * c + 516 * d + 128),
    ]
}
