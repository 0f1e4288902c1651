// SPDX-License-Identifier: Apache-2.0
//
// Raw framebuffer to PNG/BMP encoding.

use std::io::Cursor;

use image::{ImageFormat, RgbImage};

use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageEncoding {
    Png,
    Bmp,
}

#[derive(Clone, Debug)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    pub encoding: ImageEncoding,
}

impl ImageData {
    pub fn content_type(&self) -> &'static str {
        match self.encoding {
            ImageEncoding::Png => "image/png",
            ImageEncoding::Bmp => "image/bmp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self.encoding {
            ImageEncoding::Png => "png",
            ImageEncoding::Bmp => "bmp",
        }
    }
}

pub fn encode_png(
    pixels: &[u8],
    width: u32,
    height: u32,
    pitch: u32,
    bpp: u32,
    rgb_order: bool,
) -> Result<ImageData, Error> {
    encode(pixels, width, height, pitch, bpp, rgb_order, ImageFormat::Png).map(|bytes| ImageData {
        bytes,
        encoding: ImageEncoding::Png,
    })
}

pub fn encode_bmp(
    pixels: &[u8],
    width: u32,
    height: u32,
    pitch: u32,
    bpp: u32,
    rgb_order: bool,
) -> Result<ImageData, Error> {
    encode(pixels, width, height, pitch, bpp, rgb_order, ImageFormat::Bmp).map(|bytes| ImageData {
        bytes,
        encoding: ImageEncoding::Bmp,
    })
}

fn encode(
    pixels: &[u8],
    width: u32,
    height: u32,
    pitch: u32,
    bpp: u32,
    rgb_order: bool,
    format: ImageFormat,
) -> Result<Vec<u8>, Error> {
    let rgb = repack_rgb(pixels, width, height, pitch, bpp, rgb_order)?;
    let img = RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| Error::internal("pixel buffer does not match image dimensions"))?;
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format)
        .map_err(|err| Error::internal(format!("image encoding failed: {err}")))?;
    Ok(out.into_inner())
}

/// Rows are `pitch` bytes apart; 32 bpp pixels carry a filler byte after
/// the colour channels. The scan-out default is BGR(X); `rgb_order` flips
/// the channel order for cards that scan out RGB(X).
fn repack_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    pitch: u32,
    bpp: u32,
    rgb_order: bool,
) -> Result<Vec<u8>, Error> {
    let bytes_per_pixel = match bpp {
        32 => 4,
        24 => 3,
        other => {
            return Err(Error::Unsupported(format!(
                "unsupported pixel depth: {other} bpp"
            )))
        }
    };

    let width = width as usize;
    let height = height as usize;
    let pitch = pitch as usize;
    let row_bytes = width * bytes_per_pixel;

    let mut rgb = Vec::with_capacity(width * height * 3);
    for row in 0..height {
        let start = row * pitch;
        let line = pixels
            .get(start..start + row_bytes)
            .ok_or_else(|| Error::io("framebuffer smaller than advertised"))?;
        for pixel in line.chunks_exact(bytes_per_pixel) {
            if rgb_order {
                rgb.extend_from_slice(&[pixel[0], pixel[1], pixel[2]]);
            } else {
                rgb.extend_from_slice(&[pixel[2], pixel[1], pixel[0]]);
            }
        }
    }
    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: [u8; 8] = [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE, 0xBA, 0xBE];

    #[test]
    fn png_round_trips_a_bgrx_buffer() {
        let image = encode_png(&SAMPLE, 2, 1, 8, 32, false).unwrap();
        assert_eq!(image.encoding, ImageEncoding::Png);
        assert_eq!(image.content_type(), "image/png");

        let decoded = image::load_from_memory(&image.bytes).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (2, 1));
        assert_eq!(decoded.get_pixel(0, 0).0, [0xBE, 0xAD, 0xDE]);
        assert_eq!(decoded.get_pixel(1, 0).0, [0xBA, 0xFE, 0xCA]);
    }

    #[test]
    fn rgb_flag_keeps_channel_order() {
        let image = encode_png(&SAMPLE, 2, 1, 8, 32, true).unwrap();
        let decoded = image::load_from_memory(&image.bytes).unwrap().to_rgb8();
        assert_eq!(decoded.get_pixel(0, 0).0, [0xDE, 0xAD, 0xBE]);
    }

    #[test]
    fn bmp_encoding_is_selectable() {
        let image = encode_bmp(&SAMPLE, 2, 1, 8, 32, false).unwrap();
        assert_eq!(image.encoding, ImageEncoding::Bmp);
        assert_eq!(image.extension(), "bmp");
        let decoded = image::load_from_memory(&image.bytes).unwrap().to_rgb8();
        assert_eq!(decoded.get_pixel(0, 0).0, [0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn odd_pixel_depths_are_rejected() {
        let err = encode_png(&SAMPLE, 2, 1, 8, 16, false).unwrap_err();
        assert!(err.to_string().contains("unsupported pixel depth"));
    }

    #[test]
    fn short_buffers_are_rejected() {
        let err = encode_png(&SAMPLE[..4], 2, 1, 8, 32, false).unwrap_err();
        assert!(err.to_string().contains("smaller than advertised"));
    }
}
