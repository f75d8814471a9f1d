use ndarray::ArrayViewMut3;

use crate::shared::frame::RawImage;

/// Fixed-size RGB canvas the sampler draws each source frame onto.
///
/// Allocated once per sampler and reused for every frame. Drawing stretches
/// the source to fill the surface (no letterboxing), sampling each
/// destination pixel from the source pixel under its center.
pub struct DrawingSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl DrawingSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0u8; width as usize * height as usize * 3],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Draws `image` scaled to the surface size.
    ///
    /// Gray (1), RGB (3) and RGBA (4, alpha dropped) inputs are accepted.
    /// Returns `false` and leaves the surface untouched for empty images,
    /// other channel layouts, or buffers that do not match their dimensions.
    pub fn draw(&mut self, image: &RawImage) -> bool {
        if image.is_empty() || !matches!(image.channels(), 1 | 3 | 4) {
            return false;
        }
        let Some(src) = image.as_ndarray() else {
            return false;
        };
        let shape = (self.height as usize, self.width as usize, 3);
        let Ok(mut dst) = ArrayViewMut3::from_shape(shape, &mut self.pixels) else {
            return false;
        };

        let (src_h, src_w) = (image.height() as usize, image.width() as usize);
        let (dst_h, dst_w) = (shape.0, shape.1);
        let x_map: Vec<usize> = (0..dst_w).map(|x| source_index(x, dst_w, src_w)).collect();
        let gray = image.channels() == 1;

        for y in 0..dst_h {
            let sy = source_index(y, dst_h, src_h);
            for (x, &sx) in x_map.iter().enumerate() {
                for c in 0..3 {
                    dst[[y, x, c]] = src[[sy, sx, if gray { 0 } else { c }]];
                }
            }
        }
        true
    }
}

fn source_index(dst: usize, dst_len: usize, src_len: usize) -> usize {
    let center = (dst as f64 + 0.5) * src_len as f64 / dst_len as f64;
    (center as usize).min(src_len - 1)
}
