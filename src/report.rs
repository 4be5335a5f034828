//! Image and curve outputs: sample grids, training curves as PNG plots and JSON.

use crate::data::mnist::{HEIGHT, WIDTH};
use crate::error::{Error, Result};
use burn::prelude::*;
use image::{GrayImage, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Gap, in pixels, around every image of a grid.
pub const PADDING: usize = 2;

const PLOT_WIDTH: u32 = 640;
const PLOT_HEIGHT: u32 = 360;
const PLOT_MARGIN: u32 = 32;
const TRAIN_COLOR: Rgb<u8> = Rgb([31, 119, 180]);
const VALID_COLOR: Rgb<u8> = Rgb([255, 127, 14]);
const AXIS_COLOR: Rgb<u8> = Rgb([96, 96, 96]);

/// Tiles flattened 28x28 images into a grid with `nrow` images per row.
///
/// With `normalize`, values are min-max scaled over the whole batch; otherwise they are read as
/// intensities in `[0, 1]` and clamped.
///
/// # Shapes
///   - images [n, WIDTH * HEIGHT]
pub fn image_grid<B: Backend>(images: Tensor<B, 2>, nrow: usize, normalize: bool) -> Result<GrayImage> {
    let [n, pixels] = images.dims();
    if pixels != WIDTH * HEIGHT {
        return Err(Error::ImageSize {
            expected: WIDTH * HEIGHT,
            got: pixels,
        });
    }
    let values = images
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Error::TensorData(format!("{e:?}")))?;

    let (lo, hi) = if normalize {
        let lo = values.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        (lo, hi)
    } else {
        (0., 1.)
    };
    let range = if hi > lo { hi - lo } else { 1. };

    let ncol = nrow.clamp(1, n.max(1));
    let nrows = n.div_ceil(ncol).max(1);
    let grid_width = ncol * (WIDTH + PADDING) + PADDING;
    let grid_height = nrows * (HEIGHT + PADDING) + PADDING;
    let mut grid = GrayImage::new(grid_width as u32, grid_height as u32);

    for (k, image) in values.chunks(pixels).enumerate() {
        let x0 = PADDING + (k % ncol) * (WIDTH + PADDING);
        let y0 = PADDING + (k / ncol) * (HEIGHT + PADDING);
        for (p, value) in image.iter().enumerate() {
            let intensity = ((value - lo) / range).clamp(0., 1.);
            let x = (x0 + p % WIDTH) as u32;
            let y = (y0 + p / WIDTH) as u32;
            grid.put_pixel(x, y, Luma([(intensity * 255.).round() as u8]));
        }
    }

    Ok(grid)
}

/// Writes [`image_grid`] to a PNG file.
pub fn save_image_grid<B: Backend>(
    images: Tensor<B, 2>,
    nrow: usize,
    normalize: bool,
    path: &Path,
) -> Result<()> {
    image_grid(images, nrow, normalize)?.save(path)?;
    tracing::info!("saved {path:?}");
    Ok(())
}

/// Per-epoch metrics of the train and validation splits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Curves {
    pub train: Vec<f64>,
    pub valid: Vec<f64>,
}

impl Curves {
    pub fn push(&mut self, train: f64, valid: f64) {
        self.train.push(train);
        self.valid.push(valid);
    }

    pub fn len(&self) -> usize {
        self.train.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty()
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Line plot of both curves against the epoch, train in blue and validation in orange.
    pub fn plot(&self) -> RgbImage {
        let mut img = RgbImage::from_pixel(PLOT_WIDTH, PLOT_HEIGHT, Rgb([255, 255, 255]));

        let (left, right) = (PLOT_MARGIN, PLOT_WIDTH - PLOT_MARGIN);
        let (top, bottom) = (PLOT_MARGIN, PLOT_HEIGHT - PLOT_MARGIN);
        draw_line(&mut img, (left, bottom), (right, bottom), AXIS_COLOR);
        draw_line(&mut img, (left, top), (left, bottom), AXIS_COLOR);

        let finite = self.train.iter().chain(&self.valid).filter(|v| v.is_finite());
        let (lo, hi) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
        if lo > hi {
            return img;
        }
        let range = if hi > lo { hi - lo } else { 1. };
        let last = self.len().saturating_sub(1).max(1) as f64;

        let to_pixel = |epoch: usize, value: f64| -> (u32, u32) {
            let x = left as f64 + (right - left) as f64 * epoch as f64 / last;
            let y = bottom as f64 - (bottom - top) as f64 * (value - lo) / range;
            (x.round() as u32, y.round() as u32)
        };

        for (curve, color) in [(&self.train, TRAIN_COLOR), (&self.valid, VALID_COLOR)] {
            let points: Vec<(u32, u32)> = curve
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_finite())
                .map(|(epoch, &v)| to_pixel(epoch, v))
                .collect();
            for pair in points.windows(2) {
                draw_line(&mut img, pair[0], pair[1], color);
            }
            for &(x, y) in &points {
                draw_marker(&mut img, x, y, color);
            }
        }

        img
    }

    pub fn save_plot(&self, path: &Path) -> Result<()> {
        self.plot().save(path)?;
        tracing::info!("saved {path:?}");
        Ok(())
    }
}

fn draw_line(img: &mut RgbImage, from: (u32, u32), to: (u32, u32), color: Rgb<u8>) {
    let (x0, y0) = (from.0 as f64, from.1 as f64);
    let (x1, y1) = (to.0 as f64, to.1 as f64);
    let steps = (x1 - x0).abs().max((y1 - y0).abs()).max(1.) as u32;
    for step in 0..=steps {
        let t = step as f64 / steps as f64;
        let x = (x0 + (x1 - x0) * t).round() as u32;
        let y = (y0 + (y1 - y0) * t).round() as u32;
        if x < img.width() && y < img.height() {
            img.put_pixel(x, y, color);
        }
    }
}

fn draw_marker(img: &mut RgbImage, x: u32, y: u32, color: Rgb<u8>) {
    for dy in 0..3 {
        for dx in 0..3 {
            let (px, py) = ((x + dx).saturating_sub(1), (y + dy).saturating_sub(1));
            if px < img.width() && py < img.height() {
                img.put_pixel(px, py, color);
            }
        }
    }
}
