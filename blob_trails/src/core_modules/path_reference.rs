// THEORY:
// A `PathReference` is the immutable description of one predefined path: a binary
// raster in model space where path pixels are 1, plus everything the matchers
// need to search it quickly.
//
// Key architectural principles:
// 1.  **Precomputed Distance Field**: The `distance_mask` is a square kernel of side
//     `2·max_distance + 1` holding each cell's Euclidean distance to the kernel
//     center. Laid over the raster around a sample, it turns "nearest path pixel"
//     into a minimum over one small window.
// 2.  **Off-Path Penalty**: The same-shaped `off_path_mask` holds a large constant.
//     Cells that are not path take that value during the search, so a path pixel
//     always wins if one exists within reach.
// 3.  **Shared, Read-Only**: One instance serves every blob. The registry wraps it
//     in an `Arc`; nothing mutates it after construction.

use crate::config::PathConfig;
use crate::core_modules::projection::Homography;
use crate::error::Result;
use image::{GrayImage, Luma};
use nalgebra::{DMatrix, Point2};
use std::path::Path;

/// A binary reference raster and its nearest-path search kernels.
#[derive(Debug, Clone)]
pub struct PathReference {
    /// Path pixels are 1, everything else 0.
    raster: GrayImage,
    /// Number of path pixels.
    path_area: u64,
    max_distance: u32,
    distance_mask: DMatrix<f64>,
    off_path_mask: DMatrix<f64>,
    /// Camera-to-model transform applied to samples before the search.
    projection: Option<Homography>,
}

impl PathReference {
    /// Binarizes a grayscale image: any non-zero pixel is path.
    pub fn from_luma(image: &GrayImage, config: &PathConfig) -> Self {
        let raster = GrayImage::from_fn(image.width(), image.height(), |x, y| {
            Luma([u8::from(image.get_pixel(x, y)[0] != 0)])
        });
        let path_area = raster.pixels().filter(|p| p[0] != 0).count() as u64;
        let side = (2 * config.max_distance + 1) as usize;
        Self {
            raster,
            path_area,
            max_distance: config.max_distance,
            distance_mask: create_distance_mask(config.max_distance),
            off_path_mask: DMatrix::from_element(side, side, config.off_path_penalty),
            projection: None,
        }
    }

    /// Loads and binarizes a reference path image from disk.
    pub fn load(path: impl AsRef<Path>, config: &PathConfig) -> Result<Self> {
        let image = image::open(path.as_ref())?.to_luma8();
        Ok(Self::from_luma(&image, config))
    }

    pub fn with_projection(mut self, projection: Option<Homography>) -> Self {
        self.projection = projection;
        self
    }

    pub fn width(&self) -> u32 {
        self.raster.width()
    }

    pub fn height(&self) -> u32 {
        self.raster.height()
    }

    pub fn path_area(&self) -> u64 {
        self.path_area
    }

    pub fn max_distance(&self) -> u32 {
        self.max_distance
    }

    pub fn projection(&self) -> Option<&Homography> {
        self.projection.as_ref()
    }

    /// Path membership of a pixel. Pixels outside the raster are not path.
    pub fn is_path(&self, x: i64, y: i64) -> bool {
        match (u32::try_from(x), u32::try_from(y)) {
            (Ok(x), Ok(y)) => self.raster.get_pixel_checked(x, y).is_some_and(|p| p[0] != 0),
            _ => false,
        }
    }

    /// Searches the `max_distance` neighborhood of `(x, y)` for the smallest
    /// combined value of `path·distance_mask + (1 - path)·off_path_mask`.
    /// Ties resolve to the first cell in row-major order.
    ///
    /// Returns the winning cell and its value.
    pub fn nearest_path_cell(&self, x: i64, y: i64) -> (Point2<i64>, f64) {
        let reach = i64::from(self.max_distance);
        let mut best = (Point2::new(x - reach, y - reach), f64::INFINITY);
        for (row, dy) in (-reach..=reach).enumerate() {
            for (col, dx) in (-reach..=reach).enumerate() {
                let (px, py) = (x + dx, y + dy);
                let value = if self.is_path(px, py) {
                    self.distance_mask[(row, col)]
                } else {
                    self.off_path_mask[(row, col)]
                };
                if value < best.1 {
                    best = (Point2::new(px, py), value);
                }
            }
        }
        best
    }

    /// Number of path pixels also set in `corridor`. The corridor must have the
    /// raster's dimensions.
    pub fn covered_area(&self, corridor: &GrayImage) -> u64 {
        self.raster
            .pixels()
            .zip(corridor.pixels())
            .filter(|(path, covered)| path[0] != 0 && covered[0] != 0)
            .count() as u64
    }
}

/// Square kernel of side `2·max_distance + 1` holding each cell's distance to the center.
pub fn create_distance_mask(max_distance: u32) -> DMatrix<f64> {
    let side = (2 * max_distance + 1) as usize;
    let center = max_distance as f64;
    DMatrix::from_fn(side, side, |row, col| {
        (row as f64 - center).hypot(col as f64 - center)
    })
}
