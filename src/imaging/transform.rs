//! Pixel transforms: quarter-turn rotation and a 3×3 mean filter.
//!
//! Both are pure: they borrow the input grid and return a new one, leaving
//! the caller's data untouched.

use super::codec::PixelGrid;
use crate::types::Rotation;
use image::{DynamicImage, ImageBuffer as Raster, Pixel};
use rayon::prelude::*;

/// Rotate a grid counter-clockwise by a whole number of quarter turns.
///
/// Full-canvas rotation: no interpolation and no cropping. For a W×H input
/// and [`Rotation::Ninety`], the output is H×W and output pixel `(x, y)` is
/// input pixel `(W - 1 - y, x)`.
pub fn rotate(grid: &PixelGrid, rotation: Rotation) -> PixelGrid {
    grid.derive(rotate_image(grid.image(), rotation))
}

pub fn rotate_image(image: &DynamicImage, rotation: Rotation) -> DynamicImage {
    // `image`'s rotations are clockwise.
    match rotation {
        Rotation::None => image.clone(),
        Rotation::Ninety => image.rotate270(),
        Rotation::OneEighty => image.rotate180(),
        Rotation::TwoSeventy => image.rotate90(),
    }
}

/// Replace every pixel with the mean of its 3×3 neighbourhood.
///
/// The window is clamped to the grid, so edge pixels average 6 values and
/// corners 4. Channels are averaged independently (alpha included); integer
/// channels truncate toward zero. One pass, dimensions unchanged.
pub fn mean_filter(grid: &PixelGrid) -> PixelGrid {
    grid.derive(mean_filter_image(grid.image()))
}

pub fn mean_filter_image(image: &DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(buf) => DynamicImage::ImageLuma8(mean_filter_buffer(buf)),
        DynamicImage::ImageLumaA8(buf) => DynamicImage::ImageLumaA8(mean_filter_buffer(buf)),
        DynamicImage::ImageRgb8(buf) => DynamicImage::ImageRgb8(mean_filter_buffer(buf)),
        DynamicImage::ImageRgba8(buf) => DynamicImage::ImageRgba8(mean_filter_buffer(buf)),
        DynamicImage::ImageLuma16(buf) => DynamicImage::ImageLuma16(mean_filter_buffer(buf)),
        DynamicImage::ImageLumaA16(buf) => DynamicImage::ImageLumaA16(mean_filter_buffer(buf)),
        DynamicImage::ImageRgb16(buf) => DynamicImage::ImageRgb16(mean_filter_buffer(buf)),
        DynamicImage::ImageRgba16(buf) => DynamicImage::ImageRgba16(mean_filter_buffer(buf)),
        DynamicImage::ImageRgb32F(buf) => DynamicImage::ImageRgb32F(mean_filter_buffer(buf)),
        DynamicImage::ImageRgba32F(buf) => DynamicImage::ImageRgba32F(mean_filter_buffer(buf)),
        other => DynamicImage::ImageRgba32F(mean_filter_buffer(&other.to_rgba32f())),
    }
}

/// Channel arithmetic for the mean filter.
trait MeanChannel: Copy + Send + Sync {
    type Sum: Copy + Default + std::ops::AddAssign;
    fn widen(self) -> Self::Sum;
    fn mean(sum: Self::Sum, count: u32) -> Self;
}

impl MeanChannel for u8 {
    type Sum = u32;

    fn widen(self) -> u32 {
        u32::from(self)
    }

    fn mean(sum: u32, count: u32) -> u8 {
        u8::try_from(sum / count).unwrap_or(u8::MAX)
    }
}

impl MeanChannel for u16 {
    type Sum = u32;

    fn widen(self) -> u32 {
        u32::from(self)
    }

    fn mean(sum: u32, count: u32) -> u16 {
        u16::try_from(sum / count).unwrap_or(u16::MAX)
    }
}

impl MeanChannel for f32 {
    type Sum = f64;

    fn widen(self) -> f64 {
        f64::from(self)
    }

    fn mean(sum: f64, count: u32) -> f32 {
        (sum / f64::from(count)) as f32
    }
}

fn mean_filter_buffer<P>(input: &Raster<P, Vec<P::Subpixel>>) -> Raster<P, Vec<P::Subpixel>>
where
    P: Pixel,
    P::Subpixel: MeanChannel,
{
    let (width, height) = (input.width() as usize, input.height() as usize);
    let channels = usize::from(P::CHANNEL_COUNT);
    let row_len = width * channels;
    let src: &[P::Subpixel] = input.as_raw();

    let mut output = input.clone();
    if width == 0 || height == 0 {
        return output;
    }

    output
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            let y0 = y.saturating_sub(1);
            let y1 = (y + 1).min(height - 1);
            for x in 0..width {
                let x0 = x.saturating_sub(1);
                let x1 = (x + 1).min(width - 1);
                let count = ((y1 - y0 + 1) * (x1 - x0 + 1)) as u32;
                for c in 0..channels {
                    let mut sum = <P::Subpixel as MeanChannel>::Sum::default();
                    for wy in y0..=y1 {
                        let base = wy * row_len;
                        for wx in x0..=x1 {
                            sum += src[base + wx * channels + c].widen();
                        }
                    }
                    row[x * channels + c] = P::Subpixel::mean(sum, count);
                }
            }
        });

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{distinct_rgb, gradient_rgba, luma_grid};
    use image::{GenericImageView, ImageFormat, Luma, LumaA, Rgb, Rgba, RgbImage, RgbaImage};

    fn grid(image: DynamicImage) -> PixelGrid {
        PixelGrid::new(image, ImageFormat::Png).unwrap()
    }

    // =========================================================================
    // Rotation
    // =========================================================================

    #[test]
    fn rotate_zero_is_identity() {
        let g = grid(gradient_rgba(5, 7));
        assert_eq!(rotate(&g, Rotation::None), g);
    }

    #[test]
    fn quarter_turns_swap_dimensions() {
        let g = grid(gradient_rgba(5, 7));
        assert_eq!(rotate(&g, Rotation::Ninety).dimensions(), (7, 5));
        assert_eq!(rotate(&g, Rotation::TwoSeventy).dimensions(), (7, 5));
        assert_eq!(rotate(&g, Rotation::OneEighty).dimensions(), (5, 7));
    }

    #[test]
    fn rotations_summing_to_full_turn_are_identity() {
        let g = grid(gradient_rgba(4, 3));
        for first in Rotation::ALL {
            for second in Rotation::ALL {
                if first.then(second) != Rotation::None {
                    continue;
                }
                let back = rotate(&rotate(&g, first), second);
                assert_eq!(back, g, "{first} then {second}");
            }
        }
    }

    #[test]
    fn ninety_maps_pixels_counter_clockwise() {
        // 2 wide × 3 tall, every pixel distinct.
        let src = distinct_rgb(2, 3);
        let (w, _h) = src.dimensions();
        let out = rotate_image(&DynamicImage::ImageRgb8(src.clone()), Rotation::Ninety);

        assert_eq!(out.dimensions(), (3, 2));
        for (x, y, px) in out.pixels() {
            assert_eq!(
                px.to_rgb(),
                *src.get_pixel(w - 1 - y, x),
                "output ({x}, {y})"
            );
        }
    }

    #[test]
    fn ninety_on_2x3_matches_hand_layout() {
        // Input (x, y) values encoded as 10*x + y:
        //   row0:  0 10
        //   row1:  1 11
        //   row2:  2 12
        // Counter-clockwise quarter turn gives 3 wide × 2 tall:
        //   row0: 10 11 12
        //   row1:  0  1  2
        let src = distinct_rgb(2, 3);
        let out = rotate_image(&DynamicImage::ImageRgb8(src), Rotation::Ninety).to_rgb8();
        let reds: Vec<u8> = out.pixels().map(|p| p[0]).collect();
        assert_eq!(reds, vec![10, 11, 12, 0, 1, 2]);
    }

    #[test]
    fn one_eighty_maps_to_opposite_corner() {
        let src = distinct_rgb(2, 3);
        let out =
            rotate_image(&DynamicImage::ImageRgb8(src.clone()), Rotation::OneEighty).to_rgb8();
        for (x, y, px) in out.enumerate_pixels() {
            assert_eq!(px, src.get_pixel(1 - x, 2 - y));
        }
    }

    #[test]
    fn two_seventy_maps_pixels_clockwise() {
        let src = distinct_rgb(2, 3);
        let (_w, h) = src.dimensions();
        let out =
            rotate_image(&DynamicImage::ImageRgb8(src.clone()), Rotation::TwoSeventy).to_rgb8();
        assert_eq!(out.dimensions(), (3, 2));
        for (x, y, px) in out.enumerate_pixels() {
            assert_eq!(px, src.get_pixel(y, h - 1 - x));
        }
    }

    #[test]
    fn rotate_keeps_format_and_color_type() {
        let g = PixelGrid::new(gradient_rgba(3, 2), ImageFormat::Bmp).unwrap();
        let r = rotate(&g, Rotation::Ninety);
        assert_eq!(r.format(), ImageFormat::Bmp);
        assert_eq!(r.image().color(), g.image().color());
    }

    // =========================================================================
    // Mean filter
    // =========================================================================

    #[test]
    fn mean_filter_single_pixel_unchanged() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([7, 99, 254, 3])));
        assert_eq!(mean_filter_image(&img), img);
    }

    #[test]
    fn mean_filter_uniform_grid_unchanged() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(9, 4, Rgb([17, 200, 255])));
        assert_eq!(mean_filter_image(&img), img);

        let wide = DynamicImage::ImageLumaA16(image::ImageBuffer::from_pixel(
            3,
            3,
            LumaA([65535, 1234]),
        ));
        assert_eq!(mean_filter_image(&wide), wide);
    }

    #[test]
    fn mean_filter_clamps_window_at_borders() {
        // 3×3 luma grid with values 1..=9:
        //   1 2 3
        //   4 5 6
        //   7 8 9
        let img = DynamicImage::ImageLuma8(luma_grid(3, 3, &[1, 2, 3, 4, 5, 6, 7, 8, 9]));
        let out = mean_filter_image(&img).to_luma8();

        // Corner (0,0): {1,2,4,5} / 4 = 3
        assert_eq!(out.get_pixel(0, 0), &Luma([3]));
        // Top edge (1,0): {1,2,3,4,5,6} / 6 = 3 (21/6 = 3.5 truncated)
        assert_eq!(out.get_pixel(1, 0), &Luma([3]));
        // Centre: 45 / 9 = 5
        assert_eq!(out.get_pixel(1, 1), &Luma([5]));
        // Corner (2,2): {5,6,8,9} / 4 = 7
        assert_eq!(out.get_pixel(2, 2), &Luma([7]));
        // Left edge (0,1): {1,2,4,5,7,8} / 6 = 4 (27/6 = 4.5 truncated)
        assert_eq!(out.get_pixel(0, 1), &Luma([4]));
    }

    #[test]
    fn mean_filter_truncates_toward_zero() {
        // 2×1: both pixels see both values; (0 + 255) / 2 = 127.5 -> 127.
        let img = DynamicImage::ImageLuma8(luma_grid(2, 1, &[0, 255]));
        let out = mean_filter_image(&img).to_luma8();
        assert_eq!(out.as_raw(), &vec![127, 127]);
    }

    #[test]
    fn mean_filter_averages_channels_independently() {
        let mut src = RgbaImage::new(2, 1);
        src.put_pixel(0, 0, Rgba([10, 0, 255, 255]));
        src.put_pixel(1, 0, Rgba([20, 100, 0, 0]));
        let out = mean_filter_image(&DynamicImage::ImageRgba8(src)).to_rgba8();

        assert_eq!(out.get_pixel(0, 0), &Rgba([15, 50, 127, 127]));
        assert_eq!(out.get_pixel(1, 0), &Rgba([15, 50, 127, 127]));
    }

    #[test]
    fn mean_filter_is_a_single_pass() {
        // Spike in the middle of a 5×1 row. After one pass only the immediate
        // neighbours pick it up; a second pass would spread it further.
        let img = DynamicImage::ImageLuma8(luma_grid(5, 1, &[0, 0, 90, 0, 0]));
        let out = mean_filter_image(&img).to_luma8();
        assert_eq!(out.as_raw(), &vec![0, 30, 30, 30, 0]);
    }

    #[test]
    fn mean_filter_preserves_dimensions_and_format() {
        let g = PixelGrid::new(gradient_rgba(6, 2), ImageFormat::Tiff).unwrap();
        let f = mean_filter(&g);
        assert_eq!(f.dimensions(), (6, 2));
        assert_eq!(f.format(), ImageFormat::Tiff);
        assert_eq!(f.image().color(), g.image().color());
    }

    #[test]
    fn mean_filter_handles_16_bit_sums() {
        let raw = image::ImageBuffer::from_raw(3, 1, vec![65535u16, 65535, 65534]).unwrap();
        let img = DynamicImage::ImageLuma16(raw);
        let out = mean_filter_image(&img).to_luma16();
        // Left: (65535 + 65535) / 2; middle: (65535*2 + 65534) / 3 = 65534.67 -> 65534.
        assert_eq!(out.as_raw(), &vec![65535, 65534, 65534]);
    }

    #[test]
    fn mean_filter_does_not_touch_input() {
        let img = DynamicImage::ImageLuma8(luma_grid(3, 1, &[0, 30, 60]));
        let before = img.clone();
        let _ = mean_filter_image(&img);
        assert_eq!(img, before);
    }
}
