use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::drawing::BresenhamLineIter;

use crate::math::tensor::Tensor;

/// A closed boundary polyline as `(x, y)` pixel coordinates.
pub type Contour = Vec<(i32, i32)>;

/// Outline color drawn over detected regions.
pub const OUTLINE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
/// Outline width in pixels.
pub const OUTLINE_THICKNESS: u32 = 2;

const FOREGROUND: u8 = 255;

/// Foreground (255) iff the probability strictly exceeds `threshold`.
pub fn binarize(prob: &Tensor, threshold: f32) -> GrayImage {
    let plane = prob.plane(0);
    GrayImage::from_fn(prob.width as u32, prob.height as u32, |x, y| {
        let p = plane[y as usize * prob.width + x as usize];
        Luma([if p > threshold { FOREGROUND } else { 0 }])
    })
}

/// Nearest-neighbor resize that keeps the mask strictly {0, 255}.
pub fn resize_mask(mask: &GrayImage, width: u32, height: u32) -> GrayImage {
    if mask.dimensions() == (width, height) {
        return mask.clone();
    }
    let mut resized = imageops::resize(mask, width, height, FilterType::Nearest);
    for p in resized.pixels_mut() {
        *p = Luma([if p.0[0] >= 128 { FOREGROUND } else { 0 }]);
    }
    resized
}

/// Outer boundaries of every top-level foreground region; holes and regions
/// nested inside holes are not reported.
pub fn find_external_contours(mask: &GrayImage) -> Vec<Contour> {
    find_contours::<i32>(mask).into_iter()
        .filter(|c| c.parent.is_none() && matches!(c.border_type, BorderType::Outer))
        .map(|c| simplify(c.points.iter().map(|p| (p.x, p.y)).collect()))
        .collect()
}

/// Drops every point that sits in the middle of a straight horizontal,
/// vertical or diagonal run, keeping only the run endpoints.
fn simplify(mut points: Contour) -> Contour {
    points.dedup();
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    let n = points.len();
    if n < 3 {
        return points;
    }
    let step = |a: (i32, i32), b: (i32, i32)| ((b.0 - a.0).signum(), (b.1 - a.1).signum());
    let kept: Contour = (0..n)
        .filter(|&i| {
            let prev = points[(i + n - 1) % n];
            let next = points[(i + 1) % n];
            step(prev, points[i]) != step(points[i], next)
        })
        .map(|i| points[i])
        .collect();
    if kept.is_empty() { points } else { kept }
}

/// Returns a copy of `image` with every contour drawn as a closed polyline.
pub fn draw_contours(image: &RgbImage, contours: &[Contour], color: Rgb<u8>, thickness: u32) -> RgbImage {
    let mut canvas = image.clone();
    for contour in contours {
        match contour.len() {
            0 => {}
            1 => stamp(&mut canvas, contour[0], color, thickness),
            n => {
                for i in 0..n {
                    let (a, b) = (contour[i], contour[(i + 1) % n]);
                    let line = BresenhamLineIter::new((a.0 as f32, a.1 as f32), (b.0 as f32, b.1 as f32));
                    for point in line {
                        stamp(&mut canvas, point, color, thickness);
                    }
                }
            }
        }
    }
    canvas
}

/// Paints a `thickness × thickness` square centred on `point`, clipped to
/// the canvas.
fn stamp(canvas: &mut RgbImage, point: (i32, i32), color: Rgb<u8>, thickness: u32) {
    let t = thickness.max(1) as i32;
    let (w, h) = (canvas.width() as i32, canvas.height() as i32);
    for dy in -(t / 2)..(t - t / 2) {
        for dx in -(t / 2)..(t - t / 2) {
            let (x, y) = (point.0 + dx, point.1 + dy);
            if x >= 0 && y >= 0 && x < w && y < h {
                canvas.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

/// Threshold → resize to the original grid → external contours → overlay.
pub fn annotate(original: &RgbImage, prob: &Tensor, threshold: f32) -> RgbImage {
    let (w, h) = original.dimensions();
    let mask = resize_mask(&binarize(prob, threshold), w, h);
    let contours = find_external_contours(&mask);
    draw_contours(original, &contours, OUTLINE_COLOR, OUTLINE_THICKNESS)
}
