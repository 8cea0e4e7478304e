//! Motion annotator.
//!
//! Classic frame differencing: absolute difference of consecutive frames,
//! luma, 5×5 blur, binary threshold, dilation, contour extraction. Contours
//! enclosing at least `MIN_CONTOUR_AREA` px² get a green box drawn onto the
//! earlier frame of the pair, which is then written to the output video.

use image::{GrayImage, Luma, Rgb};
use imageproc::contours::find_contours;
use imageproc::contrast::{threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::morphology::dilate;
use imageproc::point::Point;
use imageproc::rect::Rect;
use std::path::Path;
use tracing::{debug, info};
use vidscan_common::config::FfmpegConfig;

use crate::error::{AnalysisError, DecodeError, EncodeError};
use crate::report::MotionReport;
use crate::video::{FfmpegReader, FfmpegWriter, FourCc, Frame, FrameSink, FrameSource};

/// Separable 5×5 Gaussian kernel (sums to 16 per axis).
pub const BLUR_KERNEL: [u32; 5] = [1, 4, 6, 4, 1];
/// Blurred difference above this becomes foreground.
pub const DIFF_THRESHOLD: u8 = 20;
/// 3×3 square dilations applied to the mask.
pub const DILATE_ITERATIONS: u8 = 3;
/// Contours enclosing less than this many px² are noise.
pub const MIN_CONTOUR_AREA: f64 = 500.0;
pub const BOX_THICKNESS: u32 = 2;
pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// Output frame rate, independent of the source.
pub const OUTPUT_FPS: f64 = 20.0;
pub const OUTPUT_FOURCC: FourCc = FourCc::XVID;

/// A candidate motion region: one contour of the dilated mask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Polygon area enclosed by the contour.
    pub area: f64,
}

pub fn is_significant(area: f64) -> bool {
    area >= MIN_CONTOUR_AREA
}

/// Per-channel absolute difference of two frames, reduced to BT.601 luma.
pub fn diff_luma(a: &Frame, b: &Frame) -> GrayImage {
    let (width, height) = a.dimensions();
    let mut out = GrayImage::new(width, height);
    for ((pa, pb), po) in a.pixels().zip(b.pixels()).zip(out.pixels_mut()) {
        let r = pa.0[0].abs_diff(pb.0[0]) as u32;
        let g = pa.0[1].abs_diff(pb.0[1]) as u32;
        let b = pa.0[2].abs_diff(pb.0[2]) as u32;
        // 14-bit fixed point: 0.299, 0.587, 0.114
        let y = (r * 4899 + g * 9617 + b * 1868 + (1 << 13)) >> 14;
        *po = Luma([y.min(255) as u8]);
    }
    out
}

/// Mirror an out-of-range index back into `0..n` without repeating the edge.
fn reflect101(mut i: i64, n: i64) -> usize {
    if n <= 1 {
        return 0;
    }
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}

/// 5×5 Gaussian blur with reflect-101 borders.
pub fn gaussian_blur_5x5(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let (w, h) = (width as i64, height as i64);
    let radius = (BLUR_KERNEL.len() / 2) as i64;
    let src = image.as_raw();

    let mut horizontal = vec![0u32; src.len()];
    for y in 0..h {
        let row = (y * w) as usize;
        for x in 0..w {
            let mut acc = 0u32;
            for (k, weight) in BLUR_KERNEL.iter().enumerate() {
                let sx = reflect101(x + k as i64 - radius, w);
                acc += weight * src[row + sx] as u32;
            }
            horizontal[row + x as usize] = acc;
        }
    }

    let mut out = GrayImage::new(width, height);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0u32;
            for (k, weight) in BLUR_KERNEL.iter().enumerate() {
                let sy = reflect101(y + k as i64 - radius, h);
                acc += weight * horizontal[sy * width as usize + x as usize];
            }
            out.put_pixel(x as u32, y as u32, Luma([((acc + 128) >> 8).min(255) as u8]));
        }
    }
    out
}

/// Binary foreground mask of the change between two frames.
pub fn motion_mask(a: &Frame, b: &Frame) -> GrayImage {
    let blurred = gaussian_blur_5x5(&diff_luma(a, b));
    let binary = threshold(&blurred, DIFF_THRESHOLD, ThresholdType::Binary);
    // A chebyshev ball of radius n equals n iterations of a 3×3 square.
    dilate(&binary, Norm::LInf, DILATE_ITERATIONS)
}

/// Shoelace area of a closed contour.
pub fn contour_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(p, q)| p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64)
        .sum();
    twice.abs() as f64 / 2.0
}

fn bounding_region(points: &[Point<i32>]) -> Option<MotionRegion> {
    let min_x = points.iter().map(|p| p.x).min()?;
    let max_x = points.iter().map(|p| p.x).max()?;
    let min_y = points.iter().map(|p| p.y).min()?;
    let max_y = points.iter().map(|p| p.y).max()?;
    Some(MotionRegion {
        x: min_x.max(0) as u32,
        y: min_y.max(0) as u32,
        width: (max_x - min_x + 1) as u32,
        height: (max_y - min_y + 1) as u32,
        area: contour_area(points),
    })
}

/// Every contour (outer borders and holes) of the motion mask between
/// `a` and `b`, unfiltered.
pub fn find_motion_regions(a: &Frame, b: &Frame) -> Vec<MotionRegion> {
    let mask = motion_mask(a, b);
    find_contours::<i32>(&mask)
        .iter()
        .filter_map(|contour| bounding_region(&contour.points))
        .collect()
}

/// Draw a `BOX_THICKNESS`-wide box spanning (x, y) to (x + w, y + h).
pub fn draw_region(frame: &mut Frame, region: &MotionRegion) {
    for t in 0..BOX_THICKNESS {
        let w = (region.width + 1).saturating_sub(2 * t);
        let h = (region.height + 1).saturating_sub(2 * t);
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at((region.x + t) as i32, (region.y + t) as i32).of_size(w, h);
        draw_hollow_rect_mut(frame, rect, BOX_COLOR);
    }
}

/// Run the differencing loop over `source`, writing each annotated earlier
/// frame of a pair to the sink built by `open_sink(width, height)`.
///
/// The last decoded frame is only ever the later half of a pair, so the
/// output holds one frame fewer than the source.
pub fn annotate_motion<S, K, F>(source: &mut S, open_sink: F) -> Result<MotionReport, AnalysisError>
where
    S: FrameSource + ?Sized,
    K: FrameSink,
    F: FnOnce(u32, u32) -> Result<K, EncodeError>,
{
    let Some(mut current) = source.read_frame()? else {
        return Err(AnalysisError::InsufficientFrames { decoded: 0 });
    };
    let Some(mut next) = source.read_frame()? else {
        return Err(AnalysisError::InsufficientFrames { decoded: 1 });
    };

    let (width, height) = current.dimensions();
    let mut sink = open_sink(width, height)?;

    let mut frames_analyzed = 0u64;
    let mut motion_detected = false;

    loop {
        if next.dimensions() != (width, height) {
            let (width, height) = next.dimensions();
            return Err(DecodeError::Geometry { width, height }.into());
        }

        let regions = find_motion_regions(&current, &next);
        let mut drawn = 0usize;
        for region in regions.iter().filter(|r| is_significant(r.area)) {
            motion_detected = true;
            draw_region(&mut current, region);
            drawn += 1;
        }
        debug!(
            pair = frames_analyzed,
            contours = regions.len(),
            drawn,
            "motion pair processed"
        );

        sink.write_frame(&current)?;

        current = next;
        match source.read_frame()? {
            Some(frame) => {
                next = frame;
                frames_analyzed += 1;
            }
            None => break,
        }
    }

    sink.finish()?;
    info!(frames_analyzed, motion_detected, "motion annotation complete");
    Ok(MotionReport::success(frames_analyzed, motion_detected))
}

/// Decode `src`, annotate motion and encode the result to `dst` as XVID at
/// 20 fps. Failures come back as an `ERROR` report.
pub fn analyze_motion_file(ffmpeg: &FfmpegConfig, src: &Path, dst: &Path) -> MotionReport {
    annotate_file(ffmpeg, src, dst).into()
}

fn annotate_file(
    ffmpeg: &FfmpegConfig,
    src: &Path,
    dst: &Path,
) -> Result<MotionReport, AnalysisError> {
    let mut reader = FfmpegReader::open(ffmpeg, src)?;
    annotate_motion(&mut reader, |width, height| {
        FfmpegWriter::open(ffmpeg, dst, OUTPUT_FOURCC, OUTPUT_FPS, width, height)
    })
}
