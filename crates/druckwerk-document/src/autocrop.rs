// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan auto-crop — straighten and crop the document area of scanned pages.
//
// Each page of a scanned PDF carries one full-page raster image. The
// pipeline extracts that image, estimates the document quadrilateral from
// the bright region, rotates the image so the top edge is horizontal, and
// crops to the corners' bounding box. Pages where no plausible
// quadrilateral is found pass through unchanged, so the page count of the
// output always equals the input.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, GrayImage, Rgb, RgbImage, imageops};
use imageproc::contrast::otsu_level;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use lopdf::{Document, Object};
use tracing::{debug, instrument, warn};

use druckwerk_core::error::{DruckwerkError, Result};

use crate::pdf::PdfBuilder;

/// JPEG quality for re-encoded pages.
const JPEG_QUALITY: u8 = 85;

/// Minimum share of bright pixels for a detection to count.
const MIN_BRIGHT_SHARE: f32 = 0.05;

/// Minimum share of the frame the detected region must span.
const MIN_REGION_SHARE: f32 = 0.10;

/// Auto-crop every page of a scanned PDF.
///
/// Page order and page count are preserved. Pages whose raster image cannot
/// be extracted are cloned verbatim into the output.
#[instrument(skip(bytes), fields(bytes_len = bytes.len()))]
pub fn autocrop_pdf(bytes: &[u8]) -> Result<Vec<u8>> {
    let doc = Document::load_mem(bytes)
        .map_err(|err| DruckwerkError::Pdf(format!("failed to load scan for cropping: {err}")))?;

    let pages = doc.get_pages();
    let mut page_numbers: Vec<u32> = pages.keys().copied().collect();
    page_numbers.sort();

    let mut builder = PdfBuilder::new();
    for page_num in page_numbers {
        let page_id = pages[&page_num];
        match extract_page_image(&doc, page_id) {
            Some((rgb, dpi)) => {
                let processed = process_page(rgb);
                let (width, height) = (processed.width(), processed.height());
                let jpeg = encode_jpeg(&processed)?;
                builder.add_jpeg_page(jpeg, width, height, dpi);
            }
            None => {
                debug!(page_num, "no extractable raster, cloning page as-is");
                builder.add_cloned_page(&doc, page_id)?;
            }
        }
    }

    builder.finish()
}

/// Straighten and crop one page image, or return it unchanged when the
/// document region cannot be located.
fn process_page(rgb: RgbImage) -> RgbImage {
    let gray = DynamicImage::ImageRgb8(rgb.clone()).to_luma8();
    let blurred = gaussian_blur_f32(&gray, 2.0);

    match detect_corners(&blurred) {
        Some(corners) => straighten_and_crop(&rgb, corners).unwrap_or(rgb),
        None => rgb,
    }
}

/// Estimate the four corners of the document region.
///
/// The document is the bright region of the frame (the scan background is
/// dark). Corners are the extreme bright pixels along the two diagonals:
/// top-left minimises x+y, bottom-right maximises it, and so on. Returns
/// `None` when too few pixels are bright or the region is implausibly
/// small.
fn detect_corners(gray: &GrayImage) -> Option<[[f32; 2]; 4]> {
    let threshold = otsu_level(gray);
    let (width, height) = gray.dimensions();

    let mut bright: u64 = 0;
    // (x+y min, x-y max, x+y max, x-y min) -> tl, tr, br, bl
    let mut tl = (f32::MAX, [0f32; 2]);
    let mut tr = (f32::MIN, [0f32; 2]);
    let mut br = (f32::MIN, [0f32; 2]);
    let mut bl = (f32::MAX, [0f32; 2]);

    for (x, y, pixel) in gray.enumerate_pixels() {
        if pixel.0[0] < threshold {
            continue;
        }
        bright += 1;
        let (xf, yf) = (x as f32, y as f32);
        let sum = xf + yf;
        let diff = xf - yf;
        if sum < tl.0 {
            tl = (sum, [xf, yf]);
        }
        if diff > tr.0 {
            tr = (diff, [xf, yf]);
        }
        if sum > br.0 {
            br = (sum, [xf, yf]);
        }
        if diff < bl.0 {
            bl = (diff, [xf, yf]);
        }
    }

    let total = (width as u64) * (height as u64);
    if total == 0 || (bright as f32) < (total as f32) * MIN_BRIGHT_SHARE {
        return None;
    }

    let corners = [tl.1, tr.1, br.1, bl.1];
    let span_x = corners.iter().map(|c| c[0]).fold(f32::MIN, f32::max)
        - corners.iter().map(|c| c[0]).fold(f32::MAX, f32::min);
    let span_y = corners.iter().map(|c| c[1]).fold(f32::MIN, f32::max)
        - corners.iter().map(|c| c[1]).fold(f32::MAX, f32::min);
    if span_x * span_y < (width as f32) * (height as f32) * MIN_REGION_SHARE {
        return None;
    }

    Some(corners)
}

/// Rotate the image so the detected top edge is horizontal, then crop to
/// the corners' bounding box.
fn straighten_and_crop(rgb: &RgbImage, corners: [[f32; 2]; 4]) -> Option<RgbImage> {
    let [tl, tr, _, _] = corners;
    let angle = (tr[1] - tl[1]).atan2(tr[0] - tl[0]);

    // A quarter turn or more means the detection latched onto noise.
    if angle.abs() > std::f32::consts::FRAC_PI_4 {
        warn!(angle, "implausible skew angle, skipping crop");
        return None;
    }

    let (width, height) = rgb.dimensions();
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let theta = -angle;

    let rotated = if angle.abs() > f32::EPSILON {
        rotate_about_center(rgb, theta, Interpolation::Bilinear, Rgb([255, 255, 255]))
    } else {
        rgb.clone()
    };

    // Map the corners through the same rotation to find the crop box.
    let (sin, cos) = theta.sin_cos();
    let mut min_x = f32::MAX;
    let mut min_y = f32::MAX;
    let mut max_x = f32::MIN;
    let mut max_y = f32::MIN;
    for [x, y] in corners {
        let (dx, dy) = (x - cx, y - cy);
        let rx = cx + dx * cos - dy * sin;
        let ry = cy + dx * sin + dy * cos;
        min_x = min_x.min(rx);
        min_y = min_y.min(ry);
        max_x = max_x.max(rx);
        max_y = max_y.max(ry);
    }

    let x0 = min_x.floor().clamp(0.0, (width - 1) as f32) as u32;
    let y0 = min_y.floor().clamp(0.0, (height - 1) as f32) as u32;
    let x1 = max_x.ceil().clamp(0.0, width as f32) as u32;
    let y1 = max_y.ceil().clamp(0.0, height as f32) as u32;
    if x1 <= x0 + 1 || y1 <= y0 + 1 {
        return None;
    }

    Some(imageops::crop_imm(&rotated, x0, y0, x1 - x0, y1 - y0).to_image())
}

fn encode_jpeg(rgb: &RgbImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    encoder
        .encode(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|err| DruckwerkError::Image(format!("JPEG encoding failed: {err}")))?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Page image extraction
// ---------------------------------------------------------------------------

/// Pull the first raster image off a page, along with its effective DPI.
///
/// Scanned pages contain exactly one image covering the page box; the DPI
/// is recovered by comparing pixel dimensions against the media box.
fn extract_page_image(doc: &Document, page_id: lopdf::ObjectId) -> Option<(RgbImage, f32)> {
    let page_dict = doc.get_object(page_id).ok()?.as_dict().ok()?;

    let resources = resolve(doc, page_dict.get(b"Resources").ok()?)?
        .as_dict()
        .ok()?;
    let xobjects = resolve(doc, resources.get(b"XObject").ok()?)?
        .as_dict()
        .ok()?;

    let mut decoded = None;
    for (_name, value) in xobjects.iter() {
        let Some(Object::Stream(stream)) = resolve(doc, value) else {
            continue;
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .ok()
            .and_then(|s| s.as_name().ok())
            .is_some_and(|name| name == b"Image");
        if !is_image {
            continue;
        }

        // DCTDecode streams hold a complete JPEG; anything else is tried
        // after decompression.
        let raw = if has_filter(doc, &stream.dict, b"DCTDecode") {
            stream.content.clone()
        } else {
            stream.decompressed_content().ok()?
        };
        match image::load_from_memory(&raw) {
            Ok(img) => {
                decoded = Some(img.to_rgb8());
                break;
            }
            Err(err) => {
                warn!(%err, "undecodable page image");
                return None;
            }
        }
    }

    let rgb = decoded?;

    let page_width_pt = media_box_width(doc, page_dict).unwrap_or(612.0);
    let dpi = if page_width_pt > 0.0 {
        (rgb.width() as f32 / page_width_pt) * 72.0
    } else {
        300.0
    };
    Some((rgb, dpi))
}

/// Follow a reference to its object; pass direct objects through.
fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn has_filter(doc: &Document, dict: &lopdf::Dictionary, name: &[u8]) -> bool {
    let Some(filter) = dict.get(b"Filter").ok().and_then(|f| resolve(doc, f)) else {
        return false;
    };
    match filter {
        Object::Name(n) => n == name,
        Object::Array(items) => items
            .iter()
            .any(|item| matches!(item, Object::Name(n) if n == name)),
        _ => false,
    }
}

fn media_box_width(doc: &Document, page_dict: &lopdf::Dictionary) -> Option<f32> {
    let media_box = resolve(doc, page_dict.get(b"MediaBox").ok()?)?
        .as_array()
        .ok()?;
    if media_box.len() != 4 {
        return None;
    }
    let x0 = as_number(&media_box[0])?;
    let x1 = as_number(&media_box[2])?;
    Some((x1 - x0).abs())
}

fn as_number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::page_count;

    /// Dark frame with a bright axis-aligned rectangle at (x0, y0)..(x1, y1).
    fn frame_with_document(w: u32, h: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            if x >= x0 && x < x1 && y >= y0 && y < y1 {
                Rgb([250, 250, 250])
            } else {
                Rgb([12, 12, 12])
            }
        })
    }

    fn to_jpeg(rgb: &RgbImage) -> Vec<u8> {
        encode_jpeg(rgb).expect("jpeg")
    }

    fn scan_pdf(pages: &[RgbImage]) -> Vec<u8> {
        let mut builder = PdfBuilder::new();
        for page in pages {
            builder.add_jpeg_page(to_jpeg(page), page.width(), page.height(), 300.0);
        }
        builder.finish().expect("pdf")
    }

    #[test]
    fn corners_of_axis_aligned_document() {
        let rgb = frame_with_document(100, 100, 20, 30, 80, 70);
        let gray = DynamicImage::ImageRgb8(rgb).to_luma8();
        let corners = detect_corners(&gray).expect("corners");

        let [tl, tr, br, bl] = corners;
        assert!((tl[0] - 20.0).abs() <= 2.0 && (tl[1] - 30.0).abs() <= 2.0);
        assert!((tr[0] - 79.0).abs() <= 2.0 && (tr[1] - 30.0).abs() <= 2.0);
        assert!((br[0] - 79.0).abs() <= 2.0 && (br[1] - 69.0).abs() <= 2.0);
        assert!((bl[0] - 20.0).abs() <= 2.0 && (bl[1] - 69.0).abs() <= 2.0);
    }

    #[test]
    fn tiny_bright_speck_is_not_a_document() {
        // A 2x2 speck on an 80x80 frame is far below the bright-share
        // floor, so detection must refuse it.
        let rgb = frame_with_document(80, 80, 40, 40, 42, 42);
        let gray = DynamicImage::ImageRgb8(rgb).to_luma8();
        assert!(detect_corners(&gray).is_none());
    }

    #[test]
    fn process_crops_to_document_region() {
        let rgb = frame_with_document(200, 200, 40, 60, 160, 140);
        let cropped = process_page(rgb);
        // 120x80 region, give or take JPEG-free pixel rounding.
        assert!((cropped.width() as i64 - 120).unsigned_abs() <= 4);
        assert!((cropped.height() as i64 - 80).unsigned_abs() <= 4);
    }

    #[test]
    fn autocrop_preserves_page_count() {
        let pages = vec![
            frame_with_document(120, 160, 10, 10, 110, 150),
            frame_with_document(120, 160, 20, 20, 100, 140),
            frame_with_document(120, 160, 5, 5, 60, 80),
        ];
        let pdf = scan_pdf(&pages);
        assert_eq!(page_count(&pdf).expect("count"), 3);

        let cropped = autocrop_pdf(&pdf).expect("autocrop");
        assert_eq!(page_count(&cropped).expect("count"), 3);
    }

    #[test]
    fn pages_without_rasters_pass_through() {
        // A zero-page document has nothing to crop and must survive.
        let empty = PdfBuilder::new().finish().expect("pdf");
        let out = autocrop_pdf(&empty).expect("autocrop");
        assert_eq!(page_count(&out).expect("count"), 0);
    }
}
