use image::codecs::jpeg::JpegEncoder;
use image::Rgb;

use crate::models::detection::{BoundingBox, Detection, Frame};

/// Outline color for drawn boxes.
pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Outline thickness in pixels.
pub const BOX_THICKNESS: u32 = 2;

/// Copy of `frame` with boxes drawn around detections.
///
/// With `only_label` set, boxes for other labels are left out.
pub fn annotate(frame: &Frame, detections: &[Detection], only_label: Option<&str>) -> Frame {
    let mut annotated = frame.clone();
    for detection in detections {
        if only_label.is_some_and(|label| label != detection.label) {
            continue;
        }
        draw_box(&mut annotated, &detection.bbox, BOX_COLOR, BOX_THICKNESS);
    }
    annotated
}

/// Draw a rectangle outline, clipped to the frame.
pub fn draw_box(frame: &mut Frame, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    let (width, height) = frame.dimensions();
    let x2 = bbox.x2.min(width);
    let y2 = bbox.y2.min(height);
    if bbox.x1 >= x2 || bbox.y1 >= y2 {
        return;
    }

    for y in bbox.y1..y2 {
        for x in bbox.x1..x2 {
            let on_edge = x < bbox.x1 + thickness
                || x + thickness >= x2
                || y < bbox.y1 + thickness
                || y + thickness >= y2;
            if on_edge {
                frame.put_pixel(x, y, color);
            }
        }
    }
}

/// Encode a frame as JPEG.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(frame)?;
    Ok(buf)
}
