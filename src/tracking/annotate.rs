//! Frame overlays: boxes, trails, the counting line and running tallies.
//!
//! Annotation never feeds back into counting.

use image::{Rgb, RgbImage};

use crate::models::detection::{BoundingBox, Point};
use crate::models::job::CountStats;
use crate::tracking::line_zone::CountingLine;
use crate::tracking::tracker::Track;

const PALETTE: [Rgb<u8>; 8] = [
    Rgb([230, 25, 75]),
    Rgb([60, 180, 75]),
    Rgb([255, 225, 25]),
    Rgb([0, 130, 200]),
    Rgb([245, 130, 48]),
    Rgb([145, 30, 180]),
    Rgb([70, 240, 240]),
    Rgb([240, 50, 230]),
];

const LINE_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const IN_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const OUT_COLOR: Rgb<u8> = Rgb([220, 0, 0]);
const TALLY_CAP: u64 = 40;

pub fn track_color(track_id: u64) -> Rgb<u8> {
    PALETTE[(track_id % PALETTE.len() as u64) as usize]
}

/// Draw the overlay for one frame. `tracks` are the tracks observed this frame.
pub fn annotate_frame<'a>(
    image: &mut RgbImage,
    tracks: impl IntoIterator<Item = &'a Track>,
    line: &CountingLine,
    stats: CountStats,
) {
    for track in tracks {
        let color = track_color(track.id);
        draw_trace(image, track.trace.iter().copied(), color);
        draw_box(image, &track.bbox, color, 2);
        draw_badge(image, &track.bbox, track.id, color);
    }
    draw_segment(image, line.start, line.end, LINE_COLOR);
    draw_segment(
        image,
        Point::new(line.start.x, line.start.y + 1.0),
        Point::new(line.end.x, line.end.y + 1.0),
        LINE_COLOR,
    );
    draw_tally(image, stats);
}

fn put(image: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}

fn fill_rect(image: &mut RgbImage, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb<u8>) {
    for y in y0.max(0)..=y1.min(image.height() as i64 - 1) {
        for x in x0.max(0)..=x1.min(image.width() as i64 - 1) {
            put(image, x, y, color);
        }
    }
}

/// Box corners clamped into the frame, so loops stay bounded by the frame
/// size whatever the detector returned.
fn clamp_box(image: &RgbImage, bbox: &BoundingBox) -> (i64, i64, i64, i64) {
    let max_x = image.width().saturating_sub(1) as f32;
    let max_y = image.height().saturating_sub(1) as f32;
    (
        bbox.x_min.clamp(0.0, max_x).round() as i64,
        bbox.y_min.clamp(0.0, max_y).round() as i64,
        bbox.x_max.clamp(0.0, max_x).round() as i64,
        bbox.y_max.clamp(0.0, max_y).round() as i64,
    )
}

pub fn draw_box(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: i64) {
    let (x0, y0, x1, y1) = clamp_box(image, bbox);
    for t in 0..thickness {
        for x in x0..=x1 {
            put(image, x, y0 + t, color);
            put(image, x, y1 - t, color);
        }
        for y in y0..=y1 {
            put(image, x0 + t, y, color);
            put(image, x1 - t, y, color);
        }
    }
}

/// Solid badge above the box, one notch per id digit so ids stay tellable
/// without a font.
fn draw_badge(image: &mut RgbImage, bbox: &BoundingBox, track_id: u64, color: Rgb<u8>) {
    let digits = track_id.to_string().len() as i64;
    let (x0, top, _, _) = clamp_box(image, bbox);
    let y1 = top - 1;
    fill_rect(image, x0, y1 - 8, x0 + 6 * digits + 2, y1, color);
    for d in 0..digits {
        let x = x0 + 3 + 6 * d;
        fill_rect(image, x, y1 - 6, x + 2, y1 - 2, Rgb([0, 0, 0]));
    }
}

/// Liang-Barsky clip of a segment to the frame rectangle. `None` when the
/// segment misses the frame or has a non-finite endpoint.
fn clip_segment(image: &RgbImage, from: Point, to: Point) -> Option<(Point, Point)> {
    if ![from.x, from.y, to.x, to.y].iter().all(|v| v.is_finite()) {
        return None;
    }
    if image.width() == 0 || image.height() == 0 {
        return None;
    }
    let max_x = (image.width() - 1) as f32;
    let max_y = (image.height() - 1) as f32;
    let (dx, dy) = (to.x - from.x, to.y - from.y);

    let (mut t0, mut t1) = (0.0f32, 1.0f32);
    for (p, q) in [(-dx, from.x), (dx, max_x - from.x), (-dy, from.y), (dy, max_y - from.y)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    Some((
        Point::new(from.x + t0 * dx, from.y + t0 * dy),
        Point::new(from.x + t1 * dx, from.y + t1 * dy),
    ))
}

/// Bresenham segment, clipped to the image.
pub fn draw_segment(image: &mut RgbImage, from: Point, to: Point, color: Rgb<u8>) {
    let Some((from, to)) = clip_segment(image, from, to) else {
        return;
    };
    let (mut x0, mut y0) = (from.x.round() as i64, from.y.round() as i64);
    let (x1, y1) = (to.x.round() as i64, to.y.round() as i64);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put(image, x0, y0, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_trace(image: &mut RgbImage, points: impl Iterator<Item = Point>, color: Rgb<u8>) {
    let mut previous: Option<Point> = None;
    for point in points {
        if let Some(prev) = previous {
            draw_segment(image, prev, point, color);
        }
        previous = Some(point);
    }
}

/// One tick per crossing in the top-left corner: in on the first row, out on the second.
fn draw_tally(image: &mut RgbImage, stats: CountStats) {
    for (row, (count, color)) in [(stats.total_in, IN_COLOR), (stats.total_out, OUT_COLOR)]
        .into_iter()
        .enumerate()
    {
        let y = 6 + row as i64 * 14;
        for i in 0..count.min(TALLY_CAP) as i64 {
            let x = 6 + i * 6;
            fill_rect(image, x, y, x + 3, y + 9, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Anchor;
    use crate::models::detection::Detection;

    #[test]
    fn test_box_outline_drawn_and_clipped() {
        let mut image = RgbImage::new(50, 50);
        let color = Rgb([1, 2, 3]);
        draw_box(&mut image, &BoundingBox::new(10.0, 10.0, 80.0, 20.0), color, 1);
        assert_eq!(*image.get_pixel(10, 10), color);
        assert_eq!(*image.get_pixel(49, 20), color);
        assert_eq!(*image.get_pixel(30, 15), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_segment_reaches_both_ends() {
        let mut image = RgbImage::new(20, 20);
        let color = Rgb([9, 9, 9]);
        draw_segment(&mut image, Point::new(0.0, 0.0), Point::new(19.0, 7.0), color);
        assert_eq!(*image.get_pixel(0, 0), color);
        assert_eq!(*image.get_pixel(19, 7), color);
    }

    #[test]
    fn test_runaway_coordinates_stay_inside_frame() {
        let mut image = RgbImage::new(40, 30);
        let color = Rgb([5, 5, 5]);
        let wild = BoundingBox::new(-1e30, 10.0, 1e30, 1e30);
        draw_box(&mut image, &wild, color, 2);
        draw_badge(&mut image, &wild, 12, color);
        assert_eq!(*image.get_pixel(0, 10), color);
        assert_eq!(*image.get_pixel(39, 29), color);

        draw_segment(&mut image, Point::new(-1e30, 5.0), Point::new(1e30, 5.0), color);
        draw_segment(&mut image, Point::new(-1000.0, 5.0), Point::new(1000.0, 5.0), color);
        assert_eq!(*image.get_pixel(20, 5), color);
        draw_segment(&mut image, Point::new(f32::NAN, 0.0), Point::new(3.0, 3.0), color);
        draw_segment(&mut image, Point::new(-50.0, -50.0), Point::new(-10.0, -5.0), color);
    }

    #[test]
    fn test_annotate_draws_line_and_tally() {
        let mut image = RgbImage::new(64, 64);
        let line = CountingLine::new(Point::new(0.0, 32.0), Point::new(63.0, 32.0)).unwrap();
        let track = Track::spawn(
            3,
            0,
            Detection::new("cow", 0.9, BoundingBox::new(20.0, 40.0, 40.0, 60.0)),
            Anchor::Center,
            10,
        );
        annotate_frame(&mut image, [&track], &line, CountStats::new(2, 1));

        assert_eq!(*image.get_pixel(40, 32), LINE_COLOR);
        assert_eq!(*image.get_pixel(20, 50), track_color(3));
        assert_eq!(*image.get_pixel(6, 6), IN_COLOR);
        assert_eq!(*image.get_pixel(12, 6), IN_COLOR);
        assert_eq!(*image.get_pixel(6, 20), OUT_COLOR);
        assert_eq!(*image.get_pixel(12, 20), Rgb([0, 0, 0]));
    }
}
