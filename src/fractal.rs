use crate::color::{Hsv, Rgb, hsv_to_rgb};
use image::{DynamicImage, ImageOutputFormat, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

pub const MAX_DIMENSION: u32 = 4096;
pub const MAX_ITERATIONS: u32 = 10_000;
pub const MAX_SIERPINSKI_DEPTH: u32 = 10;
pub const MAX_KOCH_DEPTH: u32 = 7;
pub const MAX_FERN_POINTS: u32 = 2_000_000;

// Bounding box of the Barnsley fern attractor.
const FERN_X: (f64, f64) = (-2.1820, 2.6558);
const FERN_Y: (f64, f64) = (0.0, 9.9983);

/// Errors produced while validating or rendering a fractal request
#[derive(Debug, Error)]
pub enum FractalError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
}

/// Available fractal constructions
///
/// Escape-time kinds (Mandelbrot, Julia) color every pixel; the
/// geometric kinds draw onto a white background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FractalKind {
    /// z -> z^2 + c with z0 = 0 and c = pixel
    Mandelbrot,

    /// z -> z^2 + c with z0 = pixel and a fixed c
    Julia { c_re: f64, c_im: f64 },

    /// Recursive subdivision of a triangle into three corner triangles
    Sierpinski { depth: u32 },

    /// Snowflake made of three Koch curves
    Koch { depth: u32 },

    /// Point cloud from the four affine maps of the Barnsley fern
    BarnsleyFern { points: u32, seed: u64 },
}

/// Coloring schemes for rendered fractals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Palette {
    Grayscale,
    Fire,
    Rainbow,
}

/// Everything needed to render one fractal image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FractalRequest {
    pub kind: FractalKind,
    pub width: u32,
    pub height: u32,
    pub max_iterations: u32,
    pub zoom: f64,
    pub center_x: f64,
    pub center_y: f64,
    pub palette: Palette,
}

impl Default for FractalRequest {
    /// Creates the classic Mandelbrot overview
    ///
    /// # Returns
    /// * `FractalRequest` - 600x400 Mandelbrot centered at (-0.5, 0) with 200 iterations
    fn default() -> Self {
        FractalRequest {
            kind: FractalKind::Mandelbrot,
            width: 600,
            height: 400,
            max_iterations: 200,
            zoom: 1.0,
            center_x: -0.5,
            center_y: 0.0,
            palette: Palette::Rainbow,
        }
    }
}

impl Palette {
    /// Map an escape fraction in 0..=1 to a color
    pub fn color(&self, t: f64) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        match self {
            Palette::Grayscale => {
                let v = (t * 255.0).round() as u8;
                Rgb::new(v, v, v)
            }
            Palette::Fire => {
                let r = (t * 3.0).min(1.0);
                let g = (t * 3.0 - 1.0).clamp(0.0, 1.0);
                let b = (t * 3.0 - 2.0).clamp(0.0, 1.0);
                Rgb::new(
                    (r * 255.0).round() as u8,
                    (g * 255.0).round() as u8,
                    (b * 255.0).round() as u8,
                )
            }
            Palette::Rainbow => hsv_to_rgb(Hsv {
                h: (t * 360.0) % 360.0,
                s: 100.0,
                v: 100.0,
            }),
        }
    }

    /// Ink used by the geometric constructions
    fn ink(&self) -> Rgb {
        match self {
            Palette::Grayscale => Rgb::new(0, 0, 0),
            Palette::Fire => Rgb::new(200, 40, 0),
            Palette::Rainbow => Rgb::new(20, 120, 40),
        }
    }
}

impl FractalRequest {
    /// Validate dimensions and kind-specific limits
    ///
    /// # Returns
    /// * `Result<(), FractalError>` - `InvalidRequest` naming the offending field
    pub fn validate(&self) -> Result<(), FractalError> {
        if self.width == 0 || self.width > MAX_DIMENSION {
            return Err(invalid(format!("width must be in 1..={}", MAX_DIMENSION)));
        }
        if self.height == 0 || self.height > MAX_DIMENSION {
            return Err(invalid(format!("height must be in 1..={}", MAX_DIMENSION)));
        }
        if self.max_iterations == 0 || self.max_iterations > MAX_ITERATIONS {
            return Err(invalid(format!(
                "max_iterations must be in 1..={}",
                MAX_ITERATIONS
            )));
        }
        if !self.zoom.is_finite() || self.zoom <= 0.0 {
            return Err(invalid("zoom must be a positive number".to_string()));
        }
        if !self.center_x.is_finite() || !self.center_y.is_finite() {
            return Err(invalid("center must be finite".to_string()));
        }

        match self.kind {
            FractalKind::Julia { c_re, c_im } if !c_re.is_finite() || !c_im.is_finite() => {
                Err(invalid("julia constant must be finite".to_string()))
            }
            FractalKind::Sierpinski { depth } if depth > MAX_SIERPINSKI_DEPTH => Err(invalid(
                format!("sierpinski depth must be at most {}", MAX_SIERPINSKI_DEPTH),
            )),
            FractalKind::Koch { depth } if depth > MAX_KOCH_DEPTH => Err(invalid(format!(
                "koch depth must be at most {}",
                MAX_KOCH_DEPTH
            ))),
            FractalKind::BarnsleyFern { points, .. }
                if points == 0 || points > MAX_FERN_POINTS =>
            {
                Err(invalid(format!(
                    "fern points must be in 1..={}",
                    MAX_FERN_POINTS
                )))
            }
            _ => Ok(()),
        }
    }

    /// Complex-plane coordinate of the center of pixel (px, py)
    pub fn pixel_to_plane(&self, px: u32, py: u32) -> (f64, f64) {
        let scale = 3.0 / (self.zoom * self.width.min(self.height) as f64);
        let re = self.center_x + (px as f64 + 0.5 - self.width as f64 / 2.0) * scale;
        let im = self.center_y - (py as f64 + 0.5 - self.height as f64 / 2.0) * scale;
        (re, im)
    }
}

fn invalid(message: String) -> FractalError {
    FractalError::InvalidRequest(message)
}

/// Escape-time iteration of z -> z^2 + c
///
/// # Arguments
/// * `z_re`, `z_im` - Starting point
/// * `c_re`, `c_im` - Constant added every step
/// * `max_iter` - Iteration budget
///
/// # Returns
/// * `Option<u32>` - Number of steps until |z|^2 exceeds 4, or `None` if it never does
pub fn escape_time(z_re: f64, z_im: f64, c_re: f64, c_im: f64, max_iter: u32) -> Option<u32> {
    let (mut x, mut y) = (z_re, z_im);
    for i in 0..max_iter {
        let x2 = x * x;
        let y2 = y * y;
        if x2 + y2 > 4.0 {
            return Some(i);
        }
        y = 2.0 * x * y + c_im;
        x = x2 - y2 + c_re;
    }
    None
}

/// Render a fractal into an RGB image
///
/// # Arguments
/// * `request` - Kind, dimensions and view parameters
///
/// # Returns
/// * `Result<RgbImage, FractalError>` - The rendered image or a validation error
pub fn render(request: &FractalRequest) -> Result<RgbImage, FractalError> {
    request.validate()?;

    let image = match &request.kind {
        FractalKind::Mandelbrot => render_escape_time(request, |re, im| (0.0, 0.0, re, im)),
        FractalKind::Julia { c_re, c_im } => {
            let (c_re, c_im) = (*c_re, *c_im);
            render_escape_time(request, move |re, im| (re, im, c_re, c_im))
        }
        FractalKind::Sierpinski { depth } => render_sierpinski(request, *depth),
        FractalKind::Koch { depth } => render_koch(request, *depth),
        FractalKind::BarnsleyFern { points, seed } => render_fern(request, *points, *seed),
    };

    Ok(image)
}

/// Render a fractal and encode it as PNG
pub fn render_png(request: &FractalRequest) -> Result<Vec<u8>, FractalError> {
    let image = render(request)?;
    encode_png(image)
}

pub(crate) fn encode_png(image: RgbImage) -> Result<Vec<u8>, FractalError> {
    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(image).write_to(&mut Cursor::new(&mut buffer), ImageOutputFormat::Png)?;
    Ok(buffer)
}

fn render_escape_time<F>(request: &FractalRequest, seed: F) -> RgbImage
where
    F: Fn(f64, f64) -> (f64, f64, f64, f64),
{
    let mut image = RgbImage::new(request.width, request.height);
    for py in 0..request.height {
        for px in 0..request.width {
            let (re, im) = request.pixel_to_plane(px, py);
            let (z_re, z_im, c_re, c_im) = seed(re, im);
            let rgb = match escape_time(z_re, z_im, c_re, c_im, request.max_iterations) {
                Some(n) => request
                    .palette
                    .color(n as f64 / request.max_iterations as f64),
                None => Rgb::new(0, 0, 0),
            };
            image.put_pixel(px, py, image::Rgb([rgb.r, rgb.g, rgb.b]));
        }
    }
    image
}

type Point = (f64, f64);

/// Leaf triangles of a Sierpinski construction inside a width x height canvas
///
/// # Returns
/// * `Vec<[Point; 3]>` - `3^depth` triangles (top, bottom-left, bottom-right)
pub fn sierpinski_triangles(depth: u32, width: u32, height: u32) -> Vec<[Point; 3]> {
    let margin = 0.05 * width.min(height) as f64;
    let top = (width as f64 / 2.0, margin);
    let left = (margin, height as f64 - margin);
    let right = (width as f64 - margin, height as f64 - margin);

    let mut out = Vec::with_capacity(3usize.pow(depth));
    subdivide([top, left, right], depth, &mut out);
    out
}

fn subdivide(tri: [Point; 3], depth: u32, out: &mut Vec<[Point; 3]>) {
    if depth == 0 {
        out.push(tri);
        return;
    }
    let [a, b, c] = tri;
    let ab = midpoint(a, b);
    let bc = midpoint(b, c);
    let ca = midpoint(c, a);
    subdivide([a, ab, ca], depth - 1, out);
    subdivide([ab, b, bc], depth - 1, out);
    subdivide([ca, bc, c], depth - 1, out);
}

fn midpoint(a: Point, b: Point) -> Point {
    ((a.0 + b.0) / 2.0, (a.1 + b.1) / 2.0)
}

fn render_sierpinski(request: &FractalRequest, depth: u32) -> RgbImage {
    let mut image = white_canvas(request.width, request.height);
    let ink = request.palette.ink();
    for tri in sierpinski_triangles(depth, request.width, request.height) {
        fill_triangle(&mut image, tri, ink);
    }
    image
}

/// Closed polyline of a Koch snowflake centered in a width x height canvas
///
/// The first point is repeated at the end, so the polyline has
/// `3 * 4^depth` segments.
pub fn koch_snowflake(depth: u32, width: u32, height: u32) -> Vec<Point> {
    let (w, h) = (width as f64, height as f64);
    let side = 0.8 * w.min(h * 2.0 / 3f64.sqrt());
    let tri_height = side * 3f64.sqrt() / 2.0;
    // The snowflake extends a third of the triangle height below the base.
    let top_y = (h - tri_height * 4.0 / 3.0) / 2.0;

    let a = (w / 2.0, top_y);
    let b = (w / 2.0 + side / 2.0, top_y + tri_height);
    let c = (w / 2.0 - side / 2.0, top_y + tri_height);

    let mut points = vec![a];
    for (start, end) in [(a, b), (b, c), (c, a)] {
        koch_segment(start, end, depth, &mut points);
    }
    points
}

// Pushes every point of the curve from `start` to `end`, excluding `start`.
fn koch_segment(start: Point, end: Point, depth: u32, points: &mut Vec<Point>) {
    if depth == 0 {
        points.push(end);
        return;
    }
    let dx = (end.0 - start.0) / 3.0;
    let dy = (end.1 - start.1) / 3.0;
    let p1 = (start.0 + dx, start.1 + dy);
    let p3 = (start.0 + 2.0 * dx, start.1 + 2.0 * dy);

    // Rotate the middle third by -60 degrees so the bump points outward
    // for a clockwise traversal in screen coordinates.
    let (sin, cos) = (-std::f64::consts::FRAC_PI_3).sin_cos();
    let p2 = (p1.0 + dx * cos - dy * sin, p1.1 + dx * sin + dy * cos);

    koch_segment(start, p1, depth - 1, points);
    koch_segment(p1, p2, depth - 1, points);
    koch_segment(p2, p3, depth - 1, points);
    koch_segment(p3, end, depth - 1, points);
}

fn render_koch(request: &FractalRequest, depth: u32) -> RgbImage {
    let mut image = white_canvas(request.width, request.height);
    let ink = request.palette.ink();
    let points = koch_snowflake(depth, request.width, request.height);
    for pair in points.windows(2) {
        draw_line(&mut image, pair[0], pair[1], ink);
    }
    image
}

/// Sample the Barnsley fern attractor
///
/// # Arguments
/// * `count` - Number of points to return
/// * `seed` - RNG seed, equal seeds give equal point clouds
pub fn barnsley_points(count: u32, seed: u64) -> Vec<Point> {
    let mut rng = StdRng::seed_from_u64(seed);
    let (mut x, mut y) = (0.0f64, 0.0f64);
    let mut points = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let r: f64 = rng.gen_range(0.0..1.0);
        let (nx, ny) = if r < 0.01 {
            (0.0, 0.16 * y)
        } else if r < 0.86 {
            (0.85 * x + 0.04 * y, -0.04 * x + 0.85 * y + 1.6)
        } else if r < 0.93 {
            (0.20 * x - 0.26 * y, 0.23 * x + 0.22 * y + 1.6)
        } else {
            (-0.15 * x + 0.28 * y, 0.26 * x + 0.24 * y + 0.44)
        };
        x = nx;
        y = ny;
        points.push((x, y));
    }
    points
}

fn render_fern(request: &FractalRequest, count: u32, seed: u64) -> RgbImage {
    let (w, h) = (request.width, request.height);
    let mut image = white_canvas(w, h);
    let ink = request.palette.ink();

    // Uniform scale keeps the fern's aspect ratio.
    let span_x = FERN_X.1 - FERN_X.0;
    let span_y = FERN_Y.1 - FERN_Y.0;
    let scale = ((w - 1) as f64 / span_x).min((h - 1) as f64 / span_y);
    let offset_x = (w as f64 - span_x * scale) / 2.0;
    let offset_y = (h as f64 - span_y * scale) / 2.0;

    for (x, y) in barnsley_points(count, seed) {
        let px = offset_x + (x - FERN_X.0) * scale;
        let py = h as f64 - 1.0 - (offset_y + (y - FERN_Y.0) * scale);
        put(&mut image, px.round() as i64, py.round() as i64, ink);
    }
    image
}

fn white_canvas(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255]))
}

fn put(image: &mut RgbImage, x: i64, y: i64, rgb: Rgb) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, image::Rgb([rgb.r, rgb.g, rgb.b]));
    }
}

// Bresenham between rounded endpoints.
fn draw_line(image: &mut RgbImage, from: Point, to: Point, rgb: Rgb) {
    let (mut x0, mut y0) = (from.0.round() as i64, from.1.round() as i64);
    let (x1, y1) = (to.0.round() as i64, to.1.round() as i64);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        put(image, x0, y0, rgb);
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

// Fills pixels whose centers fall inside the triangle (edge-function test).
fn fill_triangle(image: &mut RgbImage, tri: [Point; 3], rgb: Rgb) {
    let [a, b, c] = tri;
    let min_x = a.0.min(b.0).min(c.0).floor().max(0.0) as i64;
    let max_x = a.0.max(b.0).max(c.0).ceil() as i64;
    let min_y = a.1.min(b.1).min(c.1).floor().max(0.0) as i64;
    let max_y = a.1.max(b.1).max(c.1).ceil() as i64;

    let edge = |p: Point, q: Point, r: Point| (q.0 - p.0) * (r.1 - p.1) - (q.1 - p.1) * (r.0 - p.0);
    let area = edge(a, b, c);
    if area == 0.0 {
        return;
    }

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let p = (x as f64 + 0.5, y as f64 + 0.5);
            let w0 = edge(b, c, p) / area;
            let w1 = edge(c, a, p) / area;
            let w2 = edge(a, b, p) / area;
            if w0 >= 0.0 && w1 >= 0.0 && w2 >= 0.0 {
                put(image, x, y, rgb);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_never_escapes_mandelbrot() {
        assert_eq!(escape_time(0.0, 0.0, 0.0, 0.0, 500), None);
        assert_eq!(escape_time(0.0, 0.0, -1.0, 0.0, 500), None);
    }

    #[test]
    fn far_points_escape_immediately() {
        assert_eq!(escape_time(0.0, 0.0, 2.0, 2.0, 500), Some(1));
        assert_eq!(escape_time(3.0, 0.0, 0.0, 0.0, 500), Some(0));
    }

    #[test]
    fn pixel_mapping_is_centered_and_y_up() {
        let request = FractalRequest {
            width: 100,
            height: 100,
            center_x: 1.0,
            center_y: 2.0,
            ..FractalRequest::default()
        };
        let (re, im) = request.pixel_to_plane(50, 50);
        assert!((re - 1.015).abs() < 1e-9);
        assert!((im - 1.985).abs() < 1e-9);

        let (_, top) = request.pixel_to_plane(0, 0);
        let (_, bottom) = request.pixel_to_plane(0, 99);
        assert!(top > bottom);
    }

    #[test]
    fn sierpinski_leaf_count() {
        assert_eq!(sierpinski_triangles(0, 64, 64).len(), 1);
        assert_eq!(sierpinski_triangles(4, 64, 64).len(), 81);
    }

    #[test]
    fn koch_segment_count_and_closure() {
        let points = koch_snowflake(3, 300, 300);
        assert_eq!(points.len(), 3 * 4usize.pow(3) + 1);
        let first = points[0];
        let last = points[points.len() - 1];
        assert!((first.0 - last.0).abs() < 1e-9 && (first.1 - last.1).abs() < 1e-9);
        for (x, y) in points {
            assert!((0.0..=300.0).contains(&x) && (0.0..=300.0).contains(&y));
        }
    }

    #[test]
    fn fern_is_deterministic_and_bounded() {
        let a = barnsley_points(5_000, 7);
        let b = barnsley_points(5_000, 7);
        assert_eq!(a, b);
        for (x, y) in a {
            assert!(x >= FERN_X.0 - 0.01 && x <= FERN_X.1 + 0.01);
            assert!(y >= FERN_Y.0 - 0.01 && y <= FERN_Y.1 + 0.01);
        }
    }

    #[test]
    fn validation_limits() {
        let mut request = FractalRequest::default();
        assert!(request.validate().is_ok());

        request.width = 0;
        assert!(request.validate().is_err());
        request.width = 10;

        request.zoom = 0.0;
        assert!(request.validate().is_err());
        request.zoom = 2.0;

        request.kind = FractalKind::Koch { depth: 8 };
        assert!(request.validate().is_err());

        request.kind = FractalKind::BarnsleyFern { points: 0, seed: 1 };
        assert!(request.validate().is_err());
    }

    #[test]
    fn mandelbrot_render_has_black_interior() {
        let request = FractalRequest {
            width: 60,
            height: 40,
            max_iterations: 100,
            ..FractalRequest::default()
        };
        let image = render(&request).unwrap();
        assert_eq!(image.dimensions(), (60, 40));

        // The pixel nearest (-0.5, 0) lies inside the main cardioid.
        assert_eq!(image.get_pixel(30, 20).0, [0, 0, 0]);
        // The top-left corner (-2.75, 1.5) escapes.
        assert_ne!(image.get_pixel(0, 0).0, [0, 0, 0]);
    }

    #[test]
    fn png_has_signature() {
        let request = FractalRequest {
            kind: FractalKind::Sierpinski { depth: 3 },
            width: 32,
            height: 32,
            ..FractalRequest::default()
        };
        let png = render_png(&request).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
