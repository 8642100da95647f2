//! Server side of the creative sandbox widgets.

#[cfg(feature = "web")]
use crate::api::{ApiError, ApiJson, ApiQuery, ApiResult, ok};
use crate::color::{Color, ColorError, ColorReport, ColorSpace, convert, convert_all};
use crate::fractal::{FractalError, FractalKind, FractalRequest, Palette, render_png};
#[cfg(feature = "web")]
use axum::http::header;
#[cfg(feature = "web")]
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// Flat query-string form of a fractal request
///
/// Absent fields take the values of `FractalRequest::default()`; the
/// kind-specific fields only matter for their kind.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FractalQuery {
    pub kind: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub max_iterations: Option<u32>,
    pub zoom: Option<f64>,
    pub center_x: Option<f64>,
    pub center_y: Option<f64>,
    pub palette: Option<Palette>,
    pub c_re: Option<f64>,
    pub c_im: Option<f64>,
    pub depth: Option<u32>,
    pub points: Option<u32>,
    pub seed: Option<u64>,
}

impl FractalQuery {
    pub fn into_request(self) -> Result<FractalRequest, FractalError> {
        let defaults = FractalRequest::default();

        let kind = match self.kind.as_deref().unwrap_or("mandelbrot") {
            "mandelbrot" => FractalKind::Mandelbrot,
            "julia" => FractalKind::Julia {
                c_re: self.c_re.unwrap_or(-0.8),
                c_im: self.c_im.unwrap_or(0.156),
            },
            "sierpinski" => FractalKind::Sierpinski {
                depth: self.depth.unwrap_or(6),
            },
            "koch" => FractalKind::Koch {
                depth: self.depth.unwrap_or(4),
            },
            "fern" | "barnsley_fern" => FractalKind::BarnsleyFern {
                points: self.points.unwrap_or(50_000),
                seed: self.seed.unwrap_or(1),
            },
            other => {
                return Err(FractalError::InvalidRequest(format!(
                    "unknown fractal kind '{}'",
                    other
                )));
            }
        };

        // Escape-time views of Julia sets are centered on the origin.
        let default_center_x = match kind {
            FractalKind::Mandelbrot => defaults.center_x,
            _ => 0.0,
        };

        let request = FractalRequest {
            kind,
            width: self.width.unwrap_or(defaults.width),
            height: self.height.unwrap_or(defaults.height),
            max_iterations: self.max_iterations.unwrap_or(defaults.max_iterations),
            zoom: self.zoom.unwrap_or(defaults.zoom),
            center_x: self.center_x.unwrap_or(default_center_x),
            center_y: self.center_y.unwrap_or(defaults.center_y),
            palette: self.palette.unwrap_or(defaults.palette),
        };
        request.validate()?;
        Ok(request)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConvertRequest {
    pub color: Color,
    /// Space to convert into; every space is reported either way
    #[serde(default)]
    pub target: Option<ColorSpace>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertResponse {
    pub converted: Option<Color>,
    pub report: ColorReport,
}

pub fn convert_color(request: &ConvertRequest) -> Result<ConvertResponse, ColorError> {
    let converted = request
        .target
        .map(|target| convert(request.color, target))
        .transpose()?;
    Ok(ConvertResponse {
        converted,
        report: convert_all(request.color)?,
    })
}

// Web handler functions below (only compiled with "web" feature)

#[cfg(feature = "web")]
pub async fn handle_fractal(ApiQuery(query): ApiQuery<FractalQuery>) -> Result<Response, ApiError> {
    let request = query.into_request()?;
    let png = tokio::task::spawn_blocking(move || render_png(&request))
        .await
        .map_err(|e| ApiError::new(axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))??;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

#[cfg(feature = "web")]
pub async fn handle_convert(ApiJson(request): ApiJson<ConvertRequest>) -> ApiResult<ConvertResponse> {
    ok(convert_color(&request)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Rgb;

    #[test]
    fn empty_query_is_the_default_view() {
        let request = FractalQuery::default().into_request().unwrap();
        assert_eq!(request, FractalRequest::default());
    }

    #[test]
    fn julia_query_carries_its_constant() {
        let query = FractalQuery {
            kind: Some("julia".into()),
            c_re: Some(0.285),
            c_im: Some(0.01),
            ..Default::default()
        };
        let request = query.into_request().unwrap();
        assert_eq!(request.kind, FractalKind::Julia { c_re: 0.285, c_im: 0.01 });
        assert_eq!(request.center_x, 0.0);
    }

    #[test]
    fn unknown_kind_and_bad_sizes_are_rejected() {
        let query = FractalQuery {
            kind: Some("dragon".into()),
            ..Default::default()
        };
        assert!(query.into_request().is_err());

        let query = FractalQuery {
            width: Some(0),
            ..Default::default()
        };
        assert!(query.into_request().is_err());
    }

    #[test]
    fn conversion_reports_every_space() {
        let response = convert_color(&ConvertRequest {
            color: Color::Rgb(Rgb::new(255, 0, 0)),
            target: Some(ColorSpace::Hsl),
        })
        .unwrap();

        assert_eq!(response.report.hex, "#ff0000");
        match response.converted {
            Some(Color::Hsl(hsl)) => {
                assert!(hsl.h.abs() < 1e-9);
                assert!((hsl.s - 100.0).abs() < 1e-9);
                assert!((hsl.l - 50.0).abs() < 1e-9);
            }
            other => panic!("expected HSL, got {:?}", other),
        }
    }
}
