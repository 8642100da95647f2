//! Progress charts rendered to PNG.
//!
//! Drawing happens into an in-memory RGB buffer through plotters'
//! bitmap backend; the buffer is then encoded with the same PNG encoder
//! the fractal renderer uses.

#[cfg(feature = "web")]
use crate::api::{ApiError, AuthUser};
#[cfg(feature = "web")]
use crate::app::SharedState;
use crate::fractal::{FractalError, encode_png};
use crate::models::Id;
use crate::store::Store;
#[cfg(feature = "web")]
use axum::extract::State;
#[cfg(feature = "web")]
use axum::http::header;
#[cfg(feature = "web")]
use axum::response::IntoResponse;
use image::RgbImage;
use plotters::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("chart drawing failed: {0}")]
    Draw(String),

    #[error(transparent)]
    Encode(#[from] FractalError),
}

/// Configuration options for chart generation
#[derive(Clone, Debug)]
pub struct ChartOptions {
    /// Title displayed at the top of the chart
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub width: u32,
    pub height: u32,
}

impl ChartOptions {
    fn new(title: &str, x_label: &str, y_label: &str) -> Self {
        ChartOptions {
            title: title.to_string(),
            x_label: x_label.to_string(),
            y_label: y_label.to_string(),
            width: 800,
            height: 600,
        }
    }
}

fn draw_err<E: std::fmt::Display>(err: E) -> ChartError {
    ChartError::Draw(err.to_string())
}

/// Minutes spent per lesson, in lesson id order
///
/// Lessons the user never opened are left out.
pub fn time_series(store: &Store, user_id: Id) -> Vec<(String, f64)> {
    store.read(|db| {
        db.trackers
            .range((user_id, Id::MIN)..=(user_id, Id::MAX))
            .filter_map(|((_, lesson_id), tracker)| {
                let title = db.lessons.get(lesson_id)?.title.clone();
                Some((title, tracker.seconds as f64 / 60.0))
            })
            .collect()
    })
}

/// Percent score of every test attempt, oldest first
pub fn score_series(store: &Store, user_id: Id) -> Vec<f64> {
    store.read(|db| {
        let mut attempts: Vec<_> = db
            .attempts
            .iter()
            .filter(|a| a.user_id == user_id && a.max_score > 0)
            .collect();
        attempts.sort_by_key(|a| a.submitted_at);
        attempts
            .iter()
            .map(|a| a.score as f64 * 100.0 / a.max_score as f64)
            .collect()
    })
}

fn into_png(buffer: Vec<u8>, options: &ChartOptions) -> Result<Vec<u8>, ChartError> {
    let image = RgbImage::from_raw(options.width, options.height, buffer)
        .ok_or_else(|| ChartError::Draw("buffer size does not match the chart".to_string()))?;
    Ok(encode_png(image)?)
}

/// Bar chart of minutes spent per lesson
pub fn time_chart(data: &[(String, f64)]) -> Result<Vec<u8>, ChartError> {
    let options = ChartOptions::new("Time spent", "Lesson", "Minutes");
    let mut buffer = vec![0u8; (options.width * options.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (options.width, options.height))
            .into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;

        let max_y = data.iter().map(|(_, m)| *m).fold(1.0, f64::max);
        let bars = data.len().max(1) as f64;

        let mut chart = ChartBuilder::on(&root)
            .caption(&options.title, ("sans-serif", 30).into_font())
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(0.0..bars, 0.0..max_y * 1.1)
            .map_err(draw_err)?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(data.len().max(1))
            .x_label_formatter(&|x| {
                data.get(x.floor() as usize)
                    .map(|(title, _)| title.chars().take(12).collect())
                    .unwrap_or_default()
            })
            .x_desc(&options.x_label)
            .y_desc(&options.y_label)
            .draw()
            .map_err(draw_err)?;

        chart
            .draw_series(data.iter().enumerate().map(|(i, (_, minutes))| {
                let x = i as f64;
                Rectangle::new([(x + 0.15, 0.0), (x + 0.85, *minutes)], BLUE.filled())
            }))
            .map_err(draw_err)?;

        root.present().map_err(draw_err)?;
    }

    into_png(buffer, &options)
}

/// Line chart of percent score per attempt
pub fn score_chart(data: &[f64]) -> Result<Vec<u8>, ChartError> {
    let options = ChartOptions::new("Test scores", "Attempt", "Percent");
    let mut buffer = vec![0u8; (options.width * options.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (options.width, options.height))
            .into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;

        let max_x = data.len().max(1) as f64 + 1.0;
        let mut chart = ChartBuilder::on(&root)
            .caption(&options.title, ("sans-serif", 30).into_font())
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(40)
            .build_cartesian_2d(0.0..max_x, 0.0..105.0)
            .map_err(draw_err)?;

        chart
            .configure_mesh()
            .x_desc(&options.x_label)
            .y_desc(&options.y_label)
            .draw()
            .map_err(draw_err)?;

        let points: Vec<(f64, f64)> = data
            .iter()
            .enumerate()
            .map(|(i, percent)| (i as f64 + 1.0, *percent))
            .collect();

        chart
            .draw_series(LineSeries::new(points.iter().copied(), &BLUE))
            .map_err(draw_err)?;
        chart
            .draw_series(
                points
                    .iter()
                    .map(|&(x, y)| Circle::new((x, y), 4, RED.filled())),
            )
            .map_err(draw_err)?;

        root.present().map_err(draw_err)?;
    }

    into_png(buffer, &options)
}

// Web handler functions below (only compiled with "web" feature)

#[cfg(feature = "web")]
fn png_response(png: Vec<u8>) -> axum::response::Response {
    ([(header::CONTENT_TYPE, "image/png")], png).into_response()
}

#[cfg(feature = "web")]
pub async fn handle_time_chart(
    State(state): State<SharedState>,
    caller: AuthUser,
) -> Result<axum::response::Response, ApiError> {
    let data = time_series(&state.store, caller.user.id);
    let png = tokio::task::spawn_blocking(move || time_chart(&data))
        .await
        .map_err(|e| ChartError::Draw(e.to_string()))??;
    Ok(png_response(png))
}

#[cfg(feature = "web")]
pub async fn handle_score_chart(
    State(state): State<SharedState>,
    caller: AuthUser,
) -> Result<axum::response::Response, ApiError> {
    let data = score_series(&state.store, caller.user.id);
    let png = tokio::task::spawn_blocking(move || score_chart(&data))
        .await
        .map_err(|e| ChartError::Draw(e.to_string()))??;
    Ok(png_response(png))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Attempt, Lesson, Tracker};
    use chrono::{Duration, Utc};

    #[test]
    fn series_are_built_from_the_store() {
        let store = Store::in_memory();
        store
            .write(|db| {
                let now = Utc::now();
                db.lessons.insert(
                    1,
                    Lesson {
                        id: 1,
                        title: "Colors".into(),
                        description: String::new(),
                        published: true,
                        created_at: now,
                        updated_at: now,
                    },
                );
                db.trackers.insert(
                    (7, 1),
                    Tracker {
                        user_id: 7,
                        lesson_id: 1,
                        seconds: 150,
                        updated_at: now,
                    },
                );
                // Tracker of another user
                db.trackers.insert(
                    (8, 1),
                    Tracker {
                        user_id: 8,
                        lesson_id: 1,
                        seconds: 60,
                        updated_at: now,
                    },
                );
                db.attempts.push(Attempt {
                    user_id: 7,
                    card_id: 3,
                    score: 1,
                    max_score: 4,
                    submitted_at: now,
                });
                db.attempts.push(Attempt {
                    user_id: 7,
                    card_id: 3,
                    score: 3,
                    max_score: 4,
                    submitted_at: now - Duration::minutes(5),
                });
                Ok(())
            })
            .unwrap();

        assert_eq!(time_series(&store, 7), vec![("Colors".to_string(), 2.5)]);
        assert_eq!(score_series(&store, 7), vec![75.0, 25.0]);
        assert!(score_series(&store, 8).is_empty());
    }
}
