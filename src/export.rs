//! Progress report downloads for admins.

#[cfg(feature = "web")]
use crate::api::{AdminUser, ApiError};
#[cfg(feature = "web")]
use crate::app::SharedState;
#[cfg(feature = "web")]
use crate::error::ServiceError;
use crate::progress;
use crate::store::Database;
#[cfg(feature = "web")]
use axum::extract::State;
#[cfg(feature = "web")]
use axum::http::header;
#[cfg(feature = "web")]
use axum::response::{IntoResponse, Response};
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use serde::Serialize;

const HEADERS: [&str; 9] = [
    "username",
    "email",
    "lesson",
    "completed_cards",
    "total_cards",
    "percent",
    "score",
    "max_score",
    "minutes",
];

/// One line of the progress report
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExportRow {
    pub username: String,
    pub email: String,
    pub lesson: String,
    pub completed_cards: usize,
    pub total_cards: usize,
    pub percent: f64,
    pub score: u32,
    pub max_score: u32,
    pub minutes: f64,
}

/// Progress of every user in every lesson, ordered by user then lesson
pub fn progress_rows(db: &Database) -> Vec<ExportRow> {
    let mut rows = Vec::new();
    for user in db.users.values() {
        for lesson in db.lessons.values() {
            let Ok(p) = progress::compute(db, user.id, lesson.id) else {
                continue;
            };
            rows.push(ExportRow {
                username: user.username.clone(),
                email: user.email.clone(),
                lesson: lesson.title.clone(),
                completed_cards: p.completed_cards,
                total_cards: p.total_cards,
                percent: (p.percent * 10.0).round() / 10.0,
                score: p.score,
                max_score: p.max_score,
                minutes: (p.seconds_spent as f64 / 60.0 * 10.0).round() / 10.0,
            });
        }
    }
    rows
}

fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Convert report rows to CSV with a header line
pub fn to_csv(rows: &[ExportRow]) -> String {
    let mut csv_content = HEADERS.join(",");
    csv_content.push('\n');

    for row in rows {
        let fields = [
            escape_csv(&row.username),
            escape_csv(&row.email),
            escape_csv(&row.lesson),
            row.completed_cards.to_string(),
            row.total_cards.to_string(),
            row.percent.to_string(),
            row.score.to_string(),
            row.max_score.to_string(),
            row.minutes.to_string(),
        ];
        csv_content.push_str(&fields.join(","));
        csv_content.push('\n');
    }

    csv_content
}

/// Convert report rows to an XLSX workbook held in memory
pub fn to_xlsx(rows: &[ExportRow]) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Progress")?;

    for (col, title) in HEADERS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *title, &bold)?;
    }

    for (i, row) in rows.iter().enumerate() {
        let r = i as u32 + 1;
        worksheet.write_string(r, 0, &row.username)?;
        worksheet.write_string(r, 1, &row.email)?;
        worksheet.write_string(r, 2, &row.lesson)?;
        worksheet.write_number(r, 3, row.completed_cards as f64)?;
        worksheet.write_number(r, 4, row.total_cards as f64)?;
        worksheet.write_number(r, 5, row.percent)?;
        worksheet.write_number(r, 6, row.score as f64)?;
        worksheet.write_number(r, 7, row.max_score as f64)?;
        worksheet.write_number(r, 8, row.minutes)?;
    }

    workbook.save_to_buffer()
}

// Web handler functions below (only compiled with "web" feature)

#[cfg(feature = "web")]
fn download(content_type: &'static str, file_name: &'static str, bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        bytes,
    )
        .into_response()
}

#[cfg(feature = "web")]
pub async fn handle_export_csv(
    State(state): State<SharedState>,
    _admin: AdminUser,
) -> Result<Response, ApiError> {
    let rows = state.store.read(progress_rows);
    Ok(download(
        "text/csv; charset=utf-8",
        "progress.csv",
        to_csv(&rows).into_bytes(),
    ))
}

#[cfg(feature = "web")]
pub async fn handle_export_xlsx(
    State(state): State<SharedState>,
    _admin: AdminUser,
) -> Result<Response, ApiError> {
    let rows = state.store.read(progress_rows);
    let bytes = to_xlsx(&rows).map_err(|e| ServiceError::Storage(e.to_string()))?;
    Ok(download(
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "progress.xlsx",
        bytes,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(lesson: &str) -> ExportRow {
        ExportRow {
            username: "ada".into(),
            email: "ada@example.com".into(),
            lesson: lesson.into(),
            completed_cards: 1,
            total_cards: 4,
            percent: 25.0,
            score: 2,
            max_score: 3,
            minutes: 1.5,
        }
    }

    #[test]
    fn csv_escapes_text_fields() {
        let csv = to_csv(&[row("Colors, part \"one\"")]);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(HEADERS.join(",").as_str()));
        assert_eq!(
            lines.next(),
            Some("ada,ada@example.com,\"Colors, part \"\"one\"\"\",1,4,25,2,3,1.5")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn xlsx_is_a_zip_container() {
        let bytes = to_xlsx(&[row("Fractals")]).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }
}
