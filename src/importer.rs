use crate::error::{ServiceError, ServiceResult};
use crate::quiz::{NewAnswer, NewQuestion};

/// Parse a question bank in CSV form
///
/// One question per line: the question text followed by its answers.
/// Correct answers are prefixed with `*`; a literal leading star is
/// written `\*`. Fields may be double-quoted, with `""` standing for a
/// quote inside a quoted field. Blank lines and lines starting with `#`
/// are skipped. A question with more than one correct answer becomes a
/// multiple-choice question.
///
/// # Arguments
/// * `text` - CSV document
///
/// # Returns
/// * `ServiceResult<Vec<NewQuestion>>` - Questions in document order
///
/// # Examples
/// ```
/// use learnlab::importer::parse_questions_csv;
///
/// let csv = "What is 2+2?,3,*4,5\n\"Pick primes, all of them\",*2,*3,4";
/// let questions = parse_questions_csv(csv).unwrap();
/// assert_eq!(questions.len(), 2);
/// assert!(questions[1].multiple);
/// ```
pub fn parse_questions_csv(text: &str) -> ServiceResult<Vec<NewQuestion>> {
    let mut questions = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let fields = parse_csv_row(trimmed).map_err(|e| {
            ServiceError::validation(format!("line {}: {}", line_no, e))
        })?;
        let mut fields = fields.into_iter();

        let question_text = fields.next().unwrap_or_default().trim().to_string();
        if question_text.is_empty() {
            return Err(ServiceError::validation(format!(
                "line {}: missing question text",
                line_no
            )));
        }

        let answers: Vec<NewAnswer> = fields
            .map(|field| field.trim().to_string())
            .filter(|field| !field.is_empty())
            .map(|field| {
                if let Some(rest) = field.strip_prefix("\\*") {
                    NewAnswer {
                        text: format!("*{}", rest),
                        correct: false,
                    }
                } else if let Some(rest) = field.strip_prefix('*') {
                    NewAnswer {
                        text: rest.trim().to_string(),
                        correct: true,
                    }
                } else {
                    NewAnswer {
                        text: field,
                        correct: false,
                    }
                }
            })
            .collect();

        let multiple = answers.iter().filter(|a| a.correct).count() > 1;
        questions.push(NewQuestion {
            text: question_text,
            multiple,
            answers,
        });
    }

    if questions.is_empty() {
        return Err(ServiceError::validation("no questions found"));
    }
    Ok(questions)
}

// Parse a CSV row into a vector of strings
fn parse_csv_row(line: &str) -> Result<Vec<String>, &'static str> {
    let mut result = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    // Double quote inside quoted field - add a single quote
                    current_field.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                result.push(current_field);
                current_field = String::new();
            }
            _ => {
                current_field.push(c);
            }
        }
    }

    if in_quotes {
        return Err("unterminated quoted field");
    }

    // Add the last field
    result.push(current_field);

    Ok(result)
}
