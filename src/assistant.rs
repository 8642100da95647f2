#![cfg(feature = "web")]

//! Thin clients for the content-generation and web-search APIs.
//!
//! Requests are sent once; failures are reported to the caller as-is.

use crate::api::{ApiJson, ApiQuery, ApiResult, AuthUser, ok};
use crate::app::SharedState;
use axum::extract::State;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const SEARCH_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";
const MAX_PROMPT_LEN: usize = 8000;

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("input cannot be empty")]
    EmptyInput,

    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream error: {0}")]
    Upstream(String),
}

fn http_client() -> Result<Client, AssistantError> {
    Ok(Client::builder().timeout(Duration::from_secs(60)).build()?)
}

// Gemini wire format

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<GenerateContent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GenerateContent {
    #[serde(default)]
    parts: Vec<GeneratePart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeneratePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GenerateCandidate>,
}

#[derive(Debug, Deserialize)]
struct GenerateCandidate {
    content: Option<GenerateContent>,
}

fn first_candidate_text(response: GenerateResponse) -> Result<String, AssistantError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(AssistantError::Upstream("no candidates in response".to_string()));
    }
    Ok(text)
}

/// Client for the Gemini `generateContent` endpoint
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Result<Self, AssistantError> {
        Ok(GeminiClient {
            client: http_client()?,
            api_key,
            model,
        })
    }

    /// Generate text for a prompt and return the first candidate
    pub async fn generate(&self, prompt: &str) -> Result<String, AssistantError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(AssistantError::EmptyInput);
        }

        let body = GenerateRequest {
            contents: vec![GenerateContent {
                parts: vec![GeneratePart {
                    text: prompt.chars().take(MAX_PROMPT_LEN).collect(),
                }],
            }],
        };

        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                GEMINI_ENDPOINT, self.model
            ))
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            log::warn!("gemini answered {}: {}", status, text);
            return Err(AssistantError::Upstream(format!("gemini answered {}", status)));
        }

        first_candidate_text(response.json().await?)
    }
}

/// One web search result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchHit>,
}

/// Client for Google Custom Search
#[derive(Debug, Clone)]
pub struct SearchClient {
    client: Client,
    api_key: String,
    engine: String,
}

impl SearchClient {
    pub fn new(api_key: String, engine: String) -> Result<Self, AssistantError> {
        Ok(SearchClient {
            client: http_client()?,
            api_key,
            engine,
        })
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>, AssistantError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AssistantError::EmptyInput);
        }

        let response = self
            .client
            .get(SEARCH_ENDPOINT)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.engine.as_str()),
                ("q", query),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            log::warn!("search answered {}", status);
            return Err(AssistantError::Upstream(format!("search answered {}", status)));
        }

        let body: SearchResponse = response.json().await?;
        Ok(body.items)
    }
}

// Web handler functions below

#[derive(Debug, Deserialize)]
pub struct GenerateForm {
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct Generated {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

pub async fn handle_generate(
    State(state): State<SharedState>,
    caller: AuthUser,
    ApiJson(form): ApiJson<GenerateForm>,
) -> ApiResult<Generated> {
    let gemini = state
        .gemini
        .as_ref()
        .ok_or(AssistantError::NotConfigured("content generation"))?;
    let text = gemini.generate(&form.prompt).await?;
    log::info!("generated {} characters for user {}", text.len(), caller.user.id);
    ok(Generated { text })
}

pub async fn handle_search(
    State(state): State<SharedState>,
    _caller: AuthUser,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> ApiResult<Vec<SearchHit>> {
    let search = state
        .search
        .as_ref()
        .ok_or(AssistantError::NotConfigured("web search"))?;
    ok(search.search(&query.q).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_candidate_parts_are_joined() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"world"}]}},
                              {"content":{"parts":[{"text":"ignored"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(first_candidate_text(response).unwrap(), "Hello world");
    }

    #[test]
    fn empty_candidates_are_an_upstream_error() {
        let response: GenerateResponse = serde_json::from_str(r#"{"promptFeedback":{}}"#).unwrap();
        assert!(matches!(
            first_candidate_text(response),
            Err(AssistantError::Upstream(_))
        ));
    }

    #[test]
    fn search_items_default_to_empty() {
        let body: SearchResponse = serde_json::from_str(r#"{"kind":"customsearch#search"}"#).unwrap();
        assert!(body.items.is_empty());

        let body: SearchResponse = serde_json::from_str(
            r#"{"items":[{"title":"Mandelbrot set","link":"https://example.org/m","snippet":"z^2 + c"}]}"#,
        )
        .unwrap();
        assert_eq!(body.items[0].title, "Mandelbrot set");
    }
}
