use anyhow::{Context, Result, anyhow};
use axum::{extract::State, response::IntoResponse};
use serde_json::{Value, json};

use crate::auth::AppState;
use crate::error::ApiError;

/// Sent verbatim to the model; clients split the reply on "||".
const SUGGESTION_PROMPT: &str = "Create a list of three open-ended and engaging questions \
formatted as a single string. Each question should be separated by '||'. These questions are \
for an anonymous social messaging platform, like Qooh.me, and should be suitable for a diverse \
audience. Avoid personal or sensitive topics, focusing instead on universal themes that \
encourage friendly interaction. For example, your output should be structured like this: \
'What's a hobby you've recently started?||If you could have dinner with any historical figure, \
who would it be?||What's a simple thing that makes you happy?'. Ensure the questions are \
intriguing, foster curiosity, and contribute to a positive and welcoming conversational \
environment.";

/// Thin client for the generative backend that proposes conversation
/// starters. One request, complete text back.
pub struct Suggester {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl Suggester {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }

    pub async fn suggest(&self) -> Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        );

        let body = json!({
            "contents": [{ "parts": [{ "text": SUGGESTION_PROMPT }] }],
            "generationConfig": { "maxOutputTokens": 400 },
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("suggestion backend unreachable")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "suggestion backend returned {}",
                response.status()
            ));
        }

        let payload: Value = response
            .json()
            .await
            .context("suggestion backend sent malformed JSON")?;

        extract_text(&payload).ok_or_else(|| anyhow!("suggestion backend reply carried no text"))
    }
}

fn extract_text(payload: &Value) -> Option<String> {
    let parts = payload
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    if text.is_empty() { None } else { Some(text) }
}

pub async fn suggest_messages(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let text = state.suggester.suggest().await.map_err(ApiError::Internal)?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulls_text_out_of_a_generate_content_reply() {
        let payload = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "What made you smile today?||" },
                        { "text": "What's a skill you want to learn?" }
                    ]
                }
            }]
        });

        assert_eq!(
            extract_text(&payload).unwrap(),
            "What made you smile today?||What's a skill you want to learn?"
        );
    }

    #[test]
    fn empty_or_malformed_replies_yield_none() {
        assert!(extract_text(&json!({})).is_none());
        assert!(extract_text(&json!({ "candidates": [] })).is_none());
        assert!(
            extract_text(&json!({
                "candidates": [{ "content": { "parts": [] } }]
            }))
            .is_none()
        );
    }
}
