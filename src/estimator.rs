//! Turning a free-text meal description (and optionally a photo) into nutrition entries
//! via an OpenAI-compatible chat completions API.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result, ServiceErrorKind};
use crate::model::{now_millis, NutritionEntry};
use crate::settings::ApiSettings;

const MACRO_KEYS: [&str; 4] = ["calories", "protein", "carbs", "fat"];
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const SYSTEM_PROMPT: &str = "You are a nutrition assistant. Split the user's meal into individual foods and estimate each one. \
Answer with JSON only: an array of objects with the keys \"food\", \"quantity\", \"calories\", \"protein\", \"carbs\", \"fat\" and \"emoji\". \
Quantities are short strings such as \"1 medium\" or \"200 g\". Macros are grams, calories are kcal, all numbers.";

/// A photo to send along with the description.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl ImageInput {
    pub fn new(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            bytes,
            mime: mime.into(),
        }
    }

    /// Guess the MIME type from a file extension
    pub fn from_path_bytes(path: &std::path::Path, bytes: Vec<u8>) -> Self {
        let mime = match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => "image/png",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            _ => "image/jpeg",
        };
        Self::new(bytes, mime)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, BASE64.encode(&self.bytes))
    }
}

/// Something that can estimate nutrition for a description.
#[async_trait]
pub trait NutritionEstimator: Send + Sync {
    async fn describe(&self, text: &str, image: Option<&ImageInput>) -> Result<Vec<NutritionEntry>>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Value>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct HttpEstimator {
    client: reqwest::Client,
    api: ApiSettings,
}

impl HttpEstimator {
    pub fn new(api: ApiSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            api,
        }
    }

    fn endpoint(&self) -> Result<Url> {
        let base = format!("{}/", self.api.base_url.trim_end_matches('/'));
        Url::parse(&base)
            .and_then(|u| u.join("chat/completions"))
            .map_err(|e| Error::Validation(format!("invalid API base URL '{}': {}", self.api.base_url, e)))
    }

    fn build_request(&self, text: &str, image: Option<&ImageInput>) -> ChatRequest {
        let user_content = match image {
            Some(image) => json!([
                { "type": "text", "text": text },
                { "type": "image_url", "image_url": { "url": image.data_url() } }
            ]),
            None => Value::String(text.to_string()),
        };
        ChatRequest {
            model: self.api.model.clone(),
            messages: vec![
                json!({ "role": "system", "content": SYSTEM_PROMPT }),
                json!({ "role": "user", "content": user_content }),
            ],
            temperature: 0.2,
        }
    }
}

#[async_trait]
impl NutritionEstimator for HttpEstimator {
    async fn describe(&self, text: &str, image: Option<&ImageInput>) -> Result<Vec<NutritionEntry>> {
        let api_key = self
            .api
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::external(Some(401), "no API key configured"))?;
        let url = self.endpoint()?;
        let request = self.build_request(text, image);
        debug!(url = %url, model = %request.model, with_image = image.is_some(), "requesting estimate");

        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    Error::ExternalService {
                        kind: ServiceErrorKind::Network,
                        message: e.to_string(),
                    }
                } else {
                    Error::external(None, e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::external(
                Some(status.as_u16()),
                format!("HTTP {}: {}", status, body),
            ));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(format!("unexpected response body: {}", e)))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Parse("response had no message content".to_string()))?;

        let entries = parse_model_output(&content)?;
        info!(count = entries.len(), "estimated nutrition");
        Ok(entries)
    }
}

// Model output sometimes arrives inside a ```json fence
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse the model's answer: a JSON array of items, or an object with an `items` array.
/// Every item must have a food name and four numeric macros.
pub fn parse_model_output(text: &str) -> Result<Vec<NutritionEntry>> {
    let value: Value = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| Error::Parse(format!("not JSON: {}", e)))?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            _ => return Err(Error::Parse("object without an items array".to_string())),
        },
        _ => return Err(Error::Parse("expected an array of items".to_string())),
    };
    if items.is_empty() {
        return Err(Error::Parse("no food items in answer".to_string()));
    }

    let captured = now_millis();
    items
        .into_iter()
        .map(|item| {
            if let Some(key) = MACRO_KEYS.iter().find(|k| item.get(**k).is_none()) {
                return Err(Error::Parse(format!("item is missing {}", key)));
            }
            let mut entry: NutritionEntry = serde_json::from_value(item)
                .map_err(|e| Error::Parse(format!("malformed item: {}", e)))?;
            if let Some(field) = entry.invalid_macro() {
                return Err(Error::Parse(format!("'{}' is missing {}", entry.food, field)));
            }
            if entry.food.trim().is_empty() {
                return Err(Error::Parse("item without a food name".to_string()));
            }
            entry.timestamp.get_or_insert(captured);
            Ok(entry)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_array() {
        let out = r#"[{"food": "Banana", "quantity": "1 medium", "calories": 105, "protein": 1.3, "carbs": 27, "fat": 0.4, "emoji": "🍌"}]"#;
        let entries = parse_model_output(out).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].food, "Banana");
        assert_eq!(entries[0].emoji.as_deref(), Some("🍌"));
        assert!(entries[0].timestamp.is_some());
    }

    #[test]
    fn test_parse_fenced_items_object() {
        let out = "```json\n{\"items\": [{\"food\": \"Toast\", \"quantity\": \"2 slices\", \"calories\": \"160\", \"protein\": 6, \"carbs\": 30, \"fat\": 2}]}\n```";
        let entries = parse_model_output(out).unwrap();
        assert_eq!(entries[0].calories, 160.0);
    }

    #[test]
    fn test_parse_rejects_missing_macro() {
        let out = r#"[{"food": "Soup", "quantity": "1 bowl", "calories": 120, "protein": null, "carbs": 10, "fat": 4}]"#;
        let err = parse_model_output(out).unwrap_err();
        assert!(matches!(err, Error::Parse(ref m) if m.contains("protein")));
    }

    #[test]
    fn test_parse_rejects_absent_macro_key() {
        let out = r#"[{"food": "Rice", "quantity": "1 cup", "calories": 200, "protein": 4, "carbs": 45}]"#;
        let err = parse_model_output(out).unwrap_err();
        assert!(matches!(err, Error::Parse(ref m) if m.contains("fat")));
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(matches!(parse_model_output("I think it was about 300 kcal"), Err(Error::Parse(_))));
        assert!(matches!(parse_model_output("[]"), Err(Error::Parse(_))));
        assert!(matches!(parse_model_output(r#"{"answer": 1}"#), Err(Error::Parse(_))));
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let mut api = ApiSettings::default();
        api.base_url = "https://llm.example.com/v1/".into();
        let estimator = HttpEstimator::new(api);
        assert_eq!(
            estimator.endpoint().unwrap().as_str(),
            "https://llm.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_carries_image_as_data_url() {
        let estimator = HttpEstimator::new(ApiSettings::default());
        let image = ImageInput::new(vec![1, 2, 3], "image/png");
        let request = estimator.build_request("lunch", Some(&image));
        let body = serde_json::to_string(&request).unwrap();
        assert!(body.contains("data:image/png;base64,AQID"));
        assert!(body.contains("\"model\":\"gpt-4o-mini\""));
    }

    #[tokio::test]
    async fn test_missing_key_is_auth_error_without_request() {
        let estimator = HttpEstimator::new(ApiSettings::default());
        let err = estimator.describe("apple", None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ExternalService {
                kind: ServiceErrorKind::Auth,
                ..
            }
        ));
    }
}
