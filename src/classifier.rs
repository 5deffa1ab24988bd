use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::models::Severity;

pub const DEFAULT_RECOMMENDATION: &str = "Aguardando revisão manual.";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub severity: Severity,
    pub recommendation: String,
}

impl Analysis {
    /// Lowest severity and a manual-review note when no analysis exists.
    pub fn or_default(analysis: Option<Self>) -> Self {
        analysis.unwrap_or_else(|| Self {
            severity: Severity::Low,
            recommendation: DEFAULT_RECOMMENDATION.to_string(),
        })
    }
}

#[async_trait]
pub trait IncidentClassifier: Send + Sync {
    /// `None` covers a missing credential, a transport failure and a
    /// malformed answer alike.
    async fn analyze(&self, description: &str) -> Option<Analysis>;
}

pub struct GeminiClassifier {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl GeminiClassifier {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn request(&self, api_key: &str, description: &str) -> Result<Value, reqwest::Error> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        self.client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(&build_request(description))
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await
    }
}

#[async_trait]
impl IncidentClassifier for GeminiClassifier {
    async fn analyze(&self, description: &str) -> Option<Analysis> {
        let api_key = self.api_key.as_deref()?;

        match self.request(api_key, description).await {
            Ok(body) => {
                let analysis = parse_response(&body);
                if analysis.is_none() {
                    warn!("classifier returned an unusable answer");
                }
                analysis
            }
            Err(error) => {
                warn!(%error, "classifier request failed");
                None
            }
        }
    }
}

pub fn build_request(description: &str) -> Value {
    json!({
        "contents": [{
            "parts": [{
                "text": format!(
                    "Analise a seguinte ocorrência escolar e forneça uma classificação de \
                     gravidade (Baixa, Média, Alta, Crítica) e uma breve sugestão de conduta: \"{description}\""
                )
            }]
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": {
                    "severity": {
                        "type": "STRING",
                        "description": "A gravidade calculada (Baixa, Média, Alta ou Crítica)"
                    },
                    "recommendation": {
                        "type": "STRING",
                        "description": "Uma breve sugestão de como proceder"
                    }
                },
                "required": ["severity", "recommendation"]
            }
        }
    })
}

/// Pulls `{severity, recommendation}` out of the first candidate's text.
pub fn parse_response(body: &Value) -> Option<Analysis> {
    #[derive(Deserialize)]
    struct Answer {
        severity: String,
        recommendation: String,
    }

    let text = body
        .pointer("/candidates/0/content/parts/0/text")?
        .as_str()?;
    let answer: Answer = serde_json::from_str(text).ok()?;
    let severity = answer.severity.parse::<Severity>().ok()?;
    debug!(severity = severity.as_str(), "classifier answered");

    Some(Analysis {
        severity,
        recommendation: answer.recommendation.trim().to_string(),
    })
}

/// Stands in when no classification is wanted.
pub struct NoClassifier;

#[async_trait]
impl IncidentClassifier for NoClassifier {
    async fn analyze(&self, _description: &str) -> Option<Analysis> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(text: &str) -> Value {
        json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
    }

    #[test]
    fn parses_structured_answer() {
        let body = wrap(r#"{"severity":"Alta","recommendation":" Chamar os responsáveis. "}"#);
        assert_eq!(
            parse_response(&body),
            Some(Analysis {
                severity: Severity::High,
                recommendation: "Chamar os responsáveis.".to_string(),
            })
        );
    }

    #[test]
    fn severity_answer_is_case_insensitive() {
        let body = wrap(r#"{"severity":"média","recommendation":"Orientar o aluno."}"#);
        assert_eq!(parse_response(&body).map(|a| a.severity), Some(Severity::Medium));
    }

    #[test]
    fn unknown_severity_counts_as_no_answer() {
        let body = wrap(r#"{"severity":"Gravíssima","recommendation":"?"}"#);
        assert_eq!(parse_response(&body), None);
    }

    #[test]
    fn malformed_body_counts_as_no_answer() {
        assert_eq!(parse_response(&json!({ "candidates": [] })), None);
        assert_eq!(parse_response(&wrap("not json")), None);
    }

    #[test]
    fn default_analysis_uses_lowest_severity() {
        let analysis = Analysis::or_default(None);
        assert_eq!(analysis.severity, Severity::Low);
        assert_eq!(analysis.recommendation, DEFAULT_RECOMMENDATION);
    }

    #[test]
    fn request_embeds_description_and_schema() {
        let request = build_request("brigou no recreio");
        let prompt = request
            .pointer("/contents/0/parts/0/text")
            .and_then(Value::as_str)
            .unwrap();
        assert!(prompt.contains("brigou no recreio"));
        assert_eq!(
            request["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[tokio::test]
    async fn missing_api_key_skips_the_request() {
        let classifier = GeminiClassifier::new(None, "gemini-3-flash-preview")
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        assert_eq!(classifier.analyze("qualquer").await, None);
    }

    #[tokio::test]
    async fn transport_failure_yields_no_analysis() {
        let classifier = GeminiClassifier::new(Some("key".to_string()), "gemini-3-flash-preview")
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        assert_eq!(classifier.analyze("qualquer").await, None);
    }
}
