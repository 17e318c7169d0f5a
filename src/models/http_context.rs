use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::errors::{EmulatorError, EmulatorResult};

/// HTTP methods the expectation engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "POST")]
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single request the test expects the client under test to issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedRequest {
    pub http_method: HttpMethod,
    /// Path of the API method, optionally with a query string; the leading
    /// slash is optional. Resolved against the configured API base path.
    pub api_method_path: String,
    /// Exact raw JSON body the request must carry, when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Whether the request must be authenticated (defaults to true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticate: Option<bool>,
}

impl ExpectedRequest {
    pub fn must_authenticate(&self) -> bool {
        self.authenticate.unwrap_or(true)
    }
}

/// Response the emulator replays when the expected request matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequiredResponse {
    /// Success payload: a JSON string replayed inside the success envelope
    Success { data: String },
    /// Error payload replayed inside the error envelope
    #[serde(rename_all = "camelCase")]
    Error { status_code: u16, error_message: String },
}

/// The one-shot expectation programmed into the API server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpContext {
    pub expected_request: ExpectedRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_response: Option<RequiredResponse>,
}

impl HttpContext {
    pub fn validate(&self) -> EmulatorResult<()> {
        // The method path must resolve against an API base path.
        let base = Url::parse("http://localhost/api/")
            .map_err(|e| EmulatorError::internal(e.to_string()))?;
        base.join(self.expected_request.api_method_path.trim_start_matches('/'))
            .map_err(|e| {
                EmulatorError::validation(format!("invalid API method path: {}", e))
            })?;

        if let Some(RequiredResponse::Success { data }) = &self.required_response {
            let value: serde_json::Value = serde_json::from_str(data).map_err(|e| {
                EmulatorError::validation(format!("response data is not valid JSON: {}", e))
            })?;

            if value.is_null() {
                return Err(EmulatorError::validation(
                    "response data must not parse to null",
                ));
            }
        }

        Ok(())
    }
}
