//! HTTP utilities for IBM Cloud REST API calls
//!
//! Every response is turned into either JSON or a [`ClientError`] whose
//! variant tells the reconciler whether retrying makes sense.

use ibmcloud_core::{ClientError, ClientResult};
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::Value;

use crate::session::IbmSession;

/// Maximum length of response body to log
const MAX_LOG_BODY_LENGTH: usize = 200;

const MERGE_PATCH: &str = "application/merge-patch+json";

/// Truncate a response body and strip control characters before logging
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Pull a human readable message out of an IBM Cloud error body
///
/// Services disagree on the shape: VPC and IAM use `errors[].message`,
/// Power uses `description`, others a bare `message` or `error`.
pub fn error_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    if let Some(first) = json.get("errors").and_then(Value::as_array).and_then(|e| e.first()) {
        let message = first.get("message").and_then(Value::as_str)?;
        return Some(match first.get("code").and_then(Value::as_str) {
            Some(code) => format!("{} ({})", message, code),
            None => message.to_string(),
        });
    }
    ["description", "message", "error"]
        .iter()
        .find_map(|key| json.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Classify an unsuccessful HTTP status
pub fn classify_status(status: StatusCode, message: String) -> ClientError {
    let message = format!("{}: {}", status, message);
    match status {
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            ClientError::Transient(message)
        }
        s if s.is_server_error() => ClientError::Transient(message),
        _ => ClientError::Permanent(message),
    }
}

fn classify_transport(err: reqwest::Error) -> ClientError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ClientError::transient(format!("request failed: {}", err))
    } else {
        ClientError::permanent(format!("request failed: {}", err))
    }
}

/// HTTP client wrapper for IBM Cloud API calls
#[derive(Clone)]
pub struct IbmHttpClient {
    client: Client,
    token: String,
}

impl IbmHttpClient {
    pub fn new(session: &IbmSession) -> ClientResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("ibmcloud-reconciler/", env!("CARGO_PKG_VERSION")))
            .timeout(session.request_timeout())
            .build()
            .map_err(|e| ClientError::permanent(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            token: session.iam_token.clone(),
        })
    }

    /// Start a request with the bearer token attached
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
    }

    pub async fn get(&self, url: &str, query: &[(&str, &str)]) -> ClientResult<Value> {
        self.send(self.request(Method::GET, url).query(query)).await
    }

    pub async fn post(&self, url: &str, query: &[(&str, &str)], body: &Value) -> ClientResult<Value> {
        self.send(self.request(Method::POST, url).query(query).json(body))
            .await
    }

    pub async fn put(&self, url: &str, query: &[(&str, &str)], body: &Value) -> ClientResult<Value> {
        self.send(self.request(Method::PUT, url).query(query).json(body))
            .await
    }

    /// PATCH with a JSON merge-patch body
    pub async fn patch(
        &self,
        url: &str,
        query: &[(&str, &str)],
        body: &Value,
    ) -> ClientResult<Value> {
        let request = self
            .request(Method::PATCH, url)
            .query(query)
            .header(CONTENT_TYPE, HeaderValue::from_static(MERGE_PATCH))
            .body(body.to_string());
        self.send(request).await
    }

    pub async fn delete(
        &self,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> ClientResult<Value> {
        let mut request = self.request(Method::DELETE, url).query(query);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request).await
    }

    /// Send a request and decode the JSON response
    pub async fn send(&self, request: RequestBuilder) -> ClientResult<Value> {
        let request = request.build().map_err(classify_transport)?;
        let method = request.method().clone();
        let url = request.url().path().to_string();
        tracing::debug!("{} {}", method, url);

        let response = self
            .client
            .execute(request)
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            tracing::debug!(
                "API error: {} {} -> {} - {}",
                method,
                url,
                status,
                sanitize_for_log(&body)
            );
            let message = error_message(&body).unwrap_or_else(|| sanitize_for_log(&body));
            return Err(classify_status(status, message));
        }

        // Handle empty response
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|e| {
            ClientError::permanent(format!("failed to parse response from {}: {}", url, e))
        })
    }
}

/// Read a string field, following a dotted path (e.g. "zone.name")
pub fn str_at<'a>(value: &'a Value, path: &str) -> Option<&'a str> {
    path.split('.')
        .try_fold(value, |v, key| v.get(key))
        .and_then(Value::as_str)
}

/// Read a list of strings, following a dotted path
pub fn strings_at(value: &Value, path: &str) -> Vec<String> {
    path.split('.')
        .try_fold(value, |v, key| v.get(key))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Require a string field in a response
pub fn required_str<'a>(value: &'a Value, path: &str, what: &str) -> ClientResult<&'a str> {
    str_at(value, path)
        .ok_or_else(|| ClientError::permanent(format!("{} response is missing '{}'", what, path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_classification() {
        assert!(classify_status(StatusCode::NOT_FOUND, "x".into()).is_not_found());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "x".into()).is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "x".into()).is_transient());
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "x".into()),
            ClientError::Permanent(_)
        ));
    }

    #[test]
    fn error_message_shapes() {
        let vpc = r#"{"errors":[{"code":"not_found","message":"Floating IP not found"}]}"#;
        assert_eq!(
            error_message(vpc).as_deref(),
            Some("Floating IP not found (not_found)")
        );
        let power = r#"{"description":"cloud instance not found","error":"not found"}"#;
        assert_eq!(error_message(power).as_deref(), Some("cloud instance not found"));
        assert_eq!(error_message("<html>bad gateway</html>"), None);
    }

    #[test]
    fn sanitize_truncates_long_bodies() {
        let body = "é".repeat(300);
        let sanitized = sanitize_for_log(&body);
        assert!(sanitized.contains("[truncated, 600 bytes total]"));
    }

    #[test]
    fn dotted_paths() {
        let value = json!({"zone": {"name": "us-south-1"}, "peerSubnets": ["a", "b"]});
        assert_eq!(str_at(&value, "zone.name"), Some("us-south-1"));
        assert_eq!(str_at(&value, "zone.id"), None);
        assert_eq!(strings_at(&value, "peerSubnets"), vec!["a", "b"]);
        assert!(strings_at(&value, "networkIDs").is_empty());
        assert!(required_str(&value, "id", "floating IP").is_err());
    }
}
