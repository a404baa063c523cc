//! HTTP types and enums

use crate::errors::HttpError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// HTTP methods supported by the Stampede HTTP client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    /// Get the string representation of the HTTP method
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = HttpMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            _ => Err(HttpMethodError::InvalidMethod(s.to_string())),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
        }
    }
}

/// Errors that can occur when parsing HTTP methods
#[derive(Error, Debug, Clone)]
pub enum HttpMethodError {
    #[error("Invalid HTTP method: '{0}'. Supported methods are: GET, POST, PUT, DELETE, PATCH, HEAD, OPTIONS")]
    InvalidMethod(String),
}

/// A request issued by a workflow against the system under test
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpRequest {
    pub method: HttpMethod,
    /// Absolute URL, or a path joined onto the run's base URL
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Overrides the client's default timeout for this call only
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body and set the content type
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, HttpError> {
        let bytes = serde_json::to_vec(value)?;
        Ok(self
            .header("Content-Type", "application/json")
            .body(bytes))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Size of the request body in bytes
    pub fn body_len(&self) -> usize {
        self.body.as_ref().map(Vec::len).unwrap_or(0)
    }

    /// Resolve the request URL against `base_url` unless it is already absolute
    pub fn resolve_url(&self, base_url: &str) -> String {
        if self.url.starts_with("http://") || self.url.starts_with("https://") {
            return self.url.clone();
        }
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            self.url.trim_start_matches('/')
        )
    }
}

/// Response captured for a completed request
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Time from sending the request until the body was fully read
    pub elapsed: Duration,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Response size in bytes
    pub fn size(&self) -> usize {
        self.body.len()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body into a typed value
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Parse the body as an untyped JSON document
    pub fn json_value(&self) -> Result<serde_json::Value, HttpError> {
        self.json()
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_http_method_from_str() {
        assert_eq!("GET".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert_eq!("delete".parse::<HttpMethod>().unwrap(), HttpMethod::Delete);
        assert_eq!("OPTIONS".parse::<HttpMethod>().unwrap(), HttpMethod::Options);

        assert!("INVALID".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_http_method_to_reqwest() {
        assert_eq!(reqwest::Method::from(HttpMethod::Get), reqwest::Method::GET);
        assert_eq!(reqwest::Method::from(HttpMethod::Put), reqwest::Method::PUT);
        assert_eq!(reqwest::Method::from(HttpMethod::Patch), reqwest::Method::PATCH);
    }

    #[test]
    fn test_resolve_url() {
        let request = HttpRequest::get("/api/users");
        assert_eq!(
            request.resolve_url("http://localhost:8080/"),
            "http://localhost:8080/api/users"
        );

        let request = HttpRequest::get("api/orders/7");
        assert_eq!(
            request.resolve_url("http://localhost:8080"),
            "http://localhost:8080/api/orders/7"
        );

        let absolute = HttpRequest::get("https://other.example.com/health");
        assert_eq!(
            absolute.resolve_url("http://localhost:8080"),
            "https://other.example.com/health"
        );
    }

    #[test]
    fn test_json_body_sets_content_type() {
        let request = HttpRequest::post("/api/users")
            .json(&json!({"name": "Test User"}))
            .unwrap();

        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(
            request.headers,
            vec![("Content-Type".to_string(), "application/json".to_string())]
        );
        assert_eq!(request.body_len(), request.body.as_ref().unwrap().len());
        assert!(request.body_len() > 0);
    }

    #[test]
    fn test_response_helpers() {
        let mut response = HttpResponse::new(201, br#"{"id": 12, "email": "a@example.com"}"#.to_vec());
        response
            .headers
            .insert("content-type".to_string(), "application/json".to_string());

        assert!(response.is_success());
        assert_eq!(response.header("Content-Type"), Some("application/json"));
        assert_eq!(response.json_value().unwrap()["id"], 12);

        let broken = HttpResponse::new(200, b"<html>oops</html>".to_vec());
        assert!(broken.json_value().is_err());
        assert_eq!(broken.text(), "<html>oops</html>");

        assert!(!HttpResponse::new(404, Vec::new()).is_success());
    }
}
