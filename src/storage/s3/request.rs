//! HTTP plumbing for the S3 client

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::fmt::Display;

/// Outcome class of a store request
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ErrNo {
    Success,
    /// The store answered with a 4xx/5xx status
    Status,
    Connect,
    Timeout,
    Other,
}

impl Display for ErrNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Response from the store, successful or not
#[derive(Debug, Clone)]
pub struct Response {
    pub error_no: ErrNo,
    pub status: Option<StatusCode>,
    pub error_message: String,
    pub result: Bytes,
}

impl From<reqwest::Error> for Response {
    fn from(value: reqwest::Error) -> Self {
        let error_no = if value.is_connect() {
            ErrNo::Connect
        } else if value.is_timeout() {
            ErrNo::Timeout
        } else {
            ErrNo::Other
        };
        Response {
            error_no,
            status: value.status(),
            error_message: value.to_string(),
            result: Bytes::new(),
        }
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "[{} {}] {}", self.error_no, status.as_u16(), self.error_message),
            None => write!(f, "[{}] {}", self.error_no, self.error_message),
        }
    }
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.error_no == ErrNo::Success
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(StatusCode::NOT_FOUND)
    }
}

/// `<Error>` document S3 returns with failed requests
#[derive(Debug, Deserialize, PartialEq)]
pub struct S3Error {
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Message", default)]
    pub message: String,
}

/// Human-readable summary of an error body, falling back to the raw text
pub fn describe_error_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    match quick_xml::de::from_str::<S3Error>(&text) {
        Ok(err) if err.message.is_empty() => err.code,
        Ok(err) => format!("{}: {}", err.code, err.message),
        Err(_) => text.trim().chars().take(200).collect(),
    }
}

/// Send a signed request and collect the whole body
pub async fn send(
    http: &reqwest::Client,
    method: Method,
    url: &str,
    headers: HeaderMap,
    body: Option<Bytes>,
) -> Response {
    let mut req = http.request(method, url).headers(headers);
    if let Some(body) = body {
        req = req.body(body);
    }

    let resp = match req.send().await {
        Ok(resp) => resp,
        Err(e) => return e.into(),
    };

    let status = resp.status();
    let result = match resp.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return e.into(),
    };

    if status.is_client_error() || status.is_server_error() {
        return Response {
            error_no: ErrNo::Status,
            status: Some(status),
            error_message: describe_error_body(&result),
            result,
        };
    }

    Response {
        error_no: ErrNo::Success,
        status: Some(status),
        error_message: String::new(),
        result,
    }
}
