//! Error notification the client sends back over the command channel.

use serde::Serialize;

use super::command::ResourceRequest;

/// Error response for a request the client could not serve.
///
/// ```rust,ignore
/// let error = ErrorResponse::new(&request)
///     .with_http_code(404)
///     .with_message("Not found");
/// client.send_error(&error).await?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    request: ResourceRequest,
    http_code: u16,
    messages: Option<Vec<String>>,
}

#[derive(Serialize)]
struct ErrorNotification<'a> {
    state: &'static str,
    rid: &'a str,
    uri: &'a str,
    #[serde(rename = "httpCode", skip_serializing_if = "Option::is_none")]
    http_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    messages: Option<&'a [String]>,
}

impl ErrorResponse {
    /// Create an error response for `request`
    pub fn new(request: &ResourceRequest) -> Self {
        Self {
            request: request.clone(),
            http_code: 0,
            messages: None,
        }
    }

    /// Request this response answers
    pub fn request(&self) -> &ResourceRequest {
        &self.request
    }

    /// HTTP status code, 0 if unset
    pub fn http_code(&self) -> u16 {
        self.http_code
    }

    /// Set the HTTP status code. Zero means "not set".
    pub fn set_http_code(&mut self, code: u16) {
        self.http_code = code;
    }

    /// Builder form of [`set_http_code`](Self::set_http_code)
    pub fn with_http_code(mut self, code: u16) -> Self {
        self.set_http_code(code);
        self
    }

    /// Append an error message
    pub fn add_message(&mut self, message: impl Into<String>) {
        self.messages
            .get_or_insert_with(Vec::new)
            .push(message.into());
    }

    /// Builder form of [`add_message`](Self::add_message)
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.add_message(message);
        self
    }

    /// Messages added so far
    pub fn messages(&self) -> &[String] {
        self.messages.as_deref().unwrap_or_default()
    }

    /// Encode as the command channel `state="error"` notification.
    pub fn to_json(&self) -> String {
        let notification = ErrorNotification {
            state: "error",
            rid: &self.request.id,
            uri: &self.request.uri,
            http_code: (self.http_code != 0).then_some(self.http_code),
            messages: self.messages.as_deref(),
        };

        // Only strings and integers, cannot fail
        serde_json::to_string(&notification).unwrap_or_default()
    }
}
