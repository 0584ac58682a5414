//! Upload acknowledgement translation.
//!
//! The gateway acknowledges every upload with a JSON body:
//!
//! ```json
//! {"response": {"code": "SUCCESS", "messages": []}}
//! ```
//!
//! Only the HTTP status decides success. A 200 resolves to an
//! [`UploadOutcome`] whatever its application `code`; any other status fails
//! with [`GatewayError::Upload`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::transport::RawResponse;

/// HTTP status of an accepted upload
pub const SUCCESS_STATUS: u16 = 200;

#[derive(Debug, Deserialize)]
struct ResponseWrapper {
    response: ResponseStatus,
}

#[derive(Debug, Deserialize)]
struct ResponseStatus {
    code: String,
    #[serde(default)]
    messages: Vec<String>,
}

/// Acknowledgement of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// HTTP status code.
    pub status_code: u16,
    /// Application status code, e.g. `SUCCESS`.
    pub code: String,
    /// Messages attached by the gateway.
    pub messages: Vec<String>,
}

impl UploadOutcome {
    /// Messages joined by a space
    pub fn message(&self) -> String {
        self.messages.join(" ")
    }
}

/// Translate a raw upload response into an outcome.
pub fn translate(response: RawResponse) -> Result<UploadOutcome> {
    let status = response.status;
    let parsed = serde_json::from_slice::<ResponseWrapper>(&response.body);

    if status != SUCCESS_STATUS {
        let error = match parsed {
            Ok(wrapper) => GatewayError::Upload {
                status,
                code: wrapper.response.code,
                messages: wrapper.response.messages.join(" "),
            },
            Err(_) => GatewayError::Upload {
                status,
                code: String::new(),
                messages: String::from_utf8_lossy(&response.body).trim().to_string(),
            },
        };
        debug!(status = status, "Upload rejected");
        return Err(error);
    }

    let wrapper = parsed.map_err(|e| GatewayError::InvalidAcknowledgement(e.to_string()))?;
    Ok(UploadOutcome {
        status_code: status,
        code: wrapper.response.code,
        messages: wrapper.response.messages,
    })
}

/// Future resolving a raw upload response into an [`UploadOutcome`].
///
/// Dropping it drops the wrapped future, which cancels the request.
#[must_use = "futures do nothing unless polled"]
pub struct UploadStatusFuture<F> {
    inner: Pin<Box<F>>,
}

impl<F> UploadStatusFuture<F>
where
    F: Future<Output = Result<RawResponse>>,
{
    /// Wrap a raw response future
    pub fn new(raw: F) -> Self {
        Self {
            inner: Box::pin(raw),
        }
    }
}

impl<F> Future for UploadStatusFuture<F>
where
    F: Future<Output = Result<RawResponse>>,
{
    type Output = Result<UploadOutcome>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut()
            .inner
            .as_mut()
            .poll(cx)
            .map(|raw| raw.and_then(translate))
    }
}

/// A running upload.
///
/// Resolves to the upload's outcome. Uploads run on their own task, so many
/// can be in flight at once and each can be cancelled on its own.
#[derive(Debug)]
#[must_use = "dropping the handle detaches the upload"]
pub struct UploadHandle {
    request_id: String,
    task: JoinHandle<Result<UploadOutcome>>,
}

impl UploadHandle {
    /// Run `future` on a new task.
    pub fn spawn<F>(request_id: impl Into<String>, future: UploadStatusFuture<F>) -> Self
    where
        F: Future<Output = Result<RawResponse>> + Send + 'static,
    {
        let request_id = request_id.into();
        let rid = request_id.clone();
        let task = tokio::spawn(async move {
            let result = future.await;
            if let Err(e) = &result {
                warn!(rid = %rid, error = %e, "Upload failed");
            }
            result
        });

        Self { request_id, task }
    }

    /// Request ID this upload answers
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Abort the upload. The handle then resolves to [`GatewayError::Cancelled`].
    pub fn cancel(&self) {
        debug!(rid = %self.request_id, "Upload cancelled");
        self.task.abort();
    }

    /// Whether the upload finished
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Future for UploadHandle {
    type Output = Result<UploadOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(GatewayError::Cancelled),
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        })
    }
}
