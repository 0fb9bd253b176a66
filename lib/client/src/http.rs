// Request/response plumbing shared by every synchronous endpoint.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use cellgrid_core::{Error, Result};

/// Cooperative cancellation handle for request/response fetches.
///
/// A wall-clock timeout triggers the same abort path, so downstream code
/// observes one terminal state per operation.
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `fut` until completion, abort, or timeout - whichever comes first.
pub async fn abortable<T>(
    fut: impl Future<Output = Result<T>>,
    handle: &AbortHandle,
    timeout: Option<Duration>,
) -> Result<T> {
    if handle.is_aborted() {
        return Err(Error::Aborted);
    }
    let mut rx = handle.subscribe();
    let aborted = async move {
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without aborting; never fires.
                std::future::pending::<()>().await;
            }
        }
    };
    let guarded = async {
        tokio::select! {
            _ = aborted => Err(Error::Aborted),
            result = fut => result,
        }
    };
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(result) => result,
            Err(_) => {
                handle.abort();
                Err(Error::Timeout)
            }
        },
        None => guarded.await,
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout
    } else {
        Error::Http {
            status: err.status().map(|s| s.as_u16()).unwrap_or(0),
            message: err.to_string(),
        }
    }
}

/// Classify non-2xx responses; 403 and 501 get their own variants.
async fn ensure_ok(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(Error::from_status(status.as_u16(), message))
}

pub async fn do_binary_request(client: &reqwest::Client, url: &str) -> Result<Bytes> {
    let response = client.get(url).send().await.map_err(transport_error)?;
    let response = ensure_ok(response).await?;
    response.bytes().await.map_err(transport_error)
}

pub async fn do_json_request<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T> {
    let response = client.get(url).send().await.map_err(transport_error)?;
    let response = ensure_ok(response).await?;
    response.json().await.map_err(transport_error)
}

pub async fn put_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
) -> Result<T> {
    let response = client
        .put(url)
        .json(body)
        .send()
        .await
        .map_err(transport_error)?;
    let response = ensure_ok(response).await?;
    response.json().await.map_err(transport_error)
}

/// PUT a JSON body, expecting a binary blob back (metadata exports).
pub async fn put_json_binary(
    client: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
) -> Result<Bytes> {
    let response = client
        .put(url)
        .json(body)
        .send()
        .await
        .map_err(transport_error)?;
    let response = ensure_ok(response).await?;
    response.bytes().await.map_err(transport_error)
}

/// POST an urlencoded body, expecting a binary payload (long summarize
/// queries that exceed the URL length cap).
pub async fn post_form_binary(
    client: &reqwest::Client,
    url: &str,
    body: String,
) -> Result<Bytes> {
    let response = client
        .post(url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .header("Accept", "application/octet-stream")
        .body(body)
        .send()
        .await
        .map_err(transport_error)?;
    let response = ensure_ok(response).await?;
    response.bytes().await.map_err(transport_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_abort_wins() {
        let handle = AbortHandle::new();
        handle.abort();
        let result = abortable(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1u32)
            },
            &handle,
            None,
        )
        .await;
        assert!(matches!(result, Err(Error::Aborted)));
    }

    #[tokio::test]
    async fn test_timeout_triggers_abort_path() {
        let handle = AbortHandle::new();
        let result = abortable(
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1u32)
            },
            &handle,
            Some(Duration::from_millis(10)),
        )
        .await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(handle.is_aborted());
    }

    #[tokio::test]
    async fn test_completion_before_timeout() {
        let handle = AbortHandle::new();
        let result = abortable(
            async { Ok(42u32) },
            &handle,
            Some(Duration::from_secs(5)),
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert!(!handle.is_aborted());
    }
}
