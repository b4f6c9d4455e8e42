use crate::config::RpcClientConfig;
use crate::io_struct::TokenCallRequest;
use crate::vocab::{VocabError, Vocabulary};
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteInvocationError {
    #[error("request {request_id} to {url} timed out after {timeout:?}")]
    Timeout {
        request_id: i32,
        url: String,
        timeout: Duration,
    },
    #[error("request {request_id} to {url} failed: {source}")]
    Transport {
        request_id: i32,
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request {request_id} to {url} returned status {status}: {body}")]
    Status {
        request_id: i32,
        url: String,
        status: u16,
        body: String,
    },
    #[error("no request ids left for call to {url}")]
    RequestIdsExhausted { url: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub url: String,
    pub status: u16,
    pub body: Bytes,
}

impl RpcResponse {
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.body)
    }
}

/// Shared state for remote calls issued by graph ops.
///
/// Owns the runtime that drives the HTTP client, so kernels can stay
/// synchronous. Calls block the executing thread for at most the configured
/// timeout and must not be made from inside another tokio runtime.
pub struct RpcContext {
    runtime: tokio::runtime::Runtime,
    client: reqwest::Client,
    config: RpcClientConfig,
    next_request_id: AtomicI32,
    results: DashMap<i32, RpcResponse>,
    // Insertion order of `results`, for dropping the oldest unclaimed replies.
    result_order: Mutex<VecDeque<i32>>,
    vocabularies: DashMap<PathBuf, Arc<Vocabulary>>,
}

impl RpcContext {
    pub fn new(config: RpcClientConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name("rpc-token-call")
            .enable_all()
            .build()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self {
            runtime,
            client,
            config,
            next_request_id: AtomicI32::new(0),
            results: DashMap::new(),
            result_order: Mutex::new(VecDeque::new()),
            vocabularies: DashMap::new(),
        })
    }

    pub fn config(&self) -> &RpcClientConfig {
        &self.config
    }

    /// Posts `request` to `url` and stores the response under a fresh request id.
    ///
    /// Ids are handed out in call order starting at 0, whether or not the
    /// call succeeds. Once every non-negative `i32` is used, calls fail.
    pub fn call(&self, url: &str, request: &TokenCallRequest) -> Result<i32, RemoteInvocationError> {
        let request_id = self
            .next_request_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
            .map_err(|_| RemoteInvocationError::RequestIdsExhausted {
                url: url.to_string(),
            })?;
        let timeout = self.config.timeout();
        log::debug!(
            "Request {} -> {} ({} tokens)",
            request_id,
            url,
            request.token_count()
        );

        let transport = |source: reqwest::Error| {
            if source.is_timeout() {
                RemoteInvocationError::Timeout {
                    request_id,
                    url: url.to_string(),
                    timeout,
                }
            } else {
                RemoteInvocationError::Transport {
                    request_id,
                    url: url.to_string(),
                    source,
                }
            }
        };

        let task = async {
            let resp = self.client.post(url).json(request).send().await?;
            let status = resp.status();
            let body = resp.bytes().await?;
            Ok::<_, reqwest::Error>((status, body))
        };
        let (status, body) = self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, task).await })
            .map_err(|_| RemoteInvocationError::Timeout {
                request_id,
                url: url.to_string(),
                timeout,
            })?
            .map_err(transport)?;

        if !status.is_success() {
            log::warn!("Request {} to {} failed with {}", request_id, url, status);
            return Err(RemoteInvocationError::Status {
                request_id,
                url: url.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        self.store_result(
            request_id,
            RpcResponse {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            },
        );
        Ok(request_id)
    }

    fn store_result(&self, request_id: i32, response: RpcResponse) {
        self.results.insert(request_id, response);
        let mut order = self
            .result_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        order.push_back(request_id);
        while order.len() > self.config.max_pending_results {
            let Some(oldest) = order.pop_front() else {
                break;
            };
            if self.results.remove(&oldest).is_some() {
                log::warn!("Dropped unclaimed reply for request {}", oldest);
            }
        }
    }

    pub fn result(&self, request_id: i32) -> Option<RpcResponse> {
        self.results.get(&request_id).map(|r| r.value().clone())
    }

    pub fn take_result(&self, request_id: i32) -> Option<RpcResponse> {
        let (_, response) = self.results.remove(&request_id)?;
        self.result_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|id| *id != request_id);
        Some(response)
    }

    pub fn pending_results(&self) -> usize {
        self.results.len()
    }

    /// Loads a vocabulary once per path and shares it afterwards.
    pub fn vocabulary(&self, path: &Path) -> Result<Arc<Vocabulary>, VocabError> {
        if let Some(vocab) = self.vocabularies.get(path) {
            return Ok(vocab.value().clone());
        }
        let vocab = Arc::new(Vocabulary::load(path)?);
        log::info!("Loaded vocabulary {} ({} tokens)", path.display(), vocab.len());
        Ok(self
            .vocabularies
            .entry(path.to_path_buf())
            .or_insert(vocab)
            .value()
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_rejected() {
        let config = RpcClientConfig::default().with_timeout_secs(0);
        assert!(RpcContext::new(config).is_err());
    }

    #[test]
    fn test_unreachable_endpoint_consumes_an_id() {
        let ctx = RpcContext::new(RpcClientConfig::default()).unwrap();
        // Port 9 on loopback is the discard service and is normally closed.
        let err = ctx
            .call("http://127.0.0.1:9/generate", &TokenCallRequest::from_ids(vec![1]))
            .unwrap_err();
        assert!(matches!(
            err,
            RemoteInvocationError::Transport { request_id: 0, .. }
                | RemoteInvocationError::Timeout { request_id: 0, .. }
        ));
        assert_eq!(ctx.pending_results(), 0);
        assert!(ctx.take_result(0).is_none());
    }

    fn response(body: &'static str) -> RpcResponse {
        RpcResponse {
            url: "http://127.0.0.1/generate".to_string(),
            status: 200,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn test_unclaimed_replies_are_bounded() {
        let config = RpcClientConfig::default().with_max_pending_results(2);
        let ctx = RpcContext::new(config).unwrap();
        for id in 0..5 {
            ctx.store_result(id, response("{}"));
            assert!(ctx.pending_results() <= 2);
        }
        assert!(ctx.result(2).is_none());
        assert!(ctx.result(3).is_some());
        assert!(ctx.take_result(4).is_some());

        // A claimed reply frees its slot.
        ctx.store_result(5, response("{}"));
        assert_eq!(ctx.pending_results(), 2);
        assert!(ctx.result(3).is_some());
        assert!(ctx.result(5).is_some());
    }

    #[test]
    fn test_request_ids_do_not_wrap() {
        let ctx = RpcContext::new(RpcClientConfig::default().with_timeout_secs(2)).unwrap();
        ctx.next_request_id.store(i32::MAX - 1, Ordering::SeqCst);
        let request = TokenCallRequest::from_ids(vec![1]);
        let err = ctx.call("http://127.0.0.1:9/generate", &request).unwrap_err();
        assert!(matches!(
            err,
            RemoteInvocationError::Transport { request_id, .. }
                | RemoteInvocationError::Timeout { request_id, .. } if request_id == i32::MAX - 1
        ));
        let err = ctx.call("http://127.0.0.1:9/generate", &request).unwrap_err();
        assert!(matches!(err, RemoteInvocationError::RequestIdsExhausted { .. }));
    }

    #[test]
    fn test_vocabulary_cached_per_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.txt");
        std::fs::write(&path, "a\nb\n").unwrap();
        let ctx = RpcContext::new(RpcClientConfig::default()).unwrap();
        let first = ctx.vocabulary(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        let second = ctx.vocabulary(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
