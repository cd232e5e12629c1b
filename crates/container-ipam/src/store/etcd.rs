//! etcd v2 keys API adapter
//!
//! Talks to `/v2/keys` over HTTP. Endpoints are tried in order on transport
//! failure; etcd error codes are mapped onto the crate error taxonomy:
//!
//! | etcd code | meaning | mapped to |
//! |-----------|---------|-----------|
//! | 100 | key not found | `NotFound` |
//! | 105 | node exists | `AlreadyExists` |
//! | 401 | event index cleared | `StoreUnavailable` (watch restarts from now) |

use super::traits::{KeyValue, KvStore, WatchEvent, Watcher};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

const ERR_KEY_NOT_FOUND: u32 = 100;
const ERR_NODE_EXIST: u32 = 105;
const ERR_EVENT_INDEX_CLEARED: u32 = 401;

#[derive(Debug, Deserialize)]
struct EtcdResponse {
    #[serde(default)]
    action: String,
    node: Option<EtcdNode>,
    #[serde(rename = "prevNode")]
    prev_node: Option<EtcdNode>,
}

#[derive(Debug, Deserialize)]
struct EtcdNode {
    #[serde(default)]
    key: String,
    value: Option<String>,
    #[serde(default)]
    dir: bool,
    #[serde(default)]
    nodes: Vec<EtcdNode>,
    #[serde(rename = "modifiedIndex", default)]
    modified_index: u64,
}

#[derive(Debug, Deserialize)]
struct EtcdErrorBody {
    #[serde(rename = "errorCode")]
    error_code: u32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    cause: String,
}

/// etcd v2 store client
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    endpoints: Arc<Vec<String>>,
    request_timeout: Duration,
}

impl EtcdStore {
    /// Create a client for the given endpoints
    pub fn new(endpoints: Vec<String>, request_timeout: Duration) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::Config("at least one etcd endpoint is required".to_string()));
        }
        let endpoints = endpoints
            .into_iter()
            .map(|e| e.trim_end_matches('/').to_string())
            .collect();
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoints: Arc::new(endpoints),
            request_timeout,
        })
    }

    /// Parse a comma-separated endpoint list such as `http://a:2379,http://b:2379`
    pub fn from_list(list: &str, request_timeout: Duration) -> Result<Self> {
        let endpoints = list
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect();
        Self::new(endpoints, request_timeout)
    }

    fn url(endpoint: &str, key: &str) -> String {
        if key.starts_with('/') {
            format!("{}/v2/keys{}", endpoint, key)
        } else {
            format!("{}/v2/keys/{}", endpoint, key)
        }
    }

    /// Send a request to the first endpoint that answers
    async fn execute<F>(&self, key: &str, timeout: Option<Duration>, build: F) -> Result<EtcdResponse>
    where
        F: Fn(&Client, String) -> RequestBuilder,
    {
        self.execute_raw(key, timeout, build)
            .await?
            .map_err(|err| Self::map_error(key, err))
    }

    /// Like `execute`, but hands etcd-level errors back undecoded
    async fn execute_raw<F>(
        &self,
        key: &str,
        timeout: Option<Duration>,
        build: F,
    ) -> Result<std::result::Result<EtcdResponse, EtcdErrorBody>>
    where
        F: Fn(&Client, String) -> RequestBuilder,
    {
        let mut last_error = None;

        for endpoint in self.endpoints.iter() {
            let mut request = build(&self.client, Self::url(endpoint, key));
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let body = response.bytes().await?;
                    return Self::decode(key, status, &body);
                }
                Err(e) => {
                    debug!(endpoint = %endpoint, error = %e, "etcd endpoint unreachable");
                    last_error = Some(e);
                }
            }
        }

        Err(Error::StoreUnavailable(match last_error {
            Some(e) => e.to_string(),
            None => "no endpoints configured".to_string(),
        }))
    }

    fn decode(
        key: &str,
        status: StatusCode,
        body: &[u8],
    ) -> Result<std::result::Result<EtcdResponse, EtcdErrorBody>> {
        if status.is_success() {
            if body.is_empty() {
                return Ok(Ok(EtcdResponse {
                    action: String::new(),
                    node: None,
                    prev_node: None,
                }));
            }
            return Ok(Ok(serde_json::from_slice(body)?));
        }

        match serde_json::from_slice::<EtcdErrorBody>(body) {
            Ok(err) => Ok(Err(err)),
            Err(_) => Err(Error::StoreUnavailable(format!(
                "etcd returned {} for {}",
                status, key
            ))),
        }
    }

    fn map_error(key: &str, err: EtcdErrorBody) -> Error {
        match err.error_code {
            ERR_KEY_NOT_FOUND => Error::NotFound(key.to_string()),
            ERR_NODE_EXIST => Error::AlreadyExists(key.to_string()),
            code => Error::StoreUnavailable(format!(
                "etcd error {}: {} ({})",
                code, err.message, err.cause
            )),
        }
    }

    fn ttl_form(value: &str, ttl: Option<Duration>) -> Vec<(&'static str, String)> {
        let mut form = vec![("value", value.to_string())];
        if let Some(ttl) = ttl {
            form.push(("ttl", ttl.as_secs().max(1).to_string()));
        }
        form
    }
}

#[async_trait]
impl KvStore for EtcdStore {
    async fn get(&self, key: &str) -> Result<String> {
        let response = self
            .execute(key, Some(self.request_timeout), |client, url| {
                client.request(Method::GET, url)
            })
            .await?;
        let node = response.node.ok_or_else(|| Error::NotFound(key.to_string()))?;
        trace!(key = %node.key, "etcd get");
        Ok(if node.dir {
            String::new()
        } else {
            node.value.unwrap_or_default()
        })
    }

    async fn get_children(&self, dir: &str) -> Result<Vec<KeyValue>> {
        let response = self
            .execute(dir, Some(self.request_timeout), |client, url| {
                client.request(Method::GET, url).query(&[("sorted", "true")])
            })
            .await;

        let node = match response {
            Ok(response) => response.node,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let children = node
            .map(|n| n.nodes)
            .unwrap_or_default()
            .into_iter()
            .map(|child| KeyValue {
                key: child.key,
                value: child.value.unwrap_or_default(),
            })
            .collect::<Vec<_>>();
        debug!(dir = %dir, count = children.len(), "etcd list");
        Ok(children)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let form = Self::ttl_form(value, ttl);
        self.execute(key, Some(self.request_timeout), |client, url| {
            client.request(Method::PUT, url).form(&form)
        })
        .await?;
        trace!(key = %key, "etcd set");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.execute(key, Some(self.request_timeout), |client, url| {
            client
                .request(Method::DELETE, url)
                .query(&[("recursive", "true")])
        })
        .await?;
        trace!(key = %key, "etcd delete");
        Ok(())
    }

    async fn create_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut form = Self::ttl_form(value, ttl);
        form.push(("prevExist", "false".to_string()));
        self.execute(key, Some(self.request_timeout), |client, url| {
            client.request(Method::PUT, url).form(&form)
        })
        .await?;
        Ok(())
    }

    async fn watch(&self, prefix: &str) -> Result<Box<dyn Watcher>> {
        Ok(Box::new(EtcdWatcher {
            store: self.clone(),
            prefix: prefix.to_string(),
            next_index: None,
        }))
    }
}

/// Long-poll watcher tracking the etcd modification index
pub struct EtcdWatcher {
    store: EtcdStore,
    prefix: String,
    next_index: Option<u64>,
}

#[async_trait]
impl Watcher for EtcdWatcher {
    async fn next(&mut self) -> Result<WatchEvent> {
        loop {
            let index = self.next_index;
            let result = self
                .store
                .execute_raw(&self.prefix, None, |client, url| {
                    let mut query = vec![
                        ("wait", "true".to_string()),
                        ("recursive", "true".to_string()),
                    ];
                    if let Some(index) = index {
                        query.push(("waitIndex", index.to_string()));
                    }
                    client.request(Method::GET, url).query(&query)
                })
                .await?;

            let response = match result {
                Ok(response) => response,
                Err(err) if err.error_code == ERR_EVENT_INDEX_CLEARED => {
                    warn!(prefix = %self.prefix, "watch index cleared, resuming from current state");
                    self.next_index = None;
                    return Err(EtcdStore::map_error(&self.prefix, err));
                }
                Err(err) => return Err(EtcdStore::map_error(&self.prefix, err)),
            };

            // Empty long-poll response, poll again
            let Some(node) = response.node else {
                continue;
            };

            self.next_index = Some(node.modified_index + 1);
            trace!(action = %response.action, key = %node.key, "etcd watch event");

            let value = if matches!(response.action.as_str(), "delete" | "expire" | "compareAndDelete") {
                None
            } else {
                node.value
            };
            return Ok(WatchEvent::new(
                node.key,
                value,
                response.prev_node.and_then(|p| p.value),
            ));
        }
    }
}
