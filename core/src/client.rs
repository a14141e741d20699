//! Request client over a gateway and a defaults store.
//!
//! # Design
//! `Client` is cheap to clone: it holds the gateway and defaults by `Arc`
//! plus a copyable [`PollConfig`]. Every request goes through the same
//! pipeline: merge defaults, encode, hand to the engine, decode, interpret.
//! Only the middle step differs between the blocking path ([`Client::send`])
//! and the polling path ([`Client::request`]).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, warn};

use crate::bridge::{self, PollConfig};
use crate::codec::{self, EncodedPayload, EncodedResult};
use crate::defaults::Defaults;
use crate::engine::Gateway;
use crate::error::{Error, Result};
use crate::http::EngineResponse;
use crate::types::RequestOptions;

/// Drives requests against one engine with one set of defaults.
#[derive(Debug, Clone)]
pub struct Client {
    gateway: Arc<Gateway>,
    defaults: Arc<Defaults>,
    config: PollConfig,
}

impl Client {
    pub fn new(gateway: Arc<Gateway>, defaults: Arc<Defaults>) -> Self {
        Self {
            gateway,
            defaults,
            config: PollConfig::default(),
        }
    }

    /// Polling parameters used by [`Client::request`] and the batch methods.
    pub fn with_poll_config(mut self, config: PollConfig) -> Self {
        self.config = config;
        self
    }

    pub fn poll_config(&self) -> PollConfig {
        self.config
    }

    pub fn defaults(&self) -> &Arc<Defaults> {
        &self.defaults
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Merge defaults into `options` and encode the result.
    pub fn prepare(&self, options: &RequestOptions) -> Result<EncodedPayload> {
        let merged = self.defaults.merge(options);
        codec::encode(&merged)
    }

    /// Run a request on the calling thread, blocking until the engine
    /// answers. Safe to call from many threads at once.
    pub fn send(&self, options: &RequestOptions) -> Result<EngineResponse> {
        let payload = self.prepare(options)?;
        let result = self.gateway.send_blocking(&payload)?;
        interpret(&result)
    }

    /// [`Client::send`] on tokio's blocking pool.
    pub async fn send_offloaded(&self, options: RequestOptions) -> Result<EngineResponse> {
        let client = self.clone();
        tokio::task::spawn_blocking(move || client.send(&options))
            .await
            .map_err(|e| Error::Task(e.to_string()))?
    }

    /// Submit and poll with the client's [`PollConfig`].
    pub async fn request(&self, options: &RequestOptions) -> Result<EngineResponse> {
        self.request_with(options, self.config).await
    }

    /// Submit and poll with an explicit [`PollConfig`].
    pub async fn request_with(&self, options: &RequestOptions, config: PollConfig) -> Result<EngineResponse> {
        let payload = self.prepare(options)?;
        let result = bridge::bridge(&self.gateway, &payload, config).await?;
        interpret(&result)
    }

    /// Run every request concurrently; results come back in input order.
    ///
    /// Fails with the first error observed, wrapped in [`Error::Batch`] with
    /// the failing item's index. The other requests are not cancelled: they
    /// keep running in the background so their handles are still consumed.
    pub async fn request_batch(&self, batch: Vec<RequestOptions>) -> Result<Vec<EngineResponse>> {
        let total = batch.len();
        let (mut tasks, indices) = self.spawn_batch(batch);
        let mut slots: Vec<Option<EngineResponse>> = (0..total).map(|_| None).collect();

        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = match joined {
                Ok(done) => done,
                Err(e) => match indices.get(&e.id()) {
                    Some(&index) => (index, Err(task_failure(e))),
                    None => {
                        tasks.detach_all();
                        return Err(task_failure(e));
                    }
                },
            };
            match outcome {
                Ok(response) => slots[index] = Some(response),
                Err(source) => {
                    let remaining = tasks.len();
                    tasks.detach_all();
                    warn!(index, remaining, error = %source, "batch item failed");
                    return Err(Error::Batch {
                        index,
                        source: Box::new(source),
                    });
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.ok_or_else(|| Error::Task(format!("batch item {index} produced no result"))))
            .collect()
    }

    /// Run every request concurrently and report each outcome separately,
    /// in input order. Never fails as a whole.
    pub async fn request_batch_settled(&self, batch: Vec<RequestOptions>) -> Vec<Result<EngineResponse>> {
        let total = batch.len();
        let (mut tasks, indices) = self.spawn_batch(batch);
        let mut slots: Vec<Option<Result<EngineResponse>>> = (0..total).map(|_| None).collect();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => match indices.get(&e.id()) {
                    Some(&index) => {
                        warn!(index, error = %e, "batch task did not complete");
                        slots[index] = Some(Err(task_failure(e)));
                    }
                    None => warn!(error = %e, "batch task did not complete"),
                },
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| Err(Error::Task(format!("batch item {index} produced no result"))))
            })
            .collect()
    }

    /// Spawn one task per item; the map recovers an item's index when its
    /// task dies without returning.
    fn spawn_batch(&self, batch: Vec<RequestOptions>) -> (JoinSet<(usize, Result<EngineResponse>)>, HashMap<Id, usize>) {
        debug!(size = batch.len(), "submitting batch");
        let mut tasks = JoinSet::new();
        let mut indices = HashMap::with_capacity(batch.len());
        for (index, options) in batch.into_iter().enumerate() {
            let client = self.clone();
            let config = self.config;
            let handle = tasks.spawn(async move { (index, client.request_with(&options, config).await) });
            indices.insert(handle.id(), index);
        }
        (tasks, indices)
    }
}

fn task_failure(e: JoinError) -> Error {
    Error::Task(e.to_string())
}

/// Decode an encoded result and turn it into a response or engine error.
fn interpret(result: &EncodedResult) -> Result<EngineResponse> {
    let map = codec::decode(result)?;
    EngineResponse::from_result(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::types::OptionValue;

    /// Answers every blocking send with a 200 echoing the payload's `tag`.
    struct EchoEngine;

    impl Engine for EchoEngine {
        fn send(&self, payload: &str) -> Option<String> {
            let options = codec::decode_payload(&EncodedPayload::new(payload)).ok()?;
            let tag = options.get("tag").and_then(OptionValue::as_str).unwrap_or("").to_string();
            let result = RequestOptions::new()
                .with("status", 200)
                .with("body", tag.into_bytes())
                .with("echo", OptionValue::Int(options.len() as i64));
            codec::encode_result(&result).ok().map(EncodedResult::into_string)
        }

        fn submit(&self, _payload: &str) -> u64 {
            0
        }

        fn check(&self, _handle: u64) -> Option<String> {
            None
        }
    }

    fn client() -> Client {
        Client::new(Arc::new(Gateway::with_engine(Arc::new(EchoEngine))), Arc::new(Defaults::new()))
    }

    #[test]
    fn send_decodes_the_engine_answer() {
        let resp = client().send(&RequestOptions::new().with("tag", "hello")).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.text(), Some("hello"));
    }

    #[test]
    fn prepare_applies_defaults() {
        let c = client();
        c.defaults().set_defaults([("timeout", 5)]).unwrap();
        let payload = c.prepare(&RequestOptions::new().with("url", "http://x")).unwrap();
        let sent = codec::decode_payload(&payload).unwrap();
        assert_eq!(sent.get("timeout"), Some(&OptionValue::Int(5)));
        assert_eq!(sent.get("url").and_then(OptionValue::as_str), Some("http://x"));
    }

    #[test]
    fn validation_errors_never_reach_the_engine() {
        let c = client();
        assert!(matches!(c.defaults().set_defaults([("bogus", 1)]), Err(Error::UnknownOption(_))));
    }

    #[tokio::test]
    async fn rejected_submission_surfaces_immediately() {
        let err = client().request(&RequestOptions::new()).await.unwrap_err();
        assert!(matches!(err, Error::SubmissionFailed));
    }

    #[tokio::test]
    async fn empty_batch_is_empty() {
        assert!(client().request_batch(Vec::new()).await.unwrap().is_empty());
        assert!(client().request_batch_settled(Vec::new()).await.is_empty());
    }
}
