//! The reference request engine behind the exported C functions.
//!
//! # Design
//! `submit` hands each request to its own named worker thread and returns a
//! fresh non-zero handle at once. The worker parks its encoded result in the
//! handle table; `check` removes it on the first successful read, so a
//! handle is consumed exactly once. A handle that is never checked keeps its
//! slot forever: there is no cancellation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use relay_core::codec::{self, EncodedPayload};
use relay_core::{Engine, EngineResponse, RequestOptions, ResultMap};
use tracing::{debug, warn};

use crate::transport;

enum Slot {
    Running,
    Done(String),
}

type Slots = Arc<Mutex<HashMap<u64, Slot>>>;

/// Thread-per-request engine over the `ureq` transport.
#[derive(Default)]
pub struct ReferenceEngine {
    next: AtomicU64,
    slots: Slots,
}

impl ReferenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide instance used by the C exports.
    pub fn global() -> &'static ReferenceEngine {
        static ENGINE: OnceLock<ReferenceEngine> = OnceLock::new();
        ENGINE.get_or_init(ReferenceEngine::new)
    }

    /// Handles issued but not yet consumed, finished or not.
    pub fn outstanding(&self) -> usize {
        self.slots.lock().len()
    }

    fn admit(payload: &str) -> Option<RequestOptions> {
        match codec::decode_payload(&EncodedPayload::new(payload)) {
            Ok(options) if transport::target_url(&options).is_some() => Some(options),
            Ok(_) => {
                warn!("payload rejected: no url");
                None
            }
            Err(e) => {
                warn!(error = %e, "payload rejected: undecodable");
                None
            }
        }
    }
}

/// Encode a result map for the C side. An unencodable map becomes an empty
/// string, which callers treat as an engine failure.
fn render(result: &ResultMap) -> String {
    match codec::encode_result(result) {
        Ok(encoded) => encoded.into_string(),
        Err(e) => {
            warn!(error = %e, "result could not be encoded");
            String::new()
        }
    }
}

impl Engine for ReferenceEngine {
    fn send(&self, payload: &str) -> Option<String> {
        let options = Self::admit(payload)?;
        Some(render(&transport::execute(&options)))
    }

    fn submit(&self, payload: &str) -> u64 {
        let Some(options) = Self::admit(payload) else {
            return 0;
        };
        let handle = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        self.slots.lock().insert(handle, Slot::Running);

        let slots = Arc::clone(&self.slots);
        let spawned = std::thread::Builder::new()
            .name(format!("relay-engine-{handle}"))
            .spawn(move || {
                let result = render(&transport::execute(&options));
                slots.lock().insert(handle, Slot::Done(result));
            });

        match spawned {
            Ok(_) => {
                debug!(handle, "request admitted");
                handle
            }
            Err(e) => {
                self.slots.lock().remove(&handle);
                warn!(error = %e, "could not start worker thread");
                0
            }
        }
    }

    fn check(&self, handle: u64) -> Option<String> {
        let mut slots = self.slots.lock();
        match slots.get(&handle) {
            Some(Slot::Running) => None,
            Some(Slot::Done(_)) => match slots.remove(&handle) {
                Some(Slot::Done(result)) => Some(result),
                _ => None,
            },
            None => Some(render(&EngineResponse::error_result(format!("unknown handle {handle}")))),
        }
    }
}
