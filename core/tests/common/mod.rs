//! Shared fixtures for the relay-core integration tests.
//!
//! `ScriptedEngine` reads its behaviour from the decoded payload:
//!
//! | key            | effect                                        |
//! |----------------|-----------------------------------------------|
//! | `tag`          | echoed back as the body and an `x-tag` header |
//! | `ready_after`  | number of checks that report "not ready"      |
//! | `never`        | never becomes ready                           |
//! | `reject`       | submission returns handle 0                   |
//! | `engine_error` | result carries this engine error              |
//! | `empty`        | result is an empty string                     |
//! | `panic`        | submission panics                             |

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use parking_lot::Mutex;
use relay_core::codec;
use relay_core::{Client, Defaults, EncodedPayload, Engine, EngineResponse, Gateway, OptionValue, RequestOptions};

static INIT_LOGGING: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("relay_core=debug")),
            )
            .with_test_writer()
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

enum Reply {
    Ok,
    EngineError(String),
    Empty,
}

struct Job {
    tag: String,
    remaining: Option<u64>,
    reply: Reply,
}

impl Job {
    fn from_options(options: &RequestOptions) -> Self {
        let tag = options.get("tag").and_then(OptionValue::as_str).unwrap_or("").to_string();
        let never = options.get("never").and_then(OptionValue::as_bool).unwrap_or(false);
        let ready_after = options.get("ready_after").and_then(OptionValue::as_i64).unwrap_or(0).max(0) as u64;
        let reply = if let Some(msg) = options.get("engine_error").and_then(OptionValue::as_str) {
            Reply::EngineError(msg.to_string())
        } else if options.get("empty").and_then(OptionValue::as_bool).unwrap_or(false) {
            Reply::Empty
        } else {
            Reply::Ok
        };
        Self {
            tag,
            remaining: (!never).then_some(ready_after),
            reply,
        }
    }

    fn render(&self) -> String {
        let map = match &self.reply {
            Reply::Ok => EngineResponse {
                status: 200,
                headers: vec![("x-tag".to_string(), self.tag.clone())],
                body: self.tag.clone().into_bytes().into(),
                url: None,
            }
            .into_result(),
            Reply::EngineError(msg) => EngineResponse::error_result(msg.clone()),
            Reply::Empty => return String::new(),
        };
        codec::encode_result(&map).unwrap().into_string()
    }
}

/// Fake engine with call counters and scripted readiness.
#[derive(Default)]
pub struct ScriptedEngine {
    next: AtomicU64,
    jobs: Mutex<HashMap<u64, Job>>,
    completed: Mutex<Vec<String>>,
    seen: Mutex<Vec<RequestOptions>>,
    pub submits: AtomicUsize,
    pub checks: AtomicUsize,
    pub sends: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    /// Tags in the order their results were handed out.
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }

    /// Every payload the engine accepted, decoded.
    pub fn seen(&self) -> Vec<RequestOptions> {
        self.seen.lock().clone()
    }

    /// Handles submitted but never consumed.
    pub fn outstanding(&self) -> usize {
        self.jobs.lock().len()
    }

    fn accept(&self, payload: &str) -> Option<RequestOptions> {
        let options = codec::decode_payload(&EncodedPayload::new(payload)).ok()?;
        self.seen.lock().push(options.clone());
        Some(options)
    }
}

impl Engine for ScriptedEngine {
    fn send(&self, payload: &str) -> Option<String> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let options = self.accept(payload)?;
        let job = Job::from_options(&options);
        self.completed.lock().push(job.tag.clone());
        Some(job.render())
    }

    fn submit(&self, payload: &str) -> u64 {
        self.submits.fetch_add(1, Ordering::SeqCst);
        let Some(options) = self.accept(payload) else {
            return 0;
        };
        if options.get("reject").and_then(OptionValue::as_bool).unwrap_or(false) {
            return 0;
        }
        if options.get("panic").and_then(OptionValue::as_bool).unwrap_or(false) {
            panic!("scripted engine panic");
        }
        let handle = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        self.jobs.lock().insert(handle, Job::from_options(&options));
        handle
    }

    fn check(&self, handle: u64) -> Option<String> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&handle) else {
            let map = EngineResponse::error_result(format!("unknown handle {handle}"));
            return Some(codec::encode_result(&map).unwrap().into_string());
        };
        match job.remaining {
            None => return None,
            Some(0) => {}
            Some(ref mut n) => {
                *n -= 1;
                return None;
            }
        }
        let job = jobs.remove(&handle)?;
        drop(jobs);
        self.completed.lock().push(job.tag.clone());
        Some(job.render())
    }
}

/// Client over `engine` with fresh defaults.
pub fn client_for(engine: &Arc<ScriptedEngine>) -> Client {
    let engine: Arc<dyn Engine> = engine.clone();
    Client::new(Arc::new(Gateway::with_engine(engine)), Arc::new(Defaults::new()))
}

/// Options for a scripted request.
pub fn job(tag: &str, ready_after: i64) -> RequestOptions {
    RequestOptions::new().with("tag", tag).with("ready_after", ready_after)
}
