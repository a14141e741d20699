//! Native engine gateway.
//!
//! # Design
//! [`Engine`] is the opaque black box at its Rust seam: encoded payload in,
//! encoded result out, plus a submit/check pair keyed by raw `u64` handles.
//! [`Gateway`] is the only caller of an `Engine`. It adds typed error
//! translation and lazy loading, and nothing else. In particular it takes no
//! lock around engine calls: the engine is required to be thread-safe, and a
//! gateway-level mutex would serialize unrelated requests.
//!
//! Loading is one-time and lock-protected (`OnceLock`). A failed load is
//! remembered and reported on every later call; it is never retried.

use std::fmt;
use std::num::NonZeroU64;
use std::sync::{Arc, OnceLock};

use tracing::{debug, error, info};

use crate::codec::{EncodedPayload, EncodedResult};
use crate::error::{Error, Result};
use crate::native::{EngineLocator, NativeEngine};

/// The opaque request engine.
///
/// Implementations must tolerate concurrent calls to every method from any
/// number of threads.
pub trait Engine: Send + Sync {
    /// Run a request to completion. `None` signals failure.
    fn send(&self, payload: &str) -> Option<String>;

    /// Start a request without waiting. Returns `0` if the payload was
    /// rejected before admission.
    fn submit(&self, payload: &str) -> u64;

    /// Check a submitted request. `None` means not finished yet. Returning
    /// `Some` consumes the handle and releases the engine-side state.
    fn check(&self, handle: u64) -> Option<String>;
}

/// Correlation token for one in-flight engine request.
///
/// Never zero. Deliberately not `Clone`: a handle moves into the poll that
/// consumes it, and a pending poll hands it back.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Handle(NonZeroU64);

impl Handle {
    /// Wrap a raw engine handle; zero is not a handle.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Handle)
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of a single non-blocking check.
#[derive(Debug)]
pub enum Completion {
    /// Not finished; the handle is returned for the next check.
    Pending(Handle),
    /// Finished; the handle has been consumed.
    Ready(EncodedResult),
}

type Loader = Box<dyn Fn() -> Result<Arc<dyn Engine>> + Send + Sync>;

enum Source {
    Ready(Arc<dyn Engine>),
    Lazy {
        load: Loader,
        engine: OnceLock<std::result::Result<Arc<dyn Engine>, String>>,
    },
}

/// Sole choke point for engine calls.
pub struct Gateway {
    source: Source,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.source {
            Source::Ready(_) => "ready",
            Source::Lazy { engine, .. } => match engine.get() {
                None => "unloaded",
                Some(Ok(_)) => "loaded",
                Some(Err(_)) => "failed",
            },
        };
        f.debug_struct("Gateway").field("engine", &state).finish()
    }
}

impl Gateway {
    /// Use an already constructed engine.
    pub fn with_engine(engine: Arc<dyn Engine>) -> Self {
        Self {
            source: Source::Ready(engine),
        }
    }

    /// Load the engine on first use with `load`.
    pub fn lazy<F>(load: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Engine>> + Send + Sync + 'static,
    {
        Self {
            source: Source::Lazy {
                load: Box::new(load),
                engine: OnceLock::new(),
            },
        }
    }

    /// Load the native engine artifact found by `locator` on first use.
    pub fn native(locator: EngineLocator) -> Self {
        Self::lazy(move || {
            let path = locator.locate()?;
            let engine = NativeEngine::load(&path)?;
            Ok(Arc::new(engine) as Arc<dyn Engine>)
        })
    }

    /// [`Gateway::native`] with the locator configured from the environment.
    pub fn from_env() -> Self {
        Self::native(EngineLocator::from_env())
    }

    fn engine(&self) -> Result<&Arc<dyn Engine>> {
        match &self.source {
            Source::Ready(engine) => Ok(engine),
            Source::Lazy { load, engine } => engine
                .get_or_init(|| match load() {
                    Ok(engine) => {
                        info!("native engine loaded");
                        Ok(engine)
                    }
                    Err(e) => {
                        error!(error = %e, "native engine failed to load");
                        Err(match e {
                            Error::EngineUnavailable(msg) => msg,
                            other => other.to_string(),
                        })
                    }
                })
                .as_ref()
                .map_err(|msg| Error::EngineUnavailable(msg.clone())),
        }
    }

    /// Run a request synchronously on the calling thread.
    pub fn send_blocking(&self, payload: &EncodedPayload) -> Result<EncodedResult> {
        let engine = self.engine()?;
        match engine.send(payload.as_str()).map(EncodedResult::new) {
            Some(result) if !result.is_empty() => Ok(result),
            Some(_) => Err(Error::EngineError("engine returned an empty result".to_string())),
            None => Err(Error::EngineError("engine returned no result".to_string())),
        }
    }

    /// Start a request and return its handle.
    pub fn submit(&self, payload: &EncodedPayload) -> Result<Handle> {
        let engine = self.engine()?;
        let handle = Handle::new(engine.submit(payload.as_str())).ok_or(Error::SubmissionFailed)?;
        debug!(handle = handle.get(), "submitted");
        Ok(handle)
    }

    /// Check a handle once, without blocking.
    ///
    /// A ready result with no content is an engine failure, distinct from
    /// [`Completion::Pending`].
    pub fn poll(&self, handle: Handle) -> Result<Completion> {
        let engine = self.engine()?;
        match engine.check(handle.get()).map(EncodedResult::new) {
            None => Ok(Completion::Pending(handle)),
            Some(result) if result.is_empty() => Err(Error::EngineError(format!(
                "engine returned an empty result for handle {}",
                handle.get()
            ))),
            Some(result) => Ok(Completion::Ready(result)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    struct CountdownEngine {
        remaining: AtomicU64,
    }

    impl Engine for CountdownEngine {
        fn send(&self, payload: &str) -> Option<String> {
            (!payload.is_empty()).then(|| payload.to_string())
        }

        fn submit(&self, payload: &str) -> u64 {
            if payload == "reject" {
                0
            } else {
                9
            }
        }

        fn check(&self, _handle: u64) -> Option<String> {
            match self.remaining.fetch_sub(1, Ordering::SeqCst) {
                0 => Some(String::new()),
                1 => Some("cmVhZHk=".to_string()),
                _ => None,
            }
        }
    }

    fn gateway(remaining: u64) -> Gateway {
        Gateway::with_engine(Arc::new(CountdownEngine {
            remaining: AtomicU64::new(remaining),
        }))
    }

    #[test]
    fn zero_handle_is_submission_failure() {
        let err = gateway(1).submit(&EncodedPayload::new("reject")).unwrap_err();
        assert!(matches!(err, Error::SubmissionFailed));
    }

    #[test]
    fn pending_poll_hands_the_handle_back() {
        let gw = gateway(2);
        let handle = gw.submit(&EncodedPayload::new("x")).unwrap();
        assert_eq!(handle.get(), 9);
        let handle = match gw.poll(handle).unwrap() {
            Completion::Pending(h) => h,
            Completion::Ready(_) => panic!("expected pending"),
        };
        assert!(matches!(gw.poll(handle).unwrap(), Completion::Ready(r) if r.as_str() == "cmVhZHk="));
    }

    #[test]
    fn ready_with_empty_result_is_an_engine_error() {
        let gw = gateway(0);
        let handle = Handle::new(3).unwrap();
        assert!(matches!(gw.poll(handle), Err(Error::EngineError(_))));
    }

    #[test]
    fn blocking_send_rejects_empty_result() {
        let gw = gateway(0);
        assert!(matches!(
            gw.send_blocking(&EncodedPayload::new("")),
            Err(Error::EngineError(_))
        ));
        assert!(matches!(
            gw.send_blocking(&EncodedPayload::new(" \n")),
            Err(Error::EngineError(_))
        ));
        assert_eq!(gw.send_blocking(&EncodedPayload::new("abc")).unwrap().as_str(), "abc");
    }

    #[test]
    fn load_failure_is_cached_not_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let gw = Gateway::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::EngineUnavailable("no such library".to_string()))
        });
        for _ in 0..3 {
            let err = gw.submit(&EncodedPayload::new("x")).unwrap_err();
            assert!(matches!(err, Error::EngineUnavailable(ref m) if m.contains("no such library")));
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(format!("{gw:?}").contains("failed"));
    }

    #[test]
    fn lazy_load_happens_once_on_first_use() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let gw = Gateway::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(CountdownEngine {
                remaining: AtomicU64::new(5),
            }) as Arc<dyn Engine>)
        });
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
        gw.submit(&EncodedPayload::new("a")).unwrap();
        gw.submit(&EncodedPayload::new("b")).unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handle_zero_does_not_exist() {
        assert!(Handle::new(0).is_none());
        assert_eq!(Handle::new(12).unwrap().to_string(), "#12");
    }
}
