//! Async bridge and defaults cache for an opaque native request engine.
//!
//! # Overview
//! The engine is a blocking black box that takes an encoded payload and
//! produces an encoded result. This crate lets a cooperative async runtime
//! drive it without blocking the event loop: submit, get a handle, poll the
//! handle with an adaptive backoff until it is ready or a deadline passes.
//! A shared [`Defaults`] store supplies option values a call leaves out.
//!
//! # Design
//! - [`codec`]: MessagePack option maps inside base64, byte-exact for bodies.
//! - [`engine`]: the [`Engine`] seam and the [`Gateway`] choke point; no
//!   lock around engine calls.
//! - [`native`]: loads the engine's C ABI from a shared library.
//! - [`defaults`]: validated defaults with a double-checked merged snapshot.
//! - [`bridge`]: the submit/poll/timeout state machine.
//! - [`client`]: ties the pieces together, including ordered batches.
//!
//! ```no_run
//! # async fn demo() -> relay_core::Result<()> {
//! use std::sync::Arc;
//! use relay_core::{Client, Defaults, Gateway, RequestOptions};
//!
//! let defaults = Arc::new(Defaults::new());
//! defaults.set_defaults([("timeout", 10)])?;
//! let client = Client::new(Arc::new(Gateway::from_env()), defaults);
//! let resp = client.request(&RequestOptions::new().with("url", "https://example.com")).await?;
//! println!("{}", resp.status);
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod client;
pub mod codec;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod http;
pub mod native;
pub mod types;

pub use bridge::{BridgeState, PollConfig, WaitStrategy};
pub use client::Client;
pub use codec::{EncodedPayload, EncodedResult};
pub use defaults::{DefaultKey, Defaults, Merged};
pub use engine::{Completion, Engine, Gateway, Handle};
pub use error::{DecodeError, Error, Result};
pub use http::EngineResponse;
pub use native::{EngineLocator, NativeEngine};
pub use types::{OptionValue, RequestOptions, ResultMap};
