//! Process defaults for request options, with a cached merged snapshot.
//!
//! # Design
//! `Defaults` is an explicit value shared by `Arc`, not a global, so tests
//! and embedders can run isolated instances side by side.
//!
//! The store maps a closed set of [`DefaultKey`]s to validated values and is
//! written only through [`Defaults::set_defaults`] and
//! [`Defaults::reset_defaults`]. Both invalidate the merged snapshot while
//! still holding the store's write lock.
//!
//! The snapshot lives in an [`ArcSwapOption`], so once it is built a read is
//! a single atomic load with no lock. A stale snapshot is rebuilt lazily
//! with double-checked locking: readers check the cache, then take the
//! rebuild mutex and check again. The rebuild reads the store and publishes
//! the snapshot while holding the store's read lock, so a snapshot of an
//! older store can never land after an invalidation.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::types::{OptionValue, RequestOptions};

/// Recognized default options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DefaultKey {
    Timeout,
    Proxy,
    UserAgent,
    /// TLS client fingerprint string.
    Ja3,
    /// HTTP/2 fingerprint string.
    Akamai,
    HeaderOrder,
    FollowRedirects,
    MaxRedirects,
    KeepAlive,
    Verify,
    ForceHttp1,
    LocalPort,
}

impl DefaultKey {
    pub const ALL: [DefaultKey; 12] = [
        DefaultKey::Timeout,
        DefaultKey::Proxy,
        DefaultKey::UserAgent,
        DefaultKey::Ja3,
        DefaultKey::Akamai,
        DefaultKey::HeaderOrder,
        DefaultKey::FollowRedirects,
        DefaultKey::MaxRedirects,
        DefaultKey::KeepAlive,
        DefaultKey::Verify,
        DefaultKey::ForceHttp1,
        DefaultKey::LocalPort,
    ];

    /// Name the value is stored under.
    pub fn storage_key(self) -> &'static str {
        match self {
            DefaultKey::Timeout => "default_timeout",
            DefaultKey::Proxy => "default_proxy",
            DefaultKey::UserAgent => "default_user_agent",
            DefaultKey::Ja3 => "default_ja3",
            DefaultKey::Akamai => "default_akamai",
            DefaultKey::HeaderOrder => "default_header_order",
            DefaultKey::FollowRedirects => "default_follow_redirects",
            DefaultKey::MaxRedirects => "default_max_redirects",
            DefaultKey::KeepAlive => "default_keep_alive",
            DefaultKey::Verify => "default_verify",
            DefaultKey::ForceHttp1 => "default_force_http1",
            DefaultKey::LocalPort => "default_local_port",
        }
    }

    /// Request option name the default applies to.
    pub fn param_name(self) -> &'static str {
        match self {
            DefaultKey::Timeout => "timeout",
            DefaultKey::Proxy => "proxy",
            DefaultKey::UserAgent => "user_agent",
            DefaultKey::Ja3 => "ja3",
            DefaultKey::Akamai => "akamai",
            DefaultKey::HeaderOrder => "header_order",
            DefaultKey::FollowRedirects => "follow_redirects",
            DefaultKey::MaxRedirects => "max_redirects",
            DefaultKey::KeepAlive => "keep_alive",
            DefaultKey::Verify => "verify",
            DefaultKey::ForceHttp1 => "force_http1",
            DefaultKey::LocalPort => "local_port",
        }
    }

    /// Check `value` against this key's type and range.
    pub fn validate(self, value: &OptionValue) -> Result<()> {
        let reason = match (self, value) {
            (DefaultKey::Timeout, OptionValue::Int(n)) if *n > 0 => return Ok(()),
            (DefaultKey::Timeout, OptionValue::Float(f)) if f.is_finite() && *f > 0.0 => return Ok(()),
            (DefaultKey::Timeout, _) => "must be a positive number".to_string(),

            (
                DefaultKey::Proxy | DefaultKey::UserAgent | DefaultKey::Ja3 | DefaultKey::Akamai,
                OptionValue::Str(_),
            ) => return Ok(()),
            (DefaultKey::Proxy | DefaultKey::UserAgent | DefaultKey::Ja3 | DefaultKey::Akamai, _) => {
                "must be a string".to_string()
            }

            (DefaultKey::HeaderOrder, OptionValue::List(_)) => return Ok(()),
            (DefaultKey::HeaderOrder, _) => "must be a list of header names".to_string(),

            (
                DefaultKey::FollowRedirects | DefaultKey::KeepAlive | DefaultKey::Verify | DefaultKey::ForceHttp1,
                OptionValue::Bool(_),
            ) => return Ok(()),
            (
                DefaultKey::FollowRedirects | DefaultKey::KeepAlive | DefaultKey::Verify | DefaultKey::ForceHttp1,
                _,
            ) => "must be a boolean".to_string(),

            (DefaultKey::MaxRedirects, OptionValue::Int(n)) if *n >= 0 => return Ok(()),
            (DefaultKey::MaxRedirects, _) => "must be a non-negative integer".to_string(),

            (DefaultKey::LocalPort, OptionValue::Int(n)) if (1..=65535).contains(n) => return Ok(()),
            (DefaultKey::LocalPort, _) => "must be an integer in [1, 65535]".to_string(),
        };
        Err(Error::InvalidOptionValue {
            key: self.param_name().to_string(),
            reason: format!("{reason}, got {} {value:?}", value.kind()),
        })
    }
}

impl FromStr for DefaultKey {
    type Err = Error;

    /// Accepts either the parameter name (`timeout`) or the storage key
    /// (`default_timeout`).
    fn from_str(name: &str) -> Result<Self> {
        DefaultKey::ALL
            .into_iter()
            .find(|k| k.param_name() == name || k.storage_key() == name)
            .ok_or_else(|| Error::UnknownOption(name.to_string()))
    }
}

impl fmt::Display for DefaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.storage_key())
    }
}

/// Result of [`Defaults::merge`].
#[derive(Debug, Clone)]
pub enum Merged<'a> {
    /// No defaults configured; the caller's options unchanged.
    Passthrough(&'a RequestOptions),
    /// No overrides; the shared cached snapshot.
    Cached(Arc<RequestOptions>),
    /// Defaults with overrides applied.
    Fresh(RequestOptions),
}

impl Merged<'_> {
    /// The cached snapshot, if this merge hit the cache.
    pub fn cached(&self) -> Option<&Arc<RequestOptions>> {
        match self {
            Merged::Cached(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn into_owned(self) -> RequestOptions {
        match self {
            Merged::Passthrough(opts) => opts.clone(),
            Merged::Cached(snapshot) => Arc::unwrap_or_clone(snapshot),
            Merged::Fresh(opts) => opts,
        }
    }
}

impl Deref for Merged<'_> {
    type Target = RequestOptions;

    fn deref(&self) -> &RequestOptions {
        match self {
            Merged::Passthrough(opts) => opts,
            Merged::Cached(snapshot) => snapshot,
            Merged::Fresh(opts) => opts,
        }
    }
}

/// Shared default option values.
#[derive(Debug, Default)]
pub struct Defaults {
    store: RwLock<BTreeMap<DefaultKey, OptionValue>>,
    // Entry count of `store`, for the lock-free empty check.
    len: AtomicUsize,
    cache: ArcSwapOption<RequestOptions>,
    rebuild: Mutex<()>,
    #[cfg(test)]
    rebuilds: AtomicUsize,
}

impl Defaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate every entry, then apply them all at once.
    ///
    /// On any error nothing is written.
    pub fn set_defaults<I, K, V>(&self, overrides: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<OptionValue>,
    {
        let validated = overrides
            .into_iter()
            .map(|(name, value)| {
                let key: DefaultKey = name.as_ref().parse()?;
                let value = value.into();
                key.validate(&value)?;
                Ok((key, value))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut store = self.store.write();
        for (key, value) in &validated {
            store.insert(*key, value.clone());
        }
        self.len.store(store.len(), Ordering::Release);
        self.cache.store(None);
        drop(store);

        debug!(
            keys = ?validated.iter().map(|(k, _)| k.storage_key()).collect::<Vec<_>>(),
            "defaults updated"
        );
        Ok(())
    }

    /// Remove every default.
    pub fn reset_defaults(&self) {
        let mut store = self.store.write();
        store.clear();
        self.len.store(0, Ordering::Release);
        self.cache.store(None);
        drop(store);
        debug!("defaults reset");
    }

    /// Current value for `key`, or `None` if unset.
    pub fn get_default(&self, key: &str) -> Result<Option<OptionValue>> {
        let key: DefaultKey = key.parse()?;
        Ok(self.store.read().get(&key).cloned())
    }

    pub fn is_empty(&self) -> bool {
        self.len.load(Ordering::Acquire) == 0
    }

    /// All defaults under their parameter names.
    ///
    /// Returns the same `Arc` until the next mutation.
    pub fn merged_defaults(&self) -> Arc<RequestOptions> {
        if let Some(snapshot) = self.cache.load_full() {
            return snapshot;
        }

        let _rebuild = self.rebuild.lock();
        if let Some(snapshot) = self.cache.load_full() {
            return snapshot;
        }

        let store = self.store.read();
        let snapshot = Arc::new(render(&store));
        self.cache.store(Some(Arc::clone(&snapshot)));
        drop(store);

        #[cfg(test)]
        self.rebuilds.fetch_add(1, Ordering::SeqCst);

        trace!(entries = snapshot.len(), "rebuilt merged defaults");
        snapshot
    }

    /// Apply defaults under `overrides`. Called once per outgoing request.
    pub fn merge<'a>(&self, overrides: &'a RequestOptions) -> Merged<'a> {
        if self.is_empty() {
            return Merged::Passthrough(overrides);
        }
        if overrides.is_empty() {
            return Merged::Cached(self.merged_defaults());
        }
        let mut merged = RequestOptions::clone(&self.merged_defaults());
        merged.extend_from(overrides);
        Merged::Fresh(merged)
    }
}

fn render(store: &BTreeMap<DefaultKey, OptionValue>) -> RequestOptions {
    store
        .iter()
        .map(|(key, value)| (key.param_name(), value.clone()))
        .collect()
}
