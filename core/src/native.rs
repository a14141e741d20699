//! Dynamic loading of the native engine artifact.
//!
//! The engine exports four C symbols:
//!
//! ```c
//! char*    relay_engine_send(const char* payload);   // NULL on failure
//! uint64_t relay_engine_submit(const char* payload); // 0 = rejected
//! char*    relay_engine_check(uint64_t handle);      // NULL = not ready
//! void     relay_engine_free(char* result);
//! ```
//!
//! Every string the engine returns is copied and handed straight back to
//! `relay_engine_free`, so no engine-owned memory escapes this module.

use std::env;
use std::ffi::{c_char, CStr, CString};
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::debug;

use crate::engine::Engine;
use crate::error::{Error, Result};

/// Environment variable that overrides engine discovery.
pub const ENGINE_PATH_ENV: &str = "RELAY_ENGINE_PATH";

/// Base name of the engine library (`librelay_ffi.so` on Linux).
pub const ENGINE_LIB_NAME: &str = "relay_ffi";

pub const SEND_SYMBOL: &[u8] = b"relay_engine_send\0";
pub const SUBMIT_SYMBOL: &[u8] = b"relay_engine_submit\0";
pub const CHECK_SYMBOL: &[u8] = b"relay_engine_check\0";
pub const FREE_SYMBOL: &[u8] = b"relay_engine_free\0";

type SendFn = unsafe extern "C" fn(*const c_char) -> *mut c_char;
type SubmitFn = unsafe extern "C" fn(*const c_char) -> u64;
type CheckFn = unsafe extern "C" fn(u64) -> *mut c_char;
type FreeFn = unsafe extern "C" fn(*mut c_char);

/// Finds the engine artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineLocator {
    explicit: Option<PathBuf>,
    search_paths: Vec<PathBuf>,
}

impl EngineLocator {
    /// `RELAY_ENGINE_PATH` if set, otherwise the default search order.
    pub fn from_env() -> Self {
        let explicit = env::var_os(ENGINE_PATH_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self {
            explicit,
            search_paths: default_search_paths(),
        }
    }

    /// Always load from `path`.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            explicit: Some(path.into()),
            search_paths: Vec::new(),
        }
    }

    /// Search only these directories, in order.
    pub fn with_search_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            explicit: None,
            search_paths: paths,
        }
    }

    /// Every file path that [`EngineLocator::locate`] would try, in order.
    pub fn candidates(&self) -> Vec<PathBuf> {
        match &self.explicit {
            Some(path) => vec![path.clone()],
            None => {
                let file = library_filename();
                self.search_paths.iter().map(|dir| dir.join(&file)).collect()
            }
        }
    }

    /// Resolve the artifact path. An explicit path is authoritative: if it
    /// does not exist the search order is not consulted.
    pub fn locate(&self) -> Result<PathBuf> {
        let candidates = self.candidates();
        if let Some(found) = candidates.iter().find(|p| p.is_file()) {
            return Ok(found.clone());
        }
        let tried = candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(Error::EngineUnavailable(match &self.explicit {
            Some(_) => format!("{ENGINE_PATH_ENV} points to a missing file: {tried}"),
            None => format!("{} not found (tried: {tried}); set {ENGINE_PATH_ENV}", library_filename()),
        }))
    }
}

impl Default for EngineLocator {
    fn default() -> Self {
        Self::from_env()
    }
}

/// An engine loaded from a shared library.
pub struct NativeEngine {
    path: PathBuf,
    send: SendFn,
    submit: SubmitFn,
    check: CheckFn,
    free: FreeFn,
    // Keeps the function pointers above valid.
    _library: Library,
}

impl NativeEngine {
    /// Load the library at `path` and resolve all four symbols.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let unavailable = |what: String| Error::EngineUnavailable(format!("{}: {what}", path.display()));

        // Safety: loading runs the library's initializers. The artifact is
        // trusted to be a relay engine build.
        let library = unsafe { Library::new(&path) }.map_err(|e| unavailable(e.to_string()))?;

        // Safety: the symbol types match the exported C signatures, and the
        // pointers are only used while `library` is alive.
        let (send, submit, check, free) = unsafe {
            let send = *library
                .get::<SendFn>(SEND_SYMBOL)
                .map_err(|e| unavailable(e.to_string()))?;
            let submit = *library
                .get::<SubmitFn>(SUBMIT_SYMBOL)
                .map_err(|e| unavailable(e.to_string()))?;
            let check = *library
                .get::<CheckFn>(CHECK_SYMBOL)
                .map_err(|e| unavailable(e.to_string()))?;
            let free = *library
                .get::<FreeFn>(FREE_SYMBOL)
                .map_err(|e| unavailable(e.to_string()))?;
            (send, submit, check, free)
        };

        debug!(path = %path.display(), "resolved engine symbols");
        Ok(Self {
            path,
            send,
            submit,
            check,
            free,
            _library: library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy an engine-owned string and release it.
    fn take(&self, ptr: *mut c_char) -> Option<String> {
        if ptr.is_null() {
            return None;
        }
        // Safety: non-null pointers from the engine are NUL-terminated and
        // stay valid until passed to `free`, which happens exactly once here.
        let text = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
        unsafe { (self.free)(ptr) };
        Some(text)
    }
}

impl Engine for NativeEngine {
    fn send(&self, payload: &str) -> Option<String> {
        let payload = CString::new(payload).ok()?;
        let ptr = unsafe { (self.send)(payload.as_ptr()) };
        self.take(ptr)
    }

    fn submit(&self, payload: &str) -> u64 {
        match CString::new(payload) {
            Ok(payload) => unsafe { (self.submit)(payload.as_ptr()) },
            Err(_) => 0,
        }
    }

    fn check(&self, handle: u64) -> Option<String> {
        let ptr = unsafe { (self.check)(handle) };
        self.take(ptr)
    }
}

/// Platform-specific file name of the engine library.
pub fn library_filename() -> String {
    if cfg!(target_os = "windows") {
        format!("{ENGINE_LIB_NAME}.dll")
    } else if cfg!(target_os = "macos") {
        format!("lib{ENGINE_LIB_NAME}.dylib")
    } else {
        format!("lib{ENGINE_LIB_NAME}.so")
    }
}

/// Executable directory, working directory, then system library dirs.
fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(dir) = env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf)) {
        paths.push(dir);
    }
    if let Ok(cwd) = env::current_dir() {
        paths.push(cwd);
    }
    if cfg!(unix) {
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/usr/lib"));
    }

    paths
}
