//! Store configuration: where the token driver lives and which key mode
//! new keys get

use std::path::PathBuf;

use crate::model::KeyMode;

#[cfg(target_os = "macos")]
const LIBRARY_CANDIDATES: &[&str] = &[
    "/usr/local/lib/libykcs11.dylib",
    "/opt/homebrew/lib/libykcs11.dylib",
    "/usr/local/opt/yubico-piv-tool/lib/libykcs11.dylib",
    "/Applications/YubiKey Manager.app/Contents/MacOS/libykcs11.dylib",
];

#[cfg(target_os = "windows")]
const LIBRARY_CANDIDATES: &[&str] = &[
    "C:\\Program Files\\Yubico\\Yubico PIV Tool\\bin\\libykcs11.dll",
    "C:\\Program Files (x86)\\Yubico\\Yubico PIV Tool\\bin\\libykcs11.dll",
];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const LIBRARY_CANDIDATES: &[&str] = &[
    "/usr/lib/libykcs11.so",
    "/usr/lib/libykcs11.so.2",
    "/usr/lib/x86_64-linux-gnu/libykcs11.so",
    "/usr/lib/x86_64-linux-gnu/libykcs11.so.2",
    "/usr/lib/aarch64-linux-gnu/libykcs11.so",
    "/usr/lib64/libykcs11.so",
    "/usr/lib64/libykcs11.so.2",
    "/usr/local/lib/libykcs11.so",
];

/// Settings fixed for the lifetime of a key store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Driver libraries to try, in order; the first that exists and loads wins.
    pub library_candidates: Vec<PathBuf>,
    /// Touch/PIN policy applied to every provisioned key.
    pub key_mode: KeyMode,
}

impl StoreConfig {
    /// Use exactly `library` instead of searching the well-known locations.
    pub fn with_library(mut self, library: impl Into<PathBuf>) -> Self {
        self.library_candidates = vec![library.into()];
        self
    }

    pub fn with_key_mode(mut self, key_mode: KeyMode) -> Self {
        self.key_mode = key_mode;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            library_candidates: LIBRARY_CANDIDATES.iter().map(PathBuf::from).collect(),
            key_mode: KeyMode::default(),
        }
    }
}
