// src/cache.rs
//
// Staleness gates and the in-memory build cache.
//
// Two gating strategies, one per artifact: a content fingerprint of the
// primary input (chain snapshot) and a high-water-mark date (IV history).
// Both fail open: any trouble reading a recorded token means "rebuild".

use crate::store::{read_sidecar, write_sidecar};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// SHA-256 of a file's contents, hex-encoded.
pub fn file_sha256(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

// =============================================================================
// Content-Fingerprint Gate
// =============================================================================

/// Rebuild decision for artifacts keyed on the exact bytes of one input.
pub struct FingerprintGate {
    input: PathBuf,
    artifact: PathBuf,
}

impl FingerprintGate {
    pub fn new(input: impl Into<PathBuf>, artifact: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            artifact: artifact.into(),
        }
    }

    fn sidecar(&self) -> PathBuf {
        let mut p = self.artifact.clone().into_os_string();
        p.push(".hash");
        PathBuf::from(p)
    }

    /// True when the artifact must be rebuilt.
    ///
    /// A missing *input* with an existing artifact reads as "not stale":
    /// the previous artifact keeps being served until fresh input arrives.
    pub fn is_stale(&self) -> bool {
        if !self.artifact.exists() {
            return true;
        }
        if !self.input.exists() {
            return false;
        }
        let current = match file_sha256(&self.input) {
            Ok(h) => h,
            Err(e) => {
                warn!("fingerprint gate: cannot hash {}: {}", self.input.display(), e);
                return true;
            }
        };
        match read_sidecar(&self.sidecar()) {
            Some(saved) => saved != current,
            None => true,
        }
    }

    /// Records the input fingerprint after a successful build.
    pub fn commit(&self) {
        match file_sha256(&self.input) {
            Ok(h) => {
                if let Err(e) = write_sidecar(&self.sidecar(), &h) {
                    warn!("fingerprint gate: cannot write {}: {}", self.sidecar().display(), e);
                }
            }
            Err(e) => debug!("fingerprint gate: no input to record: {}", e),
        }
    }
}

// =============================================================================
// High-Water-Mark Gate
// =============================================================================

/// Rebuild decision for date-indexed artifacts: rebuild when the input
/// carries a date beyond the last one already processed.
pub struct HighWaterMarkGate {
    artifact: PathBuf,
}

impl HighWaterMarkGate {
    pub fn new(artifact: impl Into<PathBuf>) -> Self {
        Self {
            artifact: artifact.into(),
        }
    }

    fn sidecar(&self) -> PathBuf {
        let mut p = self.artifact.clone().into_os_string();
        p.push(".mark");
        PathBuf::from(p)
    }

    /// True when the artifact must be rebuilt given the input's maximum
    /// normalized date (`None` when the input is absent or dateless).
    pub fn is_stale(&self, input_max: Option<u32>) -> bool {
        if !self.artifact.exists() {
            return true;
        }
        let current = match input_max {
            Some(d) => d,
            // Cannot tell what the input covers; fail open.
            None => return true,
        };
        match read_sidecar(&self.sidecar()).and_then(|s| s.parse::<u32>().ok()) {
            Some(saved) => current > saved,
            None => true,
        }
    }

    /// Records the processed high-water mark after a successful build.
    pub fn commit(&self, mark: u32) {
        if let Err(e) = write_sidecar(&self.sidecar(), &mark.to_string()) {
            warn!("high-water-mark gate: cannot write {}: {}", self.sidecar().display(), e);
        }
    }
}

// =============================================================================
// In-Memory Build Cache
// =============================================================================

/// Latest built payload, owned by the component that produced it and handed
/// to readers (the API server) as a shared handle.
pub struct BuildCache<T> {
    slot: RwLock<Option<Arc<Vec<T>>>>,
}

impl<T> BuildCache<T> {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Replaces the cached payload.
    pub fn store(&self, rows: Vec<T>) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::new(rows));
    }

    /// Returns the latest payload, if any build has completed.
    pub fn get(&self) -> Option<Arc<Vec<T>>> {
        self.slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl<T> Default for BuildCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
