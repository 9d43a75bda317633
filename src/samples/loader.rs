// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Sample loading and caching.
//!
//! Samples are decoded entirely into memory ahead of playback so the render
//! path never touches the filesystem.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::decode::{DecodeError, DecodedSample, SampleFormat};

/// Errors raised while loading a sample from disk.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Unrecognized sample format: {0}")]
    UnrecognizedFormat(PathBuf),
}

/// Manages loading and caching of decoded samples.
///
/// The cache is keyed by path and hands out shared references, so every voice
/// playing a sample reads the same buffer.
#[derive(Default)]
pub struct SampleLoader {
    cache: RwLock<HashMap<PathBuf, Arc<DecodedSample>>>,
}

impl SampleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a sample, picking the format from the file extension. Files with
    /// no extension are probed.
    /// Returns a cached version if already loaded.
    pub fn load(&self, path: &Path) -> Result<Arc<DecodedSample>, LoadError> {
        self.load_with_format(path, None)
    }

    /// Loads a sample with an explicit format, falling back to the file
    /// extension when `format` is `None`.
    pub fn load_with_format(
        &self,
        path: &Path,
        format: Option<SampleFormat>,
    ) -> Result<Arc<DecodedSample>, LoadError> {
        if let Some(sample) = self.cache.read().get(path) {
            debug!(path = ?path, "Using cached sample");
            return Ok(sample.clone());
        }

        let format = match format {
            Some(format) => Some(format),
            None => match path.extension() {
                Some(extension) => Some(
                    extension
                        .to_str()
                        .and_then(SampleFormat::from_extension)
                        .ok_or_else(|| LoadError::UnrecognizedFormat(path.to_path_buf()))?,
                ),
                None => None,
            },
        };

        info!(path = ?path, format = ?format, "Loading sample into memory");
        let bytes = std::fs::read(path)?;
        let (format, sample) = match Self::decode_bytes(&bytes, format) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(path = ?path, error = ?e, "Failed to decode sample");
                return Err(e);
            }
        };

        if sample.is_truncated() {
            warn!(path = ?path, "Sample is truncated or corrupt, keeping what was recovered");
        }

        info!(
            path = ?path,
            format = %format,
            channels = sample.channel_count(),
            sample_rate = sample.sample_rate(),
            frames = sample.len(),
            looped = sample.has_loop(),
            duration_ms = sample.duration().as_millis(),
            memory_kb = sample.memory_size() / 1024,
            "Sample loaded"
        );

        // Another thread may have raced us here; keep whichever landed first.
        let sample = self
            .cache
            .write()
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(sample))
            .clone();
        Ok(sample)
    }

    /// Decodes an in-memory sample. `None` probes every format in turn.
    pub fn decode_bytes(
        bytes: &[u8],
        format: Option<SampleFormat>,
    ) -> Result<(SampleFormat, DecodedSample), LoadError> {
        match format {
            Some(format) => Ok((format, format.decoder().decode(bytes)?)),
            None => Ok(SampleFormat::probe(bytes)?),
        }
    }

    /// Loads many samples in parallel. Results come back in input order.
    pub fn load_all(
        &self,
        requests: &[(PathBuf, Option<SampleFormat>)],
    ) -> Vec<Result<Arc<DecodedSample>, LoadError>> {
        requests
            .par_iter()
            .map(|(path, format)| self.load_with_format(path, *format))
            .collect()
    }

    /// Returns the cached sample for `path`, if any.
    pub fn get(&self, path: &Path) -> Option<Arc<DecodedSample>> {
        self.cache.read().get(path).cloned()
    }

    /// Returns the number of cached samples.
    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }

    /// Returns the total memory used by cached samples.
    pub fn total_memory_usage(&self) -> usize {
        self.cache.read().values().map(|s| s.memory_size()).sum()
    }

    /// Drops cached samples nothing else holds. Returns how many were evicted.
    pub fn evict_unused(&self) -> usize {
        let mut cache = self.cache.write();
        let before = cache.len();
        cache.retain(|_, sample| Arc::strong_count(sample) > 1);
        let evicted = before - cache.len();
        if evicted > 0 {
            debug!(evicted, "Evicted unused samples");
        }
        evicted
    }
}

impl std::fmt::Debug for SampleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleLoader")
            .field("cached_samples", &self.cached_count())
            .field("total_memory_kb", &(self.total_memory_usage() / 1024))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).expect("create");
        file.write_all(bytes).expect("write");
        path
    }

    /// One compressed block: shift 12, no filter, end flag, nibbles 1.
    fn compressed_block() -> Vec<u8> {
        let mut block = vec![0xC1];
        block.extend_from_slice(&[0x11; 8]);
        block
    }

    #[test]
    fn test_load_by_extension() {
        let _ = tracing_subscriber::fmt::try_init();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(dir.path(), "tone.brr", &compressed_block());

        let loader = SampleLoader::new();
        let sample = loader.load(&path).expect("load");
        assert_eq!(sample.len(), 16);
        assert_eq!(sample.sample_rate(), 16744);
        assert_eq!(loader.cached_count(), 1);
        assert!(loader.total_memory_usage() > 0);
    }

    #[test]
    fn test_cache_hit_shares_buffer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(dir.path(), "tone.ul", &[0x00, 0x7F, 0xFF]);

        let loader = SampleLoader::new();
        let first = loader.load(&path).expect("load");
        // A cache hit never goes back to disk.
        std::fs::remove_file(&path).expect("remove");
        let second = loader.load(&path).expect("cached load");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_unrecognized_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(dir.path(), "tone.wav", &[0; 16]);

        let loader = SampleLoader::new();
        assert!(matches!(
            loader.load(&path),
            Err(LoadError::UnrecognizedFormat(p)) if p == path
        ));
    }

    #[test]
    fn test_explicit_format_overrides_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(dir.path(), "tone.wav", &[0x00, 0x7F]);

        let loader = SampleLoader::new();
        let sample = loader
            .load_with_format(&path, Some(SampleFormat::Companded))
            .expect("load");
        assert_eq!(sample.len(), 2);
    }

    #[test]
    fn test_format_mismatch_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(dir.path(), "broken.brr", &[0; 10]);

        let loader = SampleLoader::new();
        assert!(matches!(loader.load(&path), Err(LoadError::Decode(_))));
        assert_eq!(loader.cached_count(), 0);
    }

    #[test]
    fn test_missing_file() {
        let loader = SampleLoader::new();
        assert!(matches!(
            loader.load(Path::new("/nonexistent/tone.brr")),
            Err(LoadError::Io(_))
        ));
    }

    #[test]
    fn test_probe_without_extension() {
        let (format, sample) =
            SampleLoader::decode_bytes(&compressed_block(), None).expect("decode");
        assert_eq!(format, SampleFormat::Compressed);
        assert_eq!(sample.len(), 16);
    }

    #[test]
    fn test_load_all_in_parallel() {
        let dir = tempfile::tempdir().expect("tempdir");
        let requests: Vec<(PathBuf, Option<SampleFormat>)> = (0..8)
            .map(|i| {
                let bytes = vec![0x10u8; i + 1];
                (write_file(dir.path(), &format!("s{i}.ul"), &bytes), None)
            })
            .collect();

        let loader = SampleLoader::new();
        let results = loader.load_all(&requests);
        assert_eq!(results.len(), 8);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.as_ref().expect("load").len(), i + 1);
        }
        assert_eq!(loader.cached_count(), 8);
    }

    #[test]
    fn test_evict_unused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = write_file(dir.path(), "a.ul", &[1, 2, 3]);
        let b = write_file(dir.path(), "b.ul", &[4, 5, 6]);

        let loader = SampleLoader::new();
        let held = loader.load(&a).expect("load a");
        loader.load(&b).expect("load b");

        assert_eq!(loader.evict_unused(), 1);
        assert!(loader.get(&a).is_some());
        assert!(loader.get(&b).is_none());
        drop(held);
        assert_eq!(loader.evict_unused(), 1);
        assert_eq!(loader.cached_count(), 0);
    }
}
