//! Model metadata cache
//!
//! Extracts context length, quantization and architecture from GGUF file
//! headers and caches the result keyed by path. An entry stays valid while
//! the file's size and modification time match the stored fingerprint; a
//! valid entry is returned without re-reading the file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// How many bytes of the file prefix are scanned for metadata markers
const HEADER_SCAN_BYTES: usize = 4096;

/// Byte window inspected after each marker match
const VALUE_WINDOW: usize = 64;

const MARKER_CONTEXT_LENGTH: &[u8] = b"context_length";
const MARKER_QUANTIZATION: &[u8] = b"quantization";
const MARKER_ARCHITECTURE: &[u8] = b"architecture";

/// Size + mtime fingerprint of a model file at extraction time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub size: u64,
    pub mtime: f64,
}

/// Cached metadata for one model file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub context_length: Option<u32>,
    pub quantization: Option<String>,
    pub architecture: Option<String>,
    #[serde(rename = "_file_meta", default, skip_serializing_if = "Option::is_none")]
    pub file_meta: Option<FileMeta>,
}

/// The whole cache, keyed by path string
pub type MetadataCache = HashMap<String, MetadataEntry>;

/// Compute the current fingerprint of a file, if it can be stat'ed
pub fn fingerprint(path: &Path) -> Option<FileMeta> {
    let meta = fs::metadata(path).ok()?;
    let mtime = meta
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_secs_f64();
    Some(FileMeta {
        size: meta.len(),
        mtime,
    })
}

/// Read the cache file, recovering to an empty cache on any corruption
pub fn read_cache(cache_path: &Path) -> MetadataCache {
    if !cache_path.exists() {
        return MetadataCache::new();
    }

    let json = match fs::read_to_string(cache_path) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("Failed to read metadata cache: {}, starting fresh", e);
            return MetadataCache::new();
        }
    };

    let value: serde_json::Value = match serde_json::from_str(&json) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Metadata cache is corrupt: {}, starting fresh", e);
            return MetadataCache::new();
        }
    };

    let Some(object) = value.as_object() else {
        tracing::warn!("Metadata cache has invalid format, starting fresh");
        return MetadataCache::new();
    };

    let mut cache = MetadataCache::new();
    for (path, entry) in object {
        match serde_json::from_value::<MetadataEntry>(entry.clone()) {
            Ok(entry) => {
                cache.insert(path.clone(), entry);
            }
            Err(e) => {
                tracing::warn!("Dropping invalid cache entry for {}: {}", path, e);
            }
        }
    }
    cache
}

/// Write the cache file. Failures are non-fatal for a scan.
pub fn write_cache(cache_path: &Path, cache: &MetadataCache) {
    let result = serde_json::to_string_pretty(cache)
        .map_err(std::io::Error::other)
        .and_then(|json| fs::write(cache_path, json));
    if let Err(e) = result {
        tracing::warn!("Failed to write metadata cache: {}", e);
    }
}

/// Return cached metadata for `path` if its fingerprint still matches,
/// otherwise re-extract from the file header and overwrite the entry.
pub fn get_or_parse(path: &Path, cache: &mut MetadataCache) -> MetadataEntry {
    let key = path.display().to_string();
    let current = fingerprint(path);

    if let Some(entry) = cache.get(&key) {
        match (&entry.file_meta, &current) {
            (Some(stored), Some(now)) if stored == now => {
                tracing::debug!("Metadata cache hit for {}", key);
                return entry.clone();
            }
            _ => {
                tracing::debug!("Metadata cache entry stale for {}", key);
            }
        }
    }

    let mut entry = parse_model_header(path);
    entry.file_meta = current;
    cache.insert(key, entry.clone());
    entry
}

/// Best-effort extraction of metadata markers from a bounded file prefix.
///
/// GGUF keys such as `llama.context_length` or `general.architecture` are
/// found by substring; the value is taken as the next NUL-delimited run of
/// bytes after the marker. Unreadable files yield an empty entry.
pub fn parse_model_header(path: &Path) -> MetadataEntry {
    let mut entry = MetadataEntry::default();

    let mut buf = Vec::with_capacity(HEADER_SCAN_BYTES);
    let read = fs::File::open(path)
        .and_then(|f| f.take(HEADER_SCAN_BYTES as u64).read_to_end(&mut buf));
    if read.is_err() {
        return entry;
    }

    entry.context_length = marker_value(&buf, MARKER_CONTEXT_LENGTH)
        .and_then(|s| leading_digits(&s))
        .filter(|n| *n > 0);
    entry.quantization = marker_value(&buf, MARKER_QUANTIZATION);
    entry.architecture = marker_value(&buf, MARKER_ARCHITECTURE);
    entry
}

/// Decode the NUL-delimited value following `marker`, if present
fn marker_value(buf: &[u8], marker: &[u8]) -> Option<String> {
    let idx = find_subsequence(buf, marker)?;
    let end = (idx + VALUE_WINDOW).min(buf.len());
    let snippet = &buf[idx..end];
    let value = snippet.split(|b| *b == 0).nth(1)?;
    let text = String::from_utf8_lossy(value).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn leading_digits(s: &str) -> Option<u32> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
