//! # WebM Fragment Repair
//!
//! Browser media recorders emit WebM in fixed-size chunks that ignore turn
//! boundaries. Only the very first chunk of a recording carries the EBML
//! header and track metadata, and every cluster timecode is relative to the
//! start of the whole recording. A turn's concatenated chunks are therefore
//! neither decodable on their own nor playable from zero.
//!
//! This module fixes exactly those two defects:
//! 1. **Missing initialization segment**: the bytes before the first
//!    cluster of a header-bearing chunk are cached per (session, direction)
//!    and prepended to later turns.
//! 2. **Non-zero timecodes**: every cluster timecode is rewritten relative
//!    to the first one found, keeping its original byte width.
//!
//! Anything else (truncation, corrupted elements, other containers) is
//! passed through untouched.

use crate::capture::Direction;
use crate::media::vint::{find_marker, find_marker_from, read_uint, read_vint, write_uint};
use std::collections::HashMap;
use tracing::debug;

/// EBML file signature every WebM stream starts with.
pub const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// Element id of a Cluster.
pub const CLUSTER_ID: [u8; 4] = [0x1F, 0x43, 0xB6, 0x75];

/// Element id of a Cluster's Timecode child.
pub const TIMECODE_ID: u8 = 0xE7;

/// Bytes preceding the first cluster, or the whole input when no cluster
/// exists (the input is then header data only).
pub fn extract_init_segment(bytes: &[u8]) -> Vec<u8> {
    match find_marker(bytes, &CLUSTER_ID) {
        Some(index) => bytes[..index].to_vec(),
        None => bytes.to_vec(),
    }
}

/// True iff `bytes` starts with the EBML signature.
pub fn has_container_header(bytes: &[u8]) -> bool {
    bytes.starts_with(&EBML_MAGIC)
}

/// Rewrite every cluster timecode relative to the first one.
///
/// For each cluster marker the cluster size (a vint) is skipped; if the next
/// byte is the Timecode id its size vint and big-endian value are read. The
/// first value found becomes the origin and every value, the first
/// included, is rewritten in place as `value - origin` (saturating at 0)
/// with the same byte width.
///
/// Returns the buffer and the origin, or 0 when no timecode was found. A
/// cluster without a readable timecode is skipped, not treated as an error.
pub fn rebase_cluster_timestamps(mut bytes: Vec<u8>) -> (Vec<u8>, u64) {
    let mut origin: Option<u64> = None;
    let mut search_from = 0;

    while let Some(cluster) = find_marker_from(&bytes, &CLUSTER_ID, search_from) {
        // Resume after this marker; clusters of unknown size make the size
        // field useless for jumping ahead.
        search_from = cluster + CLUSTER_ID.len();

        let (_, size_width) = read_vint(&bytes, search_from);
        if size_width == 0 {
            break;
        }

        let timecode_at = search_from + size_width;
        if bytes.get(timecode_at) != Some(&TIMECODE_ID) {
            debug!(offset = cluster, "Cluster without leading timecode, skipping");
            continue;
        }

        let (value_width, len_width) = read_vint(&bytes, timecode_at + 1);
        let value_at = timecode_at + 1 + len_width;
        let value_width = value_width as usize;

        let Some(timecode) = read_uint(&bytes, value_at, value_width) else {
            debug!(offset = cluster, "Unreadable cluster timecode, skipping");
            continue;
        };

        let base = *origin.get_or_insert(timecode);
        write_uint(&mut bytes, value_at, timecode.saturating_sub(base), value_width);
    }

    (bytes, origin.unwrap_or(0))
}

/// Key of a cached initialization segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub session_id: String,
    pub direction: Direction,
}

impl CacheKey {
    pub fn new(session_id: &str, direction: Direction) -> Self {
        Self {
            session_id: session_id.to_string(),
            direction,
        }
    }
}

/// Initialization segments keyed by (session, direction).
///
/// Entries are filled lazily from the first header-bearing buffer seen for
/// a key and never replaced afterwards; they are dropped when the owning
/// session ends.
#[derive(Debug, Default)]
pub struct InitSegmentCache {
    entries: HashMap<CacheKey, Vec<u8>>,
}

impl InitSegmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str, direction: Direction) -> Option<&[u8]> {
        self.entries
            .get(&CacheKey::new(session_id, direction))
            .map(Vec::as_slice)
    }

    pub fn contains(&self, session_id: &str, direction: Direction) -> bool {
        self.entries.contains_key(&CacheKey::new(session_id, direction))
    }

    /// Cache the initialization segment of `bytes` unless the key already
    /// has one. Returns true when a new entry was stored.
    pub fn seed_from(&mut self, session_id: &str, direction: Direction, bytes: &[u8]) -> bool {
        let key = CacheKey::new(session_id, direction);
        if self.entries.contains_key(&key) {
            return false;
        }
        let segment = extract_init_segment(bytes);
        debug!(
            session_id = %session_id,
            direction = %direction,
            bytes = segment.len(),
            "Cached initialization segment"
        );
        self.entries.insert(key, segment);
        true
    }

    /// Drop every entry owned by `session_id`.
    pub fn evict_session(&mut self, session_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.session_id != session_id);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Turn a turn's concatenated fragments into an independently playable
/// buffer.
///
/// ## Cases:
/// 1. **Header present**: seed the cache if empty, rebase, return.
/// 2. **Cached header**: prepend it, rebase the whole buffer, return.
/// 3. **Neither**: return the input unchanged. The result may not play on
///    its own; this is the degraded path, not an error.
pub fn make_playable(
    cache: &mut InitSegmentCache,
    session_id: &str,
    direction: Direction,
    raw: Vec<u8>,
) -> Vec<u8> {
    if has_container_header(&raw) {
        cache.seed_from(session_id, direction, &raw);
        let (rebased, origin) = rebase_cluster_timestamps(raw);
        debug!(session_id = %session_id, direction = %direction, origin, "Rebased header-bearing audio");
        return rebased;
    }

    if let Some(init) = cache.get(session_id, direction) {
        let mut joined = Vec::with_capacity(init.len() + raw.len());
        joined.extend_from_slice(init);
        joined.extend_from_slice(&raw);
        let (rebased, origin) = rebase_cluster_timestamps(joined);
        debug!(session_id = %session_id, direction = %direction, origin, "Prepended cached initialization segment");
        return rebased;
    }

    debug!(
        session_id = %session_id,
        direction = %direction,
        "No initialization segment available, passing audio through"
    );
    raw
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// EBML header followed by a minimal Segment/Tracks stand-in.
    pub(crate) fn header_bytes() -> Vec<u8> {
        let mut bytes = EBML_MAGIC.to_vec();
        bytes.extend_from_slice(&[0x9F, 0x42, 0x86, 0x81, 0x01]);
        bytes.extend_from_slice(&[0x18, 0x53, 0x80, 0x67, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        bytes.extend_from_slice(&[0x16, 0x54, 0xAE, 0x6B, 0x82, 0xAE, 0x80]);
        bytes
    }

    /// Cluster of unknown size with a 2-byte timecode and a dummy block.
    pub(crate) fn cluster_bytes(timecode: u16) -> Vec<u8> {
        let mut bytes = CLUSTER_ID.to_vec();
        bytes.push(0xFF);
        bytes.extend_from_slice(&[TIMECODE_ID, 0x82]);
        bytes.extend_from_slice(&timecode.to_be_bytes());
        bytes.extend_from_slice(&[0xA3, 0x84, 0x81, 0x00, 0x00, 0x80]);
        bytes
    }

    /// Timecodes of every cluster in `bytes`, in order.
    pub(crate) fn timecodes(bytes: &[u8]) -> Vec<u64> {
        let mut found = Vec::new();
        let mut from = 0;
        while let Some(at) = find_marker_from(bytes, &CLUSTER_ID, from) {
            from = at + 4;
            let (_, w) = read_vint(bytes, from);
            let tc_at = from + w;
            if bytes.get(tc_at) == Some(&TIMECODE_ID) {
                let (len, lw) = read_vint(bytes, tc_at + 1);
                if let Some(v) = read_uint(bytes, tc_at + 1 + lw, len as usize) {
                    found.push(v);
                }
            }
        }
        found
    }

    #[test]
    fn test_extract_init_segment_stops_at_cluster() {
        let mut bytes = header_bytes();
        bytes.extend(cluster_bytes(10));
        assert_eq!(extract_init_segment(&bytes), header_bytes());
    }

    #[test]
    fn test_extract_init_segment_without_cluster_returns_all() {
        assert_eq!(extract_init_segment(&header_bytes()), header_bytes());
    }

    #[test]
    fn test_has_container_header() {
        assert!(has_container_header(&header_bytes()));
        assert!(!has_container_header(&cluster_bytes(0)));
        assert!(!has_container_header(&[0x1A, 0x45]));
    }

    #[test]
    fn test_rebase_zeroes_first_and_shifts_rest() {
        let mut bytes = cluster_bytes(5000);
        bytes.extend(cluster_bytes(6000));
        bytes.extend(cluster_bytes(7250));
        let len = bytes.len();

        let (rebased, origin) = rebase_cluster_timestamps(bytes);
        assert_eq!(origin, 5000);
        assert_eq!(rebased.len(), len);
        assert_eq!(timecodes(&rebased), vec![0, 1000, 2250]);
    }

    #[test]
    fn test_rebase_never_goes_negative() {
        let mut bytes = cluster_bytes(3000);
        bytes.extend(cluster_bytes(1000));
        let (rebased, _) = rebase_cluster_timestamps(bytes);
        assert_eq!(timecodes(&rebased), vec![0, 0]);
    }

    #[test]
    fn test_rebase_without_clusters_is_passthrough() {
        let bytes = header_bytes();
        let (rebased, origin) = rebase_cluster_timestamps(bytes.clone());
        assert_eq!(rebased, bytes);
        assert_eq!(origin, 0);
    }

    #[test]
    fn test_rebase_skips_cluster_without_timecode() {
        let mut bytes = CLUSTER_ID.to_vec();
        bytes.extend_from_slice(&[0xFF, 0xA3, 0x81, 0x00]);
        bytes.extend(cluster_bytes(400));
        bytes.extend(cluster_bytes(900));
        let (rebased, origin) = rebase_cluster_timestamps(bytes);
        assert_eq!(origin, 400);
        assert_eq!(timecodes(&rebased), vec![0, 500]);
    }

    #[test]
    fn test_rebase_truncated_timecode_is_left_alone() {
        let mut bytes = CLUSTER_ID.to_vec();
        bytes.extend_from_slice(&[0xFF, TIMECODE_ID, 0x84, 0x00]);
        let (rebased, origin) = rebase_cluster_timestamps(bytes.clone());
        assert_eq!(rebased, bytes);
        assert_eq!(origin, 0);
    }

    #[test]
    fn test_make_playable_with_header_seeds_cache() {
        let mut cache = InitSegmentCache::new();
        let mut raw = header_bytes();
        raw.extend(cluster_bytes(120));

        let out = make_playable(&mut cache, "s1", Direction::Input, raw);
        assert!(has_container_header(&out));
        assert_eq!(timecodes(&out), vec![0]);
        assert_eq!(cache.get("s1", Direction::Input), Some(header_bytes().as_slice()));
        assert!(!cache.contains("s1", Direction::Output));
    }

    #[test]
    fn test_make_playable_prepends_cached_header() {
        let mut cache = InitSegmentCache::new();
        cache.seed_from("s1", Direction::Output, &header_bytes());

        let mut raw = cluster_bytes(8000);
        raw.extend(cluster_bytes(9000));
        let out = make_playable(&mut cache, "s1", Direction::Output, raw);

        assert!(out.starts_with(&header_bytes()));
        assert_eq!(timecodes(&out), vec![0, 1000]);
    }

    #[test]
    fn test_make_playable_header_output_keeps_header() {
        let mut cache = InitSegmentCache::new();
        let mut raw = header_bytes();
        raw.extend(cluster_bytes(0));
        let once = make_playable(&mut cache, "s1", Direction::Input, raw);
        let twice = make_playable(&mut cache, "s1", Direction::Input, once.clone());
        assert!(has_container_header(&twice));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_make_playable_without_header_or_cache_is_passthrough() {
        let mut cache = InitSegmentCache::new();
        let raw = cluster_bytes(700);
        let out = make_playable(&mut cache, "s1", Direction::Input, raw.clone());
        assert_eq!(out, raw);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_keeps_first_segment_and_evicts_by_session() {
        let mut cache = InitSegmentCache::new();
        assert!(cache.seed_from("a", Direction::Input, &header_bytes()));
        assert!(!cache.seed_from("a", Direction::Input, &[0x1A, 0x45, 0xDF, 0xA3, 0x00]));
        assert!(cache.seed_from("a", Direction::Output, &header_bytes()));
        assert!(cache.seed_from("b", Direction::Input, &header_bytes()));
        assert_eq!(cache.get("a", Direction::Input), Some(header_bytes().as_slice()));

        assert_eq!(cache.evict_session("a"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("b", Direction::Input));
    }
}
