//! Hybrid File identifiers.
//!
//! A File id is 40 lowercase hex characters made of three fixed fields:
//!
//! ```text
//! 0                     22        32      40
//! | path fingerprint    | seconds | chunks |
//! ```
//!
//! The first 32 characters depend only on the path and modification time, so
//! a file can be matched against the previous snapshot before it is read.
//! The last 8 characters fingerprint the ordered chunk list and stay zero
//! until the file has been chunked.

use crate::types::Digest;

pub const TIMESTAMP_INDEX: usize = 22;
pub const CHUNK_HASH_INDEX: usize = 32;
pub const ID_LEN: usize = 40;

const TIMESTAMP_LEN: usize = CHUNK_HASH_INDEX - TIMESTAMP_INDEX;
const CHUNK_HASH_LEN: usize = ID_LEN - CHUNK_HASH_INDEX;

/// Content hash used for every fingerprint in the system.
pub fn hash(data: &[u8]) -> String {
    Digest::from_data(data).to_hex()
}

/// Id of a file whose content has not been chunked yet.
///
/// `updated` is in milliseconds; only whole seconds take part in the id.
pub fn provisional_id(path: &str, updated: i64) -> String {
    let path_hash = hash(path.as_bytes());
    let secs = updated.max(0) / 1000;
    let timestamp = format!("{:0width$x}", secs, width = TIMESTAMP_LEN);

    let mut id = String::with_capacity(ID_LEN);
    id.push_str(&path_hash[..TIMESTAMP_INDEX]);
    id.push_str(&timestamp[..TIMESTAMP_LEN]);
    id.push_str(&"0".repeat(CHUNK_HASH_LEN));
    id
}

/// Fingerprint of an ordered chunk list: the hash of the concatenated hex
/// digests, truncated to the id suffix width. An empty list hashes the empty
/// string.
pub fn content_fingerprint(chunks: &[Digest]) -> String {
    let mut buf = String::with_capacity(chunks.len() * 64);
    for chunk in chunks {
        buf.push_str(&chunk.to_hex());
    }
    hash(buf.as_bytes())[..CHUNK_HASH_LEN].to_string()
}

/// Replaces the content suffix of `id` with the fingerprint of `chunks`.
/// The path and timestamp fields are left untouched.
pub fn finalize_id(id: &str, chunks: &[Digest]) -> String {
    let mut out = String::with_capacity(ID_LEN);
    out.push_str(id_prefix(id));
    out.push_str(&content_fingerprint(chunks));
    out
}

/// Path and timestamp fields of an id, the part shared by the provisional
/// and final forms.
pub fn id_prefix(id: &str) -> &str {
    &id[..CHUNK_HASH_INDEX.min(id.len())]
}

pub fn is_valid_id(id: &str) -> bool {
    id.len() == ID_LEN && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisional_id_layout() {
        let id = provisional_id("notes/foo.md", 1_700_000_000_123);
        assert!(is_valid_id(&id));
        assert_eq!(&id[..TIMESTAMP_INDEX], &hash(b"notes/foo.md")[..22]);
        assert_eq!(&id[TIMESTAMP_INDEX..CHUNK_HASH_INDEX], format!("{:010x}", 1_700_000_000u64));
        assert_eq!(&id[CHUNK_HASH_INDEX..], "00000000");
    }

    #[test]
    fn test_provisional_id_is_stable_and_second_granular() {
        let a = provisional_id("foo", 1_000_001);
        let b = provisional_id("foo", 1_000_999);
        assert_eq!(a, b);
        assert_eq!(a, provisional_id("foo", 1_000_001));
        assert_ne!(a, provisional_id("foo", 1_001_000));
        assert_ne!(a, provisional_id("bar", 1_000_001));
    }

    #[test]
    fn test_negative_timestamp_clamps_to_zero() {
        assert_eq!(provisional_id("foo", -5_000), provisional_id("foo", 0));
    }

    #[test]
    fn test_finalize_only_touches_suffix() {
        let provisional = provisional_id("foo", 42_000);
        let chunks = vec![Digest::from_data(b"a"), Digest::from_data(b"b")];
        let id = finalize_id(&provisional, &chunks);

        assert_eq!(id.len(), ID_LEN);
        assert_eq!(id_prefix(&id), id_prefix(&provisional));
        assert_ne!(&id[CHUNK_HASH_INDEX..], "00000000");
        assert_eq!(finalize_id(&id, &chunks), id);
    }

    #[test]
    fn test_chunk_order_changes_fingerprint() {
        let a = Digest::from_data(b"a");
        let b = Digest::from_data(b"b");
        assert_ne!(content_fingerprint(&[a, b]), content_fingerprint(&[b, a]));
    }

    #[test]
    fn test_empty_chunk_list_hashes_empty_input() {
        assert_eq!(content_fingerprint(&[]), hash(b"")[..8]);
        let id = finalize_id(&provisional_id("empty", 0), &[]);
        assert_eq!(&id[CHUNK_HASH_INDEX..], &hash(b"")[..8]);
    }
}
