//! The ordered-KV key families (spec §4.7). `<gp20>`/`<pos20>` are
//! zero-padded 20-digit decimal encodings so lexicographic byte order equals
//! numeric order — the same trick the teacher's `IdGenerator`/
//! `GlobalEventLog` get for free from big-endian `u64` keys, generalized
//! here to a human-legible ASCII encoding so multiple key families can share
//! one `sled::Tree` namespace without binary collisions between prefixes.

const PAD: usize = 20;

pub fn pad(n: i64) -> String {
    format!("{n:0>width$}", width = PAD)
}

/// `M:<gp20>` → encoded message.
pub fn message_key(global_position: i64) -> Vec<u8> {
    format!("M:{}", pad(global_position)).into_bytes()
}

/// `SI:<stream>:<pos20>` → `<gp20>`.
pub fn stream_index_key(stream_name: &str, position: i64) -> Vec<u8> {
    format!("SI:{stream_name}:{}", pad(position)).into_bytes()
}

/// Range-scan prefix for every `SI:<stream>:*` entry.
pub fn stream_index_prefix(stream_name: &str) -> Vec<u8> {
    format!("SI:{stream_name}:").into_bytes()
}

/// `CI:<category>:<gp20>` → `<stream>`.
pub fn category_index_key(category: &str, global_position: i64) -> Vec<u8> {
    format!("CI:{category}:{}", pad(global_position)).into_bytes()
}

/// Range-scan prefix for every `CI:<category>:*` entry.
pub fn category_index_prefix(category: &str) -> Vec<u8> {
    format!("CI:{category}:").into_bytes()
}

/// `VI:<stream>` → `<pos20>`.
pub fn version_index_key(stream_name: &str) -> Vec<u8> {
    format!("VI:{stream_name}").into_bytes()
}

/// Range-scan prefix for every `VI:*` entry, used by `list_streams`.
pub const VERSION_INDEX_PREFIX: &[u8] = b"VI:";

pub fn version_index_stream_name(key: &[u8]) -> String {
    String::from_utf8_lossy(&key[VERSION_INDEX_PREFIX.len()..]).into_owned()
}

/// `GP` → `<next_gp20>`.
pub const GLOBAL_COUNTER_KEY: &[u8] = b"GP";

/// `CC:<category>` → encoded `(stream_count, message_count)`, the
/// auxiliary counter spec §4.7 recommends for `list_categories`.
pub fn category_count_key(category: &str) -> Vec<u8> {
    format!("CC:{category}").into_bytes()
}

pub const CATEGORY_COUNT_PREFIX: &[u8] = b"CC:";

pub fn category_count_category_name(key: &[u8]) -> String {
    String::from_utf8_lossy(&key[CATEGORY_COUNT_PREFIX.len()..]).into_owned()
}

pub fn decode_i64(bytes: &[u8]) -> i64 {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

pub fn encode_i64(n: i64) -> Vec<u8> {
    pad(n).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_encoding_preserves_numeric_order() {
        let mut keys: Vec<Vec<u8>> = vec![
            message_key(2),
            message_key(10),
            message_key(1),
            message_key(100),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                message_key(1),
                message_key(2),
                message_key(10),
                message_key(100),
            ]
        );
    }

    #[test]
    fn stream_index_prefix_matches_its_own_keys() {
        let key = stream_index_key("acct-1", 5);
        assert!(key.starts_with(&stream_index_prefix("acct-1")));
        assert!(!key.starts_with(&stream_index_prefix("acct-2")));
    }

    #[test]
    fn roundtrips_through_encode_decode() {
        assert_eq!(decode_i64(&encode_i64(42)), 42);
        assert_eq!(decode_i64(&encode_i64(0)), 0);
    }

    #[test]
    fn version_index_stream_name_strips_prefix() {
        let key = version_index_key("acct-1");
        assert_eq!(version_index_stream_name(&key), "acct-1");
    }
}
