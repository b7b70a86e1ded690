/// Computes the 32-bit content hash used throughout the archive.
///
/// This is the classic djb2 multiply-by-33 hash, applied to the string's
/// UTF-8 bytes with wrapping arithmetic. Archives are self-contained, so
/// the only requirement is that the function is deterministic and stable
/// across runs and platforms.
///
/// # Arguments
///
/// * `s` - The string to hash
///
/// # Returns
///
/// A 32-bit hash value. The empty string hashes to the seed (5381).
pub fn content_hash(s: &str) -> u32 {
    let mut hash: u32 = 5381;
    for &byte in s.as_bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(u32::from(byte));
    }
    hash
}

/// Derives a deterministic item identity for items whose feed supplied no id.
///
/// The result is `"hash:"` followed by the decimal content hash of title,
/// description and content concatenated in that order. Callers that assign
/// such an id should also set the item's `id_is_hash` flag so later
/// re-fetches can recognize the article even if the source starts supplying
/// a literal id.
pub fn derived_id(title: &str, description: &str, content: &str) -> String {
    let mut buf = String::with_capacity(title.len() + description.len() + content.len());
    buf.push_str(title);
    buf.push_str(description);
    buf.push_str(content);
    format!("hash:{}", content_hash(&buf))
}

// ============================================================================
// Tests
// ============================================================================
