use std::{borrow::Cow, sync::Arc};

use cesu8_str::java as cesu8_java;

/// Decodes the modified UTF-8 used by `CONSTANT_Utf8` entries.
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<Cow<'_, str>> {
    let java_str = cesu8_java::JavaStr::from_java_cesu8(bytes).ok()?;
    Some(cesu8_java::from_java_cesu8(java_str))
}

pub fn decode_modified_utf8_arc(bytes: &[u8]) -> Option<Arc<str>> {
    decode_modified_utf8(bytes).map(Arc::from)
}

/// Encodes a Rust string as modified UTF-8, borrowing when no rewrite is needed
/// (no NUL and no supplementary characters).
pub fn encode_modified_utf8(s: &str) -> Cow<'_, [u8]> {
    match cesu8_java::from_utf8(s) {
        Cow::Borrowed(b) => Cow::Borrowed(b.as_bytes()),
        Cow::Owned(o) => Cow::Owned(o.into_bytes()),
    }
}
