//! Bounded header container: a reserved inline `Vec` for the common case, a
//! plain overflow `Vec` for the rare one.
//!
//! Reserving the inline vec's capacity up front (`INLINE_CAPACITY` entries)
//! keeps the common case — a handful of headers per request — free of
//! reallocation for the lifetime of the pooled [`Request`](super::request::Request),
//! while still accepting pathological requests via the overflow vec instead
//! of rejecting them outright. Overflow stays a `Vec` rather than a map so
//! duplicate header names and their original casing both survive.

use crate::errors::ErrorKind;

/// Inline entry capacity. Requests with more distinct header lines than
/// this spill the remainder into [`HeaderContainer`]'s overflow map.
pub const INLINE_CAPACITY: usize = 32;
/// Maximum header name length, inline or overflow.
pub const MAX_NAME_LEN: usize = 64;
/// Maximum value length for an entry stored inline.
pub const MAX_INLINE_VALUE_LEN: usize = 128;
/// Maximum value length for an entry that has spilled to overflow.
pub const MAX_OVERFLOW_VALUE_LEN: usize = 8192;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub(crate) struct Header {
    pub(crate) name: &'static [u8],
    pub(crate) value: &'static [u8],
}

impl Header {
    #[inline(always)]
    pub const fn new(name: &'static [u8], value: &'static [u8]) -> Self {
        Header { name, value }
    }
}

#[inline(always)]
fn reject_crlf(b: &[u8]) -> Result<(), ErrorKind> {
    if memchr::memchr2(b'\r', b'\n', b).is_some() {
        return Err(ErrorKind::InvalidHeader);
    }
    Ok(())
}

/// Bounded sequence of header (name, value) pairs with case-insensitive
/// lookup, backed by fixed inline storage plus an overflow spill vec.
///
/// Names are stored byte-for-byte as received; comparisons normalize case,
/// storage never does. Duplicates are preserved in insertion order in both
/// the inline entries and the overflow entries; [`HeaderContainer::add`]
/// never deduplicates.
#[derive(Debug, Clone, Default)]
pub(crate) struct HeaderContainer {
    inline: Vec<Header>,
    overflow: Vec<Header>,
    pub(crate) content_length: Option<usize>,
}

impl HeaderContainer {
    #[inline(always)]
    pub(crate) fn new() -> Self {
        Self {
            inline: Vec::with_capacity(INLINE_CAPACITY),
            overflow: Vec::new(),
            content_length: None,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.inline.clear();
        self.overflow.clear();
        self.content_length = None;
    }

    /// Appends a header without deduplication. Spills to overflow when the
    /// inline table is full or the value exceeds the inline cap.
    pub(crate) fn add(&mut self, name: &'static [u8], value: &'static [u8]) -> Result<(), ErrorKind> {
        if name.len() > MAX_NAME_LEN || value.len() > MAX_OVERFLOW_VALUE_LEN {
            return Err(ErrorKind::HeaderTooLarge);
        }
        reject_crlf(name)?;
        reject_crlf(value)?;

        if self.inline.len() < INLINE_CAPACITY && value.len() <= MAX_INLINE_VALUE_LEN {
            self.inline.push(Header::new(name, value));
        } else {
            self.overflow.push(Header::new(name, value));
        }
        Ok(())
    }

    /// Replaces the first case-insensitive match, or appends if none exists.
    #[allow(dead_code)]
    pub(crate) fn set(&mut self, name: &'static [u8], value: &'static [u8]) -> Result<(), ErrorKind> {
        reject_crlf(name)?;
        reject_crlf(value)?;

        if let Some(pos) = self.inline.iter().position(|h| h.name.eq_ignore_ascii_case(name)) {
            if value.len() <= MAX_INLINE_VALUE_LEN {
                self.inline[pos] = Header::new(name, value);
                return Ok(());
            }
            self.inline.remove(pos);
        } else if let Some(pos) = self.overflow.iter().position(|h| h.name.eq_ignore_ascii_case(name)) {
            self.overflow.remove(pos);
        }
        self.add(name, value)
    }

    /// First matching value, inline entries searched before overflow.
    pub(crate) fn get(&self, name: &[u8]) -> Option<&[u8]> {
        if let Some(h) = self.inline.iter().find(|h| h.name.eq_ignore_ascii_case(name)) {
            return Some(h.value);
        }
        self.overflow.iter().find(|h| h.name.eq_ignore_ascii_case(name)).map(|h| h.value)
    }

    #[allow(dead_code)]
    pub(crate) fn has(&self, name: &[u8]) -> bool {
        self.get(name).is_some()
    }

    /// Removes the first case-insensitive match from both inline and overflow.
    #[allow(dead_code)]
    pub(crate) fn del(&mut self, name: &[u8]) {
        if let Some(pos) = self.inline.iter().position(|h| h.name.eq_ignore_ascii_case(name)) {
            self.inline.remove(pos);
        }
        if let Some(pos) = self.overflow.iter().position(|h| h.name.eq_ignore_ascii_case(name)) {
            self.overflow.remove(pos);
        }
    }

    /// Visits every inline entry in insertion order, then every overflow
    /// entry in insertion order. Stops early if `visitor` returns `false`.
    pub(crate) fn visit_all<'a>(&'a self, mut visitor: impl FnMut(&'a [u8], &'a [u8]) -> bool) {
        for h in &self.inline {
            if !visitor(h.name, h.value) {
                return;
            }
        }
        for h in &self.overflow {
            if !visitor(h.name, h.value) {
                return;
            }
        }
    }

    #[allow(dead_code)]
    pub(crate) fn len(&self) -> usize {
        self.inline.len() + self.overflow.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inline.is_empty() && self.overflow.is_empty()
    }
}

impl PartialEq for HeaderContainer {
    fn eq(&self, other: &Self) -> bool {
        self.inline == other.inline && self.content_length == other.content_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_get_is_case_insensitive() {
        let mut h = HeaderContainer::new();
        h.add(b"Content-Type", b"text/plain").unwrap();
        assert_eq!(h.get(b"content-type"), Some(b"text/plain".as_ref()));
        assert_eq!(h.get(b"CONTENT-TYPE"), Some(b"text/plain".as_ref()));
    }

    #[test]
    fn set_then_get_returns_latest() {
        let mut h = HeaderContainer::new();
        h.add(b"X", b"a").unwrap();
        h.set(b"X", b"b").unwrap();
        assert_eq!(h.get(b"x"), Some(b"b".as_ref()));
    }

    #[test]
    fn del_then_has_is_false() {
        let mut h = HeaderContainer::new();
        h.add(b"X", b"a").unwrap();
        h.del(b"x");
        assert!(!h.has(b"X"));
    }

    #[test]
    fn reset_clears_everything() {
        let mut h = HeaderContainer::new();
        h.add(b"X", b"a").unwrap();
        h.content_length = Some(4);
        h.reset();
        assert_eq!(h.len(), 0);
        assert_eq!(h.content_length, None);
    }

    #[test]
    fn crlf_injection_is_rejected() {
        let mut h = HeaderContainer::new();
        assert_eq!(h.set(b"X", b"a\r\nY: b"), Err(ErrorKind::InvalidHeader));
        assert!(h.is_empty());
    }

    #[test]
    fn overflow_spills_past_inline_capacity() {
        let mut h = HeaderContainer::new();
        for i in 0..INLINE_CAPACITY {
            let name: &'static [u8] = Box::leak(format!("h{i}").into_bytes().into_boxed_slice());
            h.add(name, b"v").unwrap();
        }
        h.add(b"overflow-header", b"v").unwrap();
        assert_eq!(h.get(b"overflow-header"), Some(b"v".as_ref()));
        assert_eq!(h.len(), INLINE_CAPACITY + 1);
    }

    #[test]
    fn large_value_spills_to_overflow_even_with_inline_room() {
        let mut h = HeaderContainer::new();
        let big: &'static [u8] = Box::leak(vec![b'v'; MAX_INLINE_VALUE_LEN + 1].into_boxed_slice());
        h.add(b"big", big).unwrap();
        assert_eq!(h.get(b"big"), Some(big));
    }

    #[test]
    fn oversized_name_is_too_large() {
        let mut h = HeaderContainer::new();
        let name: &'static [u8] = Box::leak(vec![b'n'; MAX_NAME_LEN + 1].into_boxed_slice());
        assert_eq!(h.add(name, b"v"), Err(ErrorKind::HeaderTooLarge));
    }

    #[test]
    fn overflow_preserves_duplicates_and_casing() {
        let mut h = HeaderContainer::new();
        let big: &'static [u8] = Box::leak(vec![b'v'; MAX_INLINE_VALUE_LEN + 1].into_boxed_slice());
        h.add(b"X-Dup", big).unwrap();
        h.add(b"X-DUP", big).unwrap();

        let mut seen = Vec::new();
        h.visit_all(|name, _| {
            seen.push(name);
            true
        });
        assert_eq!(seen, vec![b"X-Dup".as_ref(), b"X-DUP".as_ref()]);
    }
}
