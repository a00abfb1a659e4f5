use crate::config::MAX_TAG_LENGTH;
use core::fmt;

/// Short caller-supplied label of an allocation, stored inline.
///
/// Longer labels are cut at the last character boundary that fits.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct AllocationTag {
    len: u8,
    bytes: [u8; MAX_TAG_LENGTH],
}

impl AllocationTag {
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(label: &str) -> Self {
        let mut len = label.len().min(MAX_TAG_LENGTH);
        while !label.is_char_boundary(len) {
            len -= 1;
        }
        let mut bytes = [0; MAX_TAG_LENGTH];
        bytes[..len].copy_from_slice(&label.as_bytes()[..len]);
        Self {
            len: len as u8,
            bytes,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..usize::from(self.len)]).unwrap_or_default()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for AllocationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for AllocationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_tags_are_kept() {
        assert_eq!(AllocationTag::new("vfs").as_str(), "vfs");
        assert!(AllocationTag::default().is_empty());
    }

    #[test]
    fn long_tags_are_truncated() {
        let long = "a".repeat(40);
        assert_eq!(AllocationTag::new(&long).as_str().len(), MAX_TAG_LENGTH);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 30 ASCII bytes followed by a two-byte character
        let label = format!("{}é", "x".repeat(30));
        let tag = AllocationTag::new(&label);
        assert_eq!(tag.as_str(), "x".repeat(30));
    }
}
