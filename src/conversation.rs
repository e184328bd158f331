// gateway/src/conversation.rs

use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};

const PREFIX: &str = "conv_";

/// Allocates or echoes conversation ids. Ids are correlation tokens only;
/// no history is kept for them.
#[derive(Debug, Default)]
pub struct ConversationAllocator {
    seq: AtomicU32,
}

impl ConversationAllocator {
    pub fn new() -> Self { Self::default() }

    /// Returns `supplied` unchanged when it is non-empty, otherwise a fresh id.
    pub fn ensure(&self, supplied: Option<&str>) -> String {
        match supplied {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self.allocate(),
        }
    }

    /// `conv_<unix millis>_<seq hex><random hex>`
    pub fn allocate(&self) -> String {
        let millis = Utc::now().timestamp_millis();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) & 0xffff;
        let random = uuid::Uuid::new_v4().simple().to_string();
        format!("{PREFIX}{millis}_{seq:04x}{}", &random[..8])
    }

    pub fn is_allocated(id: &str) -> bool {
        let Some(rest) = id.strip_prefix(PREFIX) else { return false };
        let Some((millis, tail)) = rest.split_once('_') else { return false };
        !millis.is_empty()
            && millis.bytes().all(|b| b.is_ascii_digit())
            && tail.len() == 12
            && tail.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn supplied_id_is_echoed() {
        let alloc = ConversationAllocator::new();
        assert_eq!(alloc.ensure(Some("conv_existing")), "conv_existing");
        assert_eq!(alloc.ensure(Some("anything at all")), "anything at all");
    }

    #[test]
    fn missing_or_empty_id_allocates() {
        let alloc = ConversationAllocator::new();
        assert!(ConversationAllocator::is_allocated(&alloc.ensure(None)));
        assert!(ConversationAllocator::is_allocated(&alloc.ensure(Some(""))));
    }

    #[test]
    fn allocations_do_not_collide() {
        let alloc = ConversationAllocator::new();
        let ids: HashSet<_> = (0..10_000).map(|_| alloc.allocate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn format_check_rejects_foreign_ids() {
        assert!(!ConversationAllocator::is_allocated("conv_"));
        assert!(!ConversationAllocator::is_allocated("conv_123_xyz"));
        assert!(!ConversationAllocator::is_allocated("session_123_0000deadbeef"));
        assert!(ConversationAllocator::is_allocated("conv_1700000000000_0000deadbeef"));
    }
}
