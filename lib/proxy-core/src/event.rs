//! Typed watch notifications

/// One notification for a watched resource kind.
///
/// Handlers match on this instead of inspecting untyped payloads.
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent<K> {
    Added(K),
    Updated { old: K, new: K },
    Deleted(K),
}

impl<K> WatchEvent<K> {
    /// The (previous, current) snapshot pair this notification represents
    pub fn snapshots(&self) -> (Option<&K>, Option<&K>) {
        match self {
            WatchEvent::Added(obj) => (None, Some(obj)),
            WatchEvent::Updated { old, new } => (Some(old), Some(new)),
            WatchEvent::Deleted(obj) => (Some(obj), None),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "added",
            WatchEvent::Updated { .. } => "updated",
            WatchEvent::Deleted(_) => "deleted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshots() {
        assert_eq!(WatchEvent::Added(1).snapshots(), (None, Some(&1)));
        assert_eq!(
            WatchEvent::Updated { old: 1, new: 2 }.snapshots(),
            (Some(&1), Some(&2))
        );
        assert_eq!(WatchEvent::Deleted(1).snapshots(), (Some(&1), None));
    }
}
