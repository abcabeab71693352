use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out capture-side virtual ids. Ids are never reused within a session.
#[derive(Debug)]
pub struct HandleIdAllocator {
    next: AtomicU64,
}

impl HandleIdAllocator {
    pub fn new(first: u64) -> Self {
        // 0 is the null handle.
        Self {
            next: AtomicU64::new(first.max(1)),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The id the next allocation will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for HandleIdAllocator {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn ids_are_unique_across_threads() {
        let ids = Arc::new(HandleIdAllocator::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || (0..256).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1024);
        assert_eq!(all[0], 1);
    }
}
