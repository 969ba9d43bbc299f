use std::sync::atomic::{AtomicUsize, Ordering};

/// Diagnostic counters shared by every attach server a host process starts.
/// Passed in at construction; the server itself keeps no global state.
#[derive(Debug, Default)]
pub struct SessionStats {
    live: AtomicUsize,
    served: AtomicUsize,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn peer_connected(&self) {
        self.live.fetch_add(1, Ordering::SeqCst);
        self.served.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn peer_released(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    /// Peers connected right now.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Peers accepted over the process lifetime.
    pub fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}
