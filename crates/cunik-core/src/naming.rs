//! Per-image instance counters.

use std::collections::HashMap;
use tokio::sync::Mutex;

/// Names derived for one new instance of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceNames {
    /// Per-image sequence number, starting at 1.
    pub sequence: u64,
    /// Instance name, `<image><n>`.
    pub name: String,
    /// Tap device name, `tap-<image>-<n>`.
    pub tap_device: String,
}

/// Monotonic per-image counters.
///
/// Counters start at zero, grow by one per [`next`](Self::next) call and are
/// never reset, so names handed out are unique for the life of the counter.
#[derive(Debug, Default)]
pub struct NameCounter {
    counters: Mutex<HashMap<String, u64>>,
}

impl NameCounter {
    /// Create an empty counter store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter for `image` and derive the instance names.
    pub async fn next(&self, image: &str) -> InstanceNames {
        let mut counters = self.counters.lock().await;
        let counter = counters.entry(image.to_string()).or_insert(0);
        *counter += 1;

        let sequence = *counter;
        InstanceNames {
            sequence,
            name: format!("{image}{sequence}"),
            tap_device: format!("tap-{image}-{sequence}"),
        }
    }

    /// Current counter value for `image` (0 if never used).
    pub async fn current(&self, image: &str) -> u64 {
        self.counters
            .lock()
            .await
            .get(image)
            .copied()
            .unwrap_or(0)
    }
}
