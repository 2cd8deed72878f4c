//! Fast negative check for username availability.

use std::sync::Arc;

use crate::bloom::{BloomConfig, BloomFilterStore};

/// `probably_taken == false` means the name is definitely free and the
/// authoritative lookup can be skipped; `true` still needs that lookup.
#[derive(Debug, Clone)]
pub struct UsernameHints {
    blooms: Arc<BloomFilterStore>,
    key: String,
}

impl UsernameHints {
    pub fn new(blooms: Arc<BloomFilterStore>) -> Self {
        Self {
            blooms,
            key: format!("{}:taken", BloomConfig::USERNAME),
        }
    }

    pub async fn probably_taken(&self, username: &str) -> bool {
        self.blooms.test(&self.key, &normalize(username)).await
    }

    pub async fn remember(&self, username: &str) {
        self.blooms.add(&self.key, &normalize(username)).await;
    }
}

fn normalize(username: &str) -> String {
    username.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ManualClock;
    use crate::infra::{KvStore, MemoryKvStore};

    #[tokio::test]
    async fn remembered_names_are_reported_taken() {
        let store = Arc::new(MemoryKvStore::new());
        let blooms = Arc::new(BloomFilterStore::new(
            store.clone() as Arc<dyn KvStore>,
            Arc::new(ManualClock::default()),
            BloomConfig::default(),
        ));
        let hints = UsernameHints::new(Arc::clone(&blooms));

        assert!(!hints.probably_taken("Alice").await);
        hints.remember("Alice").await;
        assert!(hints.probably_taken("alice ").await);

        let instance = blooms.instance("username:taken").expect("instance created");
        assert_eq!(instance.params.hashes, 10);

        // Fail-open: an outage reports every name as free.
        store.set_offline(true);
        assert!(!hints.probably_taken("alice").await);
    }
}
