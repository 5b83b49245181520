use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Test data structure for benchmarks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchConversation {
    pub id: u64,
    pub title: String,
    pub author: String,
    pub likes: u32,
}

impl BenchConversation {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            title: format!("Conversation {}", id),
            author: format!("user{}", id % 97),
            likes: (id % 1000) as u32,
        }
    }
}

/// Simulated database with configurable latency
#[derive(Clone)]
pub struct FakeDatabase {
    data: Arc<HashMap<String, BenchConversation>>,
    latency_ms: u64,
    query_count: Arc<AtomicUsize>,
}

impl FakeDatabase {
    pub fn new(num_rows: usize, latency_ms: u64) -> Self {
        let mut data = HashMap::new();
        for i in 0..num_rows {
            data.insert(format!("conversation:{}", i), BenchConversation::new(i as u64));
        }

        Self {
            data: Arc::new(data),
            latency_ms,
            query_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn get(&self, key: &str) -> Option<BenchConversation> {
        self.query_count.fetch_add(1, Ordering::Relaxed);

        // Simulate database latency
        tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;

        self.data.get(key).cloned()
    }

    #[allow(dead_code)]
    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::Relaxed)
    }
}

/// Generate keys and caller identifiers for different workload patterns
pub struct KeyGenerator {
    num_keys: usize,
}

impl KeyGenerator {
    pub fn new(num_keys: usize) -> Self {
        Self { num_keys }
    }

    /// Generate sequential keys
    pub fn sequential(&self) -> Vec<String> {
        (0..self.num_keys)
            .map(|i| format!("conversation:{}", i))
            .collect()
    }

    /// Generate client addresses, 80% of requests from 20% of the clients
    pub fn client_ips(&self, count: usize) -> Vec<String> {
        let mut rng = rand::thread_rng();
        let hot = (self.num_keys / 5).max(1);

        (0..count)
            .map(|_| {
                let id = if rng.gen_bool(0.8) {
                    rng.gen_range(0..hot)
                } else {
                    rng.gen_range(0..self.num_keys.max(1))
                };
                format!("10.{}.{}.{}", (id >> 16) & 0xff, (id >> 8) & 0xff, id & 0xff)
            })
            .collect()
    }

    /// Generate keys for mixed workload (some hits, some misses)
    pub fn mixed(&self, hit_ratio: f64) -> Vec<String> {
        let mut rng = rand::thread_rng();
        let hot_key_count = ((self.num_keys as f64 * hit_ratio) as usize).max(1);

        (0..1000)
            .map(|_| {
                if rng.gen_bool(hit_ratio) || hot_key_count >= self.num_keys {
                    format!("conversation:{}", rng.gen_range(0..hot_key_count))
                } else {
                    format!(
                        "conversation:{}",
                        rng.gen_range(hot_key_count..self.num_keys)
                    )
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    async fn test_fake_database() {
        use super::FakeDatabase;

        let db = FakeDatabase::new(100, 1);

        let row = db.get("conversation:0").await;
        assert_eq!(row.map(|c| c.id), Some(0));
        assert_eq!(db.query_count(), 1);
    }

    #[test]
    fn test_key_generator() {
        use super::KeyGenerator;

        let key_gen = KeyGenerator::new(100);

        let seq = key_gen.sequential();
        assert_eq!(seq.len(), 100);
        assert_eq!(seq[0], "conversation:0");

        let ips = key_gen.client_ips(50);
        assert_eq!(ips.len(), 50);
        assert!(ips.iter().all(|ip| ip.starts_with("10.")));

        assert_eq!(key_gen.mixed(0.8).len(), 1000);
    }
}
