//! Tunable parameters (spec §6). Names match the contract surface a hosting
//! daemon configures; there is no CLI owned by this crate.

use std::time::Duration;

/// Configuration for a DHT core instance, passed into [`crate::init`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of routing-table (GET/PUT) records tracked at once.
    pub table_size: usize,
    /// Target replica count for GET fanout.
    pub get_tries: u32,
    /// Target replica count for PUT storage.
    pub put_tries: u32,
    /// Maximum peers per k-bucket.
    pub bucket_size: usize,
    /// Period of the DISCOVERY/expiry maintenance sweep.
    pub maintain_interval: Duration,
    /// How long a peer may go without activity before it is evicted.
    pub peer_timeout: Duration,
    /// Absolute TTL applied to locally-cached PUT content.
    pub content_lifetime: Duration,
    /// Size in bytes of the per-message path bloom filter.
    pub bloom_size: usize,
    /// Number of hash functions used by the path bloom filter.
    pub bloom_k: u32,
    /// Maximum number of local DStore hits returned for a single GET before
    /// forwarding is skipped.
    pub max_results: usize,
    /// Maximum number of peers advertised in a single DISCOVERY message.
    pub adv_cap: usize,
}

impl Config {
    /// `PEER_TIMEOUT` is documented as roughly `4 * MAINTAIN_INTERVAL`; ping
    /// stale entries once they cross the midpoint, as spec §4.1 describes.
    #[must_use]
    pub fn ping_threshold(&self) -> Duration {
        self.peer_timeout / 2
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            table_size: 1024,
            get_tries: 7,
            put_tries: 3,
            bucket_size: 8,
            maintain_interval: Duration::from_secs(10),
            peer_timeout: Duration::from_secs(40),
            content_lifetime: Duration::from_secs(12 * 60 * 60),
            bloom_size: 4,
            bloom_k: 16,
            max_results: 64,
            adv_cap: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.table_size, 1024);
        assert_eq!(c.get_tries, 7);
        assert_eq!(c.put_tries, 3);
        assert_eq!(c.bucket_size, 8);
        assert_eq!(c.maintain_interval, Duration::from_secs(10));
        assert_eq!(c.peer_timeout, Duration::from_secs(40));
        assert_eq!(c.content_lifetime, Duration::from_secs(12 * 60 * 60));
        assert_eq!(c.bloom_size, 4);
        assert_eq!(c.bloom_k, 16);
        assert_eq!(c.max_results, 64);
        assert_eq!(c.adv_cap, 8);
    }

    #[test]
    fn ping_threshold_is_half_timeout() {
        let c = Config::default();
        assert_eq!(c.ping_threshold(), Duration::from_secs(20));
    }
}
