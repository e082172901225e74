use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct Metrics {
    pub requests_total: Arc<AtomicU64>,
    pub requests_failed: Arc<AtomicU64>,
    pub envelopes_encrypted: Arc<AtomicU64>,
    pub envelopes_decrypted: Arc<AtomicU64>,
    pub decryption_failures: Arc<AtomicU64>,
    pub tokens_issued: Arc<AtomicU64>,
    pub tokens_verified: Arc<AtomicU64>,
    pub tokens_rejected: Arc<AtomicU64>,
    pub tokens_revoked: Arc<AtomicU64>,
    pub start_time: DateTime<Utc>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            requests_failed: Arc::new(AtomicU64::new(0)),
            envelopes_encrypted: Arc::new(AtomicU64::new(0)),
            envelopes_decrypted: Arc::new(AtomicU64::new(0)),
            decryption_failures: Arc::new(AtomicU64::new(0)),
            tokens_issued: Arc::new(AtomicU64::new(0)),
            tokens_verified: Arc::new(AtomicU64::new(0)),
            tokens_rejected: Arc::new(AtomicU64::new(0)),
            tokens_revoked: Arc::new(AtomicU64::new(0)),
            start_time: Utc::now(),
        }
    }

    pub fn increment_requests(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_encrypted(&self) {
        self.envelopes_encrypted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_decrypted(&self) {
        self.envelopes_decrypted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_decryption_failed(&self) {
        self.decryption_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_issued(&self, count: u64) {
        self.tokens_issued.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_verified(&self) {
        self.tokens_verified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rejected(&self) {
        self.tokens_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_revoked(&self) {
        self.tokens_revoked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> MetricsSnapshot {
        let uptime = Utc::now().signed_duration_since(self.start_time);

        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            envelopes_encrypted: self.envelopes_encrypted.load(Ordering::Relaxed),
            envelopes_decrypted: self.envelopes_decrypted.load(Ordering::Relaxed),
            decryption_failures: self.decryption_failures.load(Ordering::Relaxed),
            tokens_issued: self.tokens_issued.load(Ordering::Relaxed),
            tokens_verified: self.tokens_verified.load(Ordering::Relaxed),
            tokens_rejected: self.tokens_rejected.load(Ordering::Relaxed),
            tokens_revoked: self.tokens_revoked.load(Ordering::Relaxed),
            uptime_seconds: uptime.num_seconds(),
            start_time: self.start_time,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub envelopes_encrypted: u64,
    pub envelopes_decrypted: u64,
    pub decryption_failures: u64,
    pub tokens_issued: u64,
    pub tokens_verified: u64,
    pub tokens_rejected: u64,
    pub tokens_revoked: u64,
    pub uptime_seconds: i64,
    pub start_time: DateTime<Utc>,
}
