use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

// Global counters (low overhead). These are coarse-grained and process-wide.
static PUBLISHED: AtomicU64 = AtomicU64::new(0);
static DELIVERED: AtomicU64 = AtomicU64::new(0);
static REDELIVERED: AtomicU64 = AtomicU64::new(0);
static REJECTED: AtomicU64 = AtomicU64::new(0);
static EXPIRED: AtomicU64 = AtomicU64::new(0);
static RECOVERED: AtomicU64 = AtomicU64::new(0);
static PERSISTENCE_FAILURES: AtomicU64 = AtomicU64::new(0);

// Set once recovery has finished and the listener is bound.
static READY: AtomicBool = AtomicBool::new(false);

#[inline]
pub fn set_ready(v: bool) {
    READY.store(v, Ordering::Relaxed);
}

#[inline]
pub fn is_ready() -> bool {
    READY.load(Ordering::Relaxed)
}

#[inline]
pub fn inc_published(n: u64) {
    PUBLISHED.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_delivered(n: u64) {
    DELIVERED.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_redelivered(n: u64) {
    REDELIVERED.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_rejected(n: u64) {
    REJECTED.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_expired(n: u64) {
    EXPIRED.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_recovered(n: u64) {
    RECOVERED.fetch_add(n, Ordering::Relaxed);
}
#[inline]
pub fn inc_persistence_failures(n: u64) {
    PERSISTENCE_FAILURES.fetch_add(n, Ordering::Relaxed);
}

pub fn persistence_failures_total() -> u64 {
    PERSISTENCE_FAILURES.load(Ordering::Relaxed)
}

pub fn snapshot() -> String {
    // Simple text format (Prometheus-style without HELP/TYPE lines for brevity)
    format!(
        "relaymq_ready {}\nrelaymq_published {}\nrelaymq_delivered {}\nrelaymq_redelivered {}\nrelaymq_rejected {}\nrelaymq_expired {}\nrelaymq_recovered {}\nrelaymq_persistence_failures {}\n",
        is_ready() as u8,
        PUBLISHED.load(Ordering::Relaxed),
        DELIVERED.load(Ordering::Relaxed),
        REDELIVERED.load(Ordering::Relaxed),
        REJECTED.load(Ordering::Relaxed),
        EXPIRED.load(Ordering::Relaxed),
        RECOVERED.load(Ordering::Relaxed),
        PERSISTENCE_FAILURES.load(Ordering::Relaxed),
    )
}
