//! BloomFront (C10): a probabilistic front-door in front of
//! `RevocationStore`, so the common case (token not revoked) never pays a
//! storage round trip. `bloomfilter::Bloom` is not internally synchronized,
//! so all mutation is serialized behind a single `parking_lot::RwLock`.

use crate::revocation_store::RevocationStore;
use bloomfilter::Bloom;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

pub struct BloomFront {
    filter: RwLock<Bloom<String>>,
    capacity: usize,
    fp_rate: f64,
    built_at: RwLock<Instant>,
}

impl BloomFront {
    pub fn new(capacity: usize, fp_rate: f64) -> Self {
        Self {
            filter: RwLock::new(Bloom::new_for_fp_rate(capacity.max(1), fp_rate)),
            capacity,
            fp_rate,
            built_at: RwLock::new(Instant::now()),
        }
    }

    /// `true` means "possibly revoked — ask the authoritative store".
    /// `false` means "definitely not revoked" and the store lookup can be
    /// skipped entirely; this is the fast path BloomFront exists for.
    pub fn maybe_revoked(&self, jti: &str) -> bool {
        self.filter.read().check(&jti.to_string())
    }

    /// Records a newly revoked jti immediately, so a revocation is visible
    /// to this front without waiting for the next full rebuild.
    pub fn record(&self, jti: &str) {
        self.filter.write().set(&jti.to_string());
    }

    /// Rebuilds the filter from scratch against the authoritative store.
    /// Run on `revocation.rebuild_interval_secs`, and fail-open: if the
    /// store call fails the stale filter keeps serving (it degrades to
    /// over-reporting "maybe revoked", never under-reporting).
    pub async fn rebuild(&self, store: &dyn RevocationStore) -> Result<(), crate::revocation_store::RevocationError> {
        let jtis = store.all_revoked_jtis().await?;
        let mut fresh = Bloom::new_for_fp_rate(self.capacity.max(jtis.len()).max(1), self.fp_rate);
        for jti in &jtis {
            fresh.set(jti);
        }
        *self.filter.write() = fresh;
        *self.built_at.write() = Instant::now();
        Ok(())
    }

    pub fn age(&self) -> std::time::Duration {
        self.built_at.read().elapsed()
    }
}

pub type SharedBloomFront = Arc<BloomFront>;
