// src/kv/facade.rs

//! The KV storage facade (C5): the single surface every personality
//! talks to, independent of which backend is behind it.

use crate::core::PpdbError;
use crate::kv::backend::KvBackend;
use crate::kv::item::{now_epoch_secs, resolve_expiry, Item};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Outcome of a `get`/`gets`.
pub enum GetResult {
    Found(Item),
    NotFound,
}

/// Outcome of a `cas` attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum CasOutcome {
    Stored,
    NotFound,
    Mismatch,
}

pub struct KvFacade {
    backend: Arc<dyn KvBackend>,
    /// Process-wide monotonic version counter; every successful
    /// mutation — including `append`/`prepend` — advances it by one.
    cas_counter: AtomicU64,
    pub max_value_size: usize,
}

impl KvFacade {
    pub fn new(backend: Arc<dyn KvBackend>, max_value_size: usize) -> Self {
        Self {
            backend,
            cas_counter: AtomicU64::new(0),
            max_value_size,
        }
    }

    fn next_cas(&self) -> u64 {
        self.cas_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn get(&self, key: &str) -> Result<GetResult, PpdbError> {
        match self.backend.get_row(key).await? {
            Some(item) if !item.is_expired_now() => Ok(GetResult::Found(item)),
            _ => Ok(GetResult::NotFound),
        }
    }

    pub async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        flags: u32,
        raw_expiry: i64,
    ) -> Result<(), PpdbError> {
        if value.len() > self.max_value_size {
            return Err(PpdbError::TooLarge);
        }
        let item = Item {
            value,
            flags,
            expiry_at: resolve_expiry(raw_expiry),
            cas: self.next_cas(),
        };
        self.backend.upsert_row(key, &item).await
    }

    /// `add`: fails with `Exists` when the key is present and unexpired.
    pub async fn add(
        &self,
        key: &str,
        value: Vec<u8>,
        flags: u32,
        raw_expiry: i64,
    ) -> Result<(), PpdbError> {
        if let Some(existing) = self.backend.get_row(key).await? {
            if !existing.is_expired_now() {
                return Err(PpdbError::Exists);
            }
        }
        self.set(key, value, flags, raw_expiry).await
    }

    /// `replace`: fails with `NotFound` when the key is absent or expired.
    pub async fn replace(
        &self,
        key: &str,
        value: Vec<u8>,
        flags: u32,
        raw_expiry: i64,
    ) -> Result<(), PpdbError> {
        match self.backend.get_row(key).await? {
            Some(existing) if !existing.is_expired_now() => {
                self.set(key, value, flags, raw_expiry).await
            }
            _ => Err(PpdbError::NotFound),
        }
    }

    /// `append`/`prepend`: require the key to exist, keep its flags and
    /// expiry untouched, and reject growth past `max_value_size`.
    async fn concat(&self, key: &str, addition: &[u8], prepend: bool) -> Result<(), PpdbError> {
        let existing = match self.backend.get_row(key).await? {
            Some(item) if !item.is_expired_now() => item,
            _ => return Err(PpdbError::NotFound),
        };
        if existing.value.len() + addition.len() > self.max_value_size {
            return Err(PpdbError::TooLarge);
        }
        let mut value = if prepend {
            addition.to_vec()
        } else {
            existing.value.clone()
        };
        if prepend {
            value.extend_from_slice(&existing.value);
        } else {
            value.extend_from_slice(addition);
        }
        let item = Item {
            value,
            flags: existing.flags,
            expiry_at: existing.expiry_at,
            cas: self.next_cas(),
        };
        self.backend.upsert_row(key, &item).await
    }

    pub async fn append(&self, key: &str, addition: &[u8]) -> Result<(), PpdbError> {
        self.concat(key, addition, false).await
    }

    pub async fn prepend(&self, key: &str, addition: &[u8]) -> Result<(), PpdbError> {
        self.concat(key, addition, true).await
    }

    /// `cas(key, value, ..., expected_cas)`: succeeds iff the current
    /// CAS of `key` equals `expected_cas`.
    pub async fn cas(
        &self,
        key: &str,
        value: Vec<u8>,
        flags: u32,
        raw_expiry: i64,
        expected_cas: u64,
    ) -> Result<CasOutcome, PpdbError> {
        if value.len() > self.max_value_size {
            return Err(PpdbError::TooLarge);
        }
        let existing = match self.backend.get_row(key).await? {
            Some(item) if !item.is_expired_now() => item,
            _ => return Ok(CasOutcome::NotFound),
        };
        if existing.cas != expected_cas {
            return Ok(CasOutcome::Mismatch);
        }
        let item = Item {
            value,
            flags,
            expiry_at: resolve_expiry(raw_expiry),
            cas: self.next_cas(),
        };
        self.backend.upsert_row(key, &item).await?;
        Ok(CasOutcome::Stored)
    }

    pub async fn delete(&self, key: &str) -> Result<bool, PpdbError> {
        self.backend.delete_row(key).await
    }

    /// `incr`/`decr` operate on the ASCII-decimal interpretation of the
    /// stored value. `incr` saturates (rather than wraps) on overflow and
    /// reports it as an error; `decr` saturates to zero.
    async fn add_delta(&self, key: &str, delta: u64, negative: bool) -> Result<u64, PpdbError> {
        let existing = match self.backend.get_row(key).await? {
            Some(item) if !item.is_expired_now() => item,
            _ => return Err(PpdbError::NotFound),
        };
        let current: u64 = std::str::from_utf8(&existing.value)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| PpdbError::InvalidData("value is not numeric".to_string()))?;

        let updated = if negative {
            current.saturating_sub(delta)
        } else {
            current.checked_add(delta).ok_or(PpdbError::Overflow)?
        };

        let item = Item {
            value: updated.to_string().into_bytes(),
            flags: existing.flags,
            expiry_at: existing.expiry_at,
            cas: self.next_cas(),
        };
        self.backend.upsert_row(key, &item).await?;
        Ok(updated)
    }

    pub async fn incr(&self, key: &str, delta: u64) -> Result<u64, PpdbError> {
        self.add_delta(key, delta, false).await
    }

    pub async fn decr(&self, key: &str, delta: u64) -> Result<u64, PpdbError> {
        self.add_delta(key, delta, true).await
    }

    pub async fn touch(&self, key: &str, raw_expiry: i64) -> Result<(), PpdbError> {
        let mut existing = match self.backend.get_row(key).await? {
            Some(item) if !item.is_expired_now() => item,
            _ => return Err(PpdbError::NotFound),
        };
        existing.expiry_at = resolve_expiry(raw_expiry);
        existing.cas = self.next_cas();
        self.backend.upsert_row(key, &existing).await
    }

    pub async fn flush_all(&self) -> Result<(), PpdbError> {
        self.backend.flush_all().await?;
        self.next_cas();
        Ok(())
    }

    pub async fn item_count(&self) -> Result<u64, PpdbError> {
        self.backend.count_rows().await
    }

    /// Issues the backend's optimization hint. Called once from the
    /// owning personality's shutdown path, after connections drain.
    pub async fn close(&self) -> Result<(), PpdbError> {
        self.backend.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryBackend {
        rows: Mutex<HashMap<String, Item>>,
    }

    #[async_trait]
    impl KvBackend for MemoryBackend {
        async fn get_row(&self, key: &str) -> Result<Option<Item>, PpdbError> {
            Ok(self.rows.lock().get(key).cloned())
        }
        async fn upsert_row(&self, key: &str, item: &Item) -> Result<(), PpdbError> {
            self.rows.lock().insert(key.to_string(), item.clone());
            Ok(())
        }
        async fn delete_row(&self, key: &str) -> Result<bool, PpdbError> {
            Ok(self.rows.lock().remove(key).is_some())
        }
        async fn flush_all(&self) -> Result<(), PpdbError> {
            self.rows.lock().clear();
            Ok(())
        }
        async fn count_rows(&self) -> Result<u64, PpdbError> {
            Ok(self.rows.lock().len() as u64)
        }
        async fn close(&self) -> Result<(), PpdbError> {
            Ok(())
        }
    }

    fn facade() -> KvFacade {
        KvFacade::new(Arc::new(MemoryBackend::default()), 1024)
    }

    #[tokio::test]
    async fn add_fails_when_key_present() {
        let facade = facade();
        facade.set("k", b"v1".to_vec(), 0, 0).await.unwrap();
        let err = facade.add("k", b"v2".to_vec(), 0, 0).await.unwrap_err();
        assert_eq!(err, PpdbError::Exists);
    }

    #[tokio::test]
    async fn replace_fails_when_key_absent() {
        let facade = facade();
        let err = facade
            .replace("missing", b"v".to_vec(), 0, 0)
            .await
            .unwrap_err();
        assert_eq!(err, PpdbError::NotFound);
    }

    #[tokio::test]
    async fn cas_matches_and_mismatches() {
        let facade = facade();
        facade.set("k", b"v1".to_vec(), 0, 0).await.unwrap();
        let GetResult::Found(item) = facade.get("k").await.unwrap() else {
            panic!("expected item");
        };
        let outcome = facade
            .cas("k", b"v2".to_vec(), 0, 0, item.cas + 1)
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Mismatch);
        let outcome = facade
            .cas("k", b"v2".to_vec(), 0, 0, item.cas)
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Stored);
    }

    #[tokio::test]
    async fn append_rejects_growth_past_cap() {
        let facade = KvFacade::new(Arc::new(MemoryBackend::default()), 4);
        facade.set("k", b"ab".to_vec(), 0, 0).await.unwrap();
        let err = facade.append("k", b"cdef").await.unwrap_err();
        assert_eq!(err, PpdbError::TooLarge);
    }

    #[tokio::test]
    async fn incr_saturates_on_overflow_decr_saturates_to_zero() {
        let facade = facade();
        facade
            .set("n", u64::MAX.to_string().into_bytes(), 0, 0)
            .await
            .unwrap();
        assert_eq!(facade.incr("n", 1).await.unwrap_err(), PpdbError::Overflow);

        facade.set("n", b"5".to_vec(), 0, 0).await.unwrap();
        let result = facade.decr("n", 10).await.unwrap();
        assert_eq!(result, 0);
    }

    #[tokio::test]
    async fn every_mutation_advances_cas_including_append() {
        let facade = facade();
        facade.set("k", b"a".to_vec(), 0, 0).await.unwrap();
        let GetResult::Found(before) = facade.get("k").await.unwrap() else {
            panic!()
        };
        facade.append("k", b"b").await.unwrap();
        let GetResult::Found(after) = facade.get("k").await.unwrap() else {
            panic!()
        };
        assert!(after.cas > before.cas);
    }

    #[tokio::test]
    async fn expired_items_read_as_not_found() {
        let facade = facade();
        facade.set("k", b"v".to_vec(), 0, now_epoch_secs() + 1000).await.unwrap();
        // Directly forge an already-past absolute expiry to avoid sleeping in tests.
        facade.touch("k", now_epoch_secs() - 5).await.unwrap();
        assert!(matches!(facade.get("k").await.unwrap(), GetResult::NotFound));
    }
}
