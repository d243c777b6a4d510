// SPDX-License-Identifier: Apache-2.0

//! Short-lived record of a successful sign-in

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult, ErrorCategory};
use crate::verifier;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalletKind {
    #[serde(rename = "rabby")]
    BrowserExtension,
    #[serde(rename = "ledger")]
    HardwareDevice,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAuthentication {
    pub address: String,
    pub signature: String,
    pub wallet_type: WalletKind,
    /// Issue time, milliseconds since the Unix epoch
    pub timestamp: i64,
    /// The message that was actually signed
    pub message: String,
}

/// On-disk shape before validation; any field may be missing
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    address: Option<String>,
    signature: Option<String>,
    wallet_type: Option<WalletKind>,
    timestamp: Option<i64>,
    message: Option<String>,
}

impl RawRecord {
    fn into_complete(self) -> Option<StoredAuthentication> {
        let non_empty = |s: Option<String>| s.filter(|s| !s.is_empty());
        Some(StoredAuthentication {
            address: non_empty(self.address)?,
            signature: non_empty(self.signature)?,
            wallet_type: self.wallet_type?,
            timestamp: self.timestamp?,
            message: self.message?,
        })
    }
}

/// Key-value persistence in the style of browser local storage
pub trait AuthStorage: Send + Sync {
    fn get(&self, key: &str) -> io::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
    /// Removing a missing key is not an error
    fn remove(&self, key: &str) -> io::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> io::Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "storage poisoned"))
    }
}

impl AuthStorage for MemoryStorage {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileStorage { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

impl AuthStorage for FileStorage {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(tmp, path)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        ManualClock {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now_ms(&self) -> i64 {
        (**self).now_ms()
    }
}

impl<S: AuthStorage + ?Sized> AuthStorage for std::sync::Arc<S> {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        (**self).remove(key)
    }
}

pub struct AuthStore<S, C = SystemClock> {
    storage: S,
    clock: C,
    key: String,
    lifetime: Duration,
}

impl<S: AuthStorage> AuthStore<S> {
    pub fn new(storage: S, key: impl Into<String>, lifetime: Duration) -> Self {
        AuthStore::with_clock(storage, SystemClock, key, lifetime)
    }
}

impl<S: AuthStorage, C: Clock> AuthStore<S, C> {
    pub fn with_clock(storage: S, clock: C, key: impl Into<String>, lifetime: Duration) -> Self {
        AuthStore {
            storage,
            clock,
            key: key.into(),
            lifetime,
        }
    }

    fn lifetime_ms(&self) -> i64 {
        i64::try_from(self.lifetime.as_millis()).unwrap_or(i64::MAX)
    }

    /// Verify `signature` over `message`, then record the sign-in
    pub fn persist(
        &self,
        address: &str,
        signature: &str,
        wallet_kind: WalletKind,
        message: &str,
    ) -> AuthResult<StoredAuthentication> {
        if !verifier::verify(message, signature, address) {
            warn!("refusing to store a signature that does not match {}", address);
            return Err(AuthError::new(
                ErrorCategory::InvalidSignature,
                "The signature does not match the address for the signed message. Sign in again.",
            ));
        }

        let record = StoredAuthentication {
            address: address.to_string(),
            signature: signature.to_string(),
            wallet_type: wallet_kind,
            timestamp: self.clock.now_ms(),
            message: message.to_string(),
        };
        let json = serde_json::to_string(&record).map_err(|e| {
            AuthError::new(ErrorCategory::Unknown, format!("cannot encode record: {}", e))
        })?;
        self.storage.set(&self.key, &json).map_err(|e| {
            AuthError::new(ErrorCategory::Unknown, format!("cannot store sign-in: {}", e))
        })?;

        info!("stored {:?} sign-in for {}", wallet_kind, address);
        Ok(record)
    }

    /// The current record, if complete and not expired. Stale records are deleted.
    pub fn read(&self) -> Option<StoredAuthentication> {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("cannot read stored sign-in: {}", e);
                return None;
            }
        };

        let record = serde_json::from_str::<RawRecord>(&raw)
            .ok()
            .and_then(RawRecord::into_complete);

        match record {
            Some(record) if self.clock.now_ms() < record.timestamp.saturating_add(self.lifetime_ms()) => {
                Some(record)
            }
            Some(_) => {
                debug!("stored sign-in expired, removing it");
                self.evict();
                None
            }
            None => {
                debug!("stored sign-in is incomplete, removing it");
                self.evict();
                None
            }
        }
    }

    /// Delete the record; succeeds when there is none
    pub fn clear(&self) -> AuthResult<()> {
        self.storage.remove(&self.key).map_err(|e| {
            AuthError::new(ErrorCategory::Unknown, format!("cannot clear sign-in: {}", e))
        })
    }

    pub fn expires_at(&self, record: &StoredAuthentication) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(record.timestamp.saturating_add(self.lifetime_ms()))
            .single()
    }

    fn evict(&self) {
        if let Err(e) = self.storage.remove(&self.key) {
            warn!("cannot remove stale sign-in: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::LocalKeyWallet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[derive(Default)]
    struct CountingStorage {
        inner: MemoryStorage,
        removals: AtomicUsize,
    }

    impl AuthStorage for CountingStorage {
        fn get(&self, key: &str) -> io::Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> io::Result<()> {
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> io::Result<()> {
            self.removals.fetch_add(1, Ordering::SeqCst);
            self.inner.remove(key)
        }
    }

    fn store() -> (Arc<CountingStorage>, Arc<ManualClock>, AuthStore<Arc<CountingStorage>, Arc<ManualClock>>) {
        let storage = Arc::new(CountingStorage::default());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = AuthStore::with_clock(storage.clone(), clock.clone(), "auth", DAY);
        (storage, clock, store)
    }

    #[test]
    fn persist_then_read() {
        let (_, _, store) = store();
        let wallet = LocalKeyWallet::from_bytes(&[0x21; 32]).unwrap();
        let signature = wallet.sign_personal("hello").unwrap();

        let stored = store
            .persist(&wallet.address(), &signature, WalletKind::HardwareDevice, "hello")
            .unwrap();
        assert_eq!(store.read(), Some(stored.clone()));
        assert_eq!(
            store.expires_at(&stored).unwrap().timestamp_millis(),
            1_700_000_000_000 + 86_400_000
        );
    }

    #[test]
    fn persist_rejects_bad_signature() {
        let (storage, _, store) = store();
        let wallet = LocalKeyWallet::from_bytes(&[0x21; 32]).unwrap();
        let signature = wallet.sign_personal("hello").unwrap();

        let err = store
            .persist(&wallet.address(), &signature, WalletKind::BrowserExtension, "hello!")
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::InvalidSignature);
        assert_eq!(storage.get("auth").unwrap(), None);
    }

    #[test]
    fn expired_record_is_deleted_once() {
        let (storage, clock, store) = store();
        let wallet = LocalKeyWallet::from_bytes(&[0x21; 32]).unwrap();
        let signature = wallet.sign_personal("hello").unwrap();
        store
            .persist(&wallet.address(), &signature, WalletKind::HardwareDevice, "hello")
            .unwrap();

        clock.advance(DAY - Duration::from_millis(1));
        assert!(store.read().is_some());

        clock.advance(Duration::from_millis(1));
        assert_eq!(store.read(), None);
        assert_eq!(storage.removals.load(Ordering::SeqCst), 1);
        assert_eq!(storage.get("auth").unwrap(), None);

        assert_eq!(store.read(), None);
        assert_eq!(storage.removals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn incomplete_records_are_treated_as_absent() {
        let (storage, _, store) = store();
        for raw in [
            r#"{"address":"0xabc","walletType":"ledger","timestamp":1700000000000,"message":"m"}"#,
            r#"{"address":"","signature":"0x1","walletType":"rabby","timestamp":1,"message":"m"}"#,
            "not json",
        ] {
            storage.set("auth", raw).unwrap();
            assert_eq!(store.read(), None);
            assert_eq!(storage.get("auth").unwrap(), None);
        }
    }

    #[test]
    fn record_layout() {
        let record = StoredAuthentication {
            address: "0xabc".to_string(),
            signature: "0xsig".to_string(),
            wallet_type: WalletKind::BrowserExtension,
            timestamp: 42,
            message: "m".to_string(),
        };
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["walletType"], "rabby");
        assert_eq!(json["timestamp"], 42);
        assert_eq!(json["message"], "m");
    }

    #[test]
    fn clear_is_idempotent() {
        let (_, _, store) = store();
        store.clear().unwrap();
        store.clear().unwrap();
    }

    #[test]
    fn file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        assert_eq!(storage.get("pay-peer-roll-auth").unwrap(), None);
        storage.set("pay-peer-roll-auth", "{}").unwrap();
        assert_eq!(
            storage.get("pay-peer-roll-auth").unwrap().as_deref(),
            Some("{}")
        );
        storage.remove("pay-peer-roll-auth").unwrap();
        storage.remove("pay-peer-roll-auth").unwrap();
        assert_eq!(storage.get("pay-peer-roll-auth").unwrap(), None);
    }
}
