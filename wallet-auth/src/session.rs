// SPDX-License-Identifier: Apache-2.0

//! Device discovery and the single active hardware session.
//!
//! A [`SessionManager`] owns at most one [`DeviceSession`]. Connecting while a
//! session is live hands back that same session; disconnecting always empties
//! the slot, even when the device has already gone away.

use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use ledger_transport::Exchange;
use ledger_transport_hid::hidapi::HidApi;
use ledger_transport_hid::{LedgerDeviceInfo, TransportNativeHID};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::classifier::{classify, DeviceFault};
use crate::config::AuthConfig;
use crate::engine::describe;
use crate::error::{AuthError, AuthResult, ErrorCategory};
use crate::signer::LedgerSigner;

/// A device found by discovery, not yet opened
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Opaque handle used to open the device (the HID path for USB devices)
    pub id: String,
    /// Human-readable model name
    pub name: String,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Finds devices and opens transports to them
#[async_trait]
pub trait Discovery: Send + Sync {
    type Transport: Exchange + Send + Sync + 'static;

    /// Devices currently attached, in discovery order
    async fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceFault>;

    async fn open(&self, device: &DeviceDescriptor) -> Result<Self::Transport, DeviceFault>;
}

/// An open connection to one device
pub struct DeviceSession<E> {
    session_id: String,
    device: DeviceDescriptor,
    transport: Arc<E>,
    connected: Arc<AtomicBool>,
}

impl<E> Clone for DeviceSession<E> {
    fn clone(&self) -> Self {
        DeviceSession {
            session_id: self.session_id.clone(),
            device: self.device.clone(),
            transport: self.transport.clone(),
            connected: self.connected.clone(),
        }
    }
}

impl<E> fmt::Debug for DeviceSession<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("session_id", &self.session_id)
            .field("device", &self.device)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl<E> DeviceSession<E> {
    fn new(device: DeviceDescriptor, transport: E) -> Self {
        DeviceSession {
            session_id: Uuid::new_v4().to_string(),
            device,
            transport: Arc::new(transport),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn transport(&self) -> &Arc<E> {
        &self.transport
    }
}

impl<E> DeviceSession<E>
where
    E: Exchange + Send + Sync + 'static,
    E::Error: StdError + Send + Sync + 'static,
{
    /// A signer bound to this session. It stops working once the session is disconnected.
    pub fn signer(&self, probe_interval: Duration) -> LedgerSigner<E> {
        LedgerSigner::new(
            self.session_id.clone(),
            self.transport.clone(),
            self.connected.clone(),
            probe_interval,
        )
    }
}

/// Owner of the one active hardware session
pub struct SessionManager<D: Discovery> {
    discovery: D,
    active: Mutex<Option<DeviceSession<D::Transport>>>,
    discovery_timeout: Duration,
    poll_interval: Duration,
}

impl<D> SessionManager<D>
where
    D: Discovery,
    <D::Transport as Exchange>::Error: StdError + Send + Sync + 'static,
{
    pub fn new(discovery: D, config: &AuthConfig) -> Self {
        SessionManager {
            discovery,
            active: Mutex::new(None),
            discovery_timeout: config.discovery_timeout(),
            poll_interval: config.discovery_poll_interval(),
        }
    }

    /// The first device to show up within the discovery timeout
    pub async fn discover(&self) -> AuthResult<DeviceDescriptor> {
        let search = async {
            loop {
                let devices = match self.discovery.enumerate().await {
                    Ok(devices) => devices,
                    Err(fault) => return Err(classify(&fault)),
                };
                if let Some(device) = devices.into_iter().next() {
                    return Ok(device);
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(self.discovery_timeout, search).await {
            Ok(Ok(device)) => {
                info!("discovered {}", device);
                Ok(device)
            }
            Ok(Err(err)) => {
                warn!("device discovery failed: {}", err);
                Err(err)
            }
            Err(_) => {
                warn!("no device found within {:?}", self.discovery_timeout);
                Err(AuthError::new(
                    ErrorCategory::DeviceNotFound,
                    format!(
                        "No Ledger device found within {}. Connect and unlock it, then try again.",
                        describe(self.discovery_timeout)
                    ),
                ))
            }
        }
    }

    /// Open `device`, or hand back the session that is already live
    pub async fn connect(
        &self,
        device: &DeviceDescriptor,
    ) -> AuthResult<DeviceSession<D::Transport>> {
        let mut active = self.active.lock().await;
        if let Some(session) = active.as_ref().filter(|s| s.is_connected()) {
            debug!("reusing session {}", session.session_id);
            return Ok(session.clone());
        }

        let transport = self.discovery.open(device).await.map_err(|fault| {
            let error = classify(&fault);
            warn!("cannot connect to {}: {}", device, error);
            match error.category {
                ErrorCategory::DeviceNotFound | ErrorCategory::UnsupportedEnvironment => error,
                _ => AuthError::new(ErrorCategory::TransportError, error.message),
            }
        })?;

        let session = DeviceSession::new(device.clone(), transport);
        info!("connected to {} (session {})", device, session.session_id);
        *active = Some(session.clone());
        Ok(session)
    }

    /// Reuse the live session, or discover and connect the first device
    pub async fn connect_first(&self) -> AuthResult<DeviceSession<D::Transport>> {
        if let Some(session) = self.current().await {
            return Ok(session);
        }
        let device = self.discover().await?;
        self.connect(&device).await
    }

    pub async fn current(&self) -> Option<DeviceSession<D::Transport>> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|s| s.is_connected())
            .cloned()
    }

    /// Whether `session_id` names the live session
    pub async fn is_active(&self, session_id: &str) -> bool {
        self.current()
            .await
            .is_some_and(|s| s.session_id == session_id)
    }

    /// Drop the active session. Never fails; closing the transport is best effort.
    pub async fn disconnect(&self) {
        let session = self.active.lock().await.take();
        let Some(session) = session else {
            debug!("disconnect with no active session");
            return;
        };

        session.connected.store(false, Ordering::SeqCst);
        if let Err(e) = session.transport.close().await {
            warn!("closing session {} failed: {}", session.session_id, e);
        }
        info!("disconnected session {}", session.session_id);
    }
}

/// USB HID discovery through `hidapi`. The HID context is created on first use.
#[derive(Clone, Default)]
pub struct HidDiscovery {
    api: Arc<StdMutex<Option<HidApi>>>,
}

impl HidDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_api<T, F>(&self, f: F) -> Result<T, DeviceFault>
    where
        T: Send + 'static,
        F: FnOnce(&mut HidApi) -> Result<T, DeviceFault> + Send + 'static,
    {
        let api = self.api.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = api
                .lock()
                .map_err(|_| DeviceFault::message("HID context poisoned"))?;
            if guard.is_none() {
                let created = HidApi::new().map_err(|e| {
                    DeviceFault::tagged(
                        "UnsupportedEnvironment",
                        format!("cannot initialise hidapi: {}", e),
                    )
                })?;
                *guard = Some(created);
            }
            match guard.as_mut() {
                Some(api) => f(api),
                None => Err(DeviceFault::message("HID context unavailable")),
            }
        })
        .await
        .map_err(DeviceFault::other)?
    }
}

impl fmt::Debug for HidDiscovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HidDiscovery")
    }
}

fn descriptor(info: &LedgerDeviceInfo) -> DeviceDescriptor {
    DeviceDescriptor {
        id: info.path.clone(),
        name: info.model.to_string(),
    }
}

#[async_trait]
impl Discovery for HidDiscovery {
    type Transport = TransportNativeHID;

    async fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceFault> {
        self.with_api(|api| {
            TransportNativeHID::list_devices(api)
                .map(|devices| devices.iter().map(descriptor).collect())
                .map_err(DeviceFault::other)
        })
        .await
    }

    async fn open(&self, device: &DeviceDescriptor) -> Result<TransportNativeHID, DeviceFault> {
        let path = device.id.clone();
        self.with_api(move |api| {
            let info = TransportNativeHID::list_devices(api)
                .map_err(DeviceFault::other)?
                .into_iter()
                .find(|info| info.path == path)
                .ok_or_else(|| DeviceFault::tagged("DeviceNotFound", "device not found"))?;
            TransportNativeHID::open_path(api, &info).map_err(DeviceFault::other)
        })
        .await
    }
}

static HID_SESSIONS: Lazy<Arc<SessionManager<HidDiscovery>>> =
    Lazy::new(|| Arc::new(SessionManager::new(HidDiscovery::new(), &AuthConfig::default())));

/// The process-wide USB session slot
pub fn hid_sessions() -> Arc<SessionManager<HidDiscovery>> {
    HID_SESSIONS.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_transport::mock::MockTransport;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct ScriptedDiscovery {
        scans: StdMutex<VecDeque<Vec<DeviceDescriptor>>>,
        opened: AtomicUsize,
        fail_open: bool,
    }

    impl ScriptedDiscovery {
        fn with_scans(scans: Vec<Vec<DeviceDescriptor>>) -> Self {
            ScriptedDiscovery {
                scans: StdMutex::new(scans.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Discovery for ScriptedDiscovery {
        type Transport = MockTransport;

        async fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceFault> {
            Ok(self.scans.lock().unwrap().pop_front().unwrap_or_default())
        }

        async fn open(&self, device: &DeviceDescriptor) -> Result<MockTransport, DeviceFault> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if self.fail_open {
                return Err(DeviceFault::message(format!(
                    "cannot open device `{}`: busy",
                    device.id
                )));
            }
            Ok(MockTransport::default())
        }
    }

    fn nano(id: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.to_string(),
            name: "Nano X".to_string(),
        }
    }

    fn manager(discovery: ScriptedDiscovery) -> SessionManager<ScriptedDiscovery> {
        SessionManager::new(discovery, &AuthConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn first_discovered_device_wins() {
        let manager = manager(ScriptedDiscovery::with_scans(vec![
            vec![],
            vec![],
            vec![nano("a"), nano("b")],
        ]));
        let device = manager.discover().await.unwrap();
        assert_eq!(device.id, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_gives_up_after_timeout() {
        let manager = manager(ScriptedDiscovery::default());
        let started = tokio::time::Instant::now();
        let err = manager.discover().await.unwrap_err();

        assert_eq!(err.category, ErrorCategory::DeviceNotFound);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn connect_reuses_live_session() {
        let manager = manager(ScriptedDiscovery::default());
        let first = manager.connect(&nano("a")).await.unwrap();
        let second = manager.connect(&nano("b")).await.unwrap();

        assert_eq!(first.session_id(), second.session_id());
        assert_eq!(manager.discovery.opened.load(Ordering::SeqCst), 1);
        assert!(manager.is_active(first.session_id()).await);
    }

    #[tokio::test]
    async fn disconnect_clears_slot_and_invalidates_signer() {
        let manager = manager(ScriptedDiscovery::default());
        let session = manager.connect(&nano("a")).await.unwrap();
        let signer = session.signer(Duration::from_millis(10));
        assert!(signer.is_connected());

        manager.disconnect().await;
        assert!(manager.current().await.is_none());
        assert!(!signer.is_connected());
        assert!(session.transport().is_closed());
        assert!(!manager.is_active(session.session_id()).await);

        // idempotent
        manager.disconnect().await;

        let fresh = manager.connect(&nano("a")).await.unwrap();
        assert_ne!(fresh.session_id(), session.session_id());
    }

    #[tokio::test]
    async fn open_failure_is_a_transport_error() {
        let manager = manager(ScriptedDiscovery {
            fail_open: true,
            ..Default::default()
        });
        let err = manager.connect(&nano("a")).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::TransportError);
        assert!(manager.current().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_first_discovers_once() {
        let manager = manager(ScriptedDiscovery::with_scans(vec![vec![nano("a")]]));
        let session = manager.connect_first().await.unwrap();
        let again = manager.connect_first().await.unwrap();
        assert_eq!(session.session_id(), again.session_id());
        assert_eq!(session.device().id, "a");
    }

    #[test]
    #[serial_test::serial]
    fn hid_slot_is_process_wide() {
        assert!(Arc::ptr_eq(&hid_sessions(), &hid_sessions()));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn hid_slot_starts_empty() {
        assert!(hid_sessions().current().await.is_none());
        hid_sessions().disconnect().await;
    }
}
