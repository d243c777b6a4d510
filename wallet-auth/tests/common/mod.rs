// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ledger_transport::mock::{MockReply, MockTransport};
use wallet_auth::{
    AuthConfig, AuthStore, Authenticator, DeviceDescriptor, DeviceFault, Discovery, ManualClock,
    MemoryStorage, SessionManager,
};

pub const NOW_MS: i64 = 1_700_000_000_000;

/// Discovery that always finds one device and hands out a prepared transport
pub struct ScriptedDiscovery {
    transport: Mutex<Option<MockTransport>>,
}

impl ScriptedDiscovery {
    pub fn new(replies: Vec<MockReply>) -> Self {
        ScriptedDiscovery {
            transport: Mutex::new(Some(MockTransport::new(replies))),
        }
    }
}

#[async_trait]
impl Discovery for ScriptedDiscovery {
    type Transport = MockTransport;

    async fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceFault> {
        Ok(vec![DeviceDescriptor {
            id: "mock-0".to_string(),
            name: "Nano S Plus".to_string(),
        }])
    }

    async fn open(&self, _: &DeviceDescriptor) -> Result<MockTransport, DeviceFault> {
        self.transport
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| DeviceFault::message("cannot open device `mock-0`: already open"))
    }
}

pub type TestAuthenticator = Authenticator<ScriptedDiscovery, MemoryStorage, Arc<ManualClock>>;

pub fn authenticator(replies: Vec<MockReply>) -> (TestAuthenticator, Arc<ManualClock>) {
    let config = AuthConfig::default();
    let clock = Arc::new(ManualClock::new(NOW_MS));
    let store = AuthStore::with_clock(
        MemoryStorage::new(),
        clock.clone(),
        config.storage_key.clone(),
        config.session_lifetime(),
    );
    let sessions = Arc::new(SessionManager::new(ScriptedDiscovery::new(replies), &config));
    (Authenticator::new(config, sessions, store), clock)
}

/// GET APP AND VERSION answer for `name`
pub fn app_info(name: &str) -> MockReply {
    let mut data = vec![1, name.len() as u8];
    data.extend_from_slice(name.as_bytes());
    let version = b"1.10.4";
    data.push(version.len() as u8);
    data.extend_from_slice(version);
    data.extend_from_slice(&[1, 0x00]);
    MockReply::ok(data)
}

/// GET ADDRESS answer carrying `address` (with or without `0x`)
pub fn address_reply(address: &str) -> MockReply {
    let hex = address.trim_start_matches("0x");
    let mut data = vec![65];
    data.extend([0x04; 65]);
    data.push(hex.len() as u8);
    data.extend_from_slice(hex.as_bytes());
    MockReply::ok(data)
}

/// Device signature answer (`v || r || s`) for a joined `0x` r||s||v signature
pub fn signature_reply(signature: &str) -> MockReply {
    let bytes = hex::decode(signature.trim_start_matches("0x")).unwrap();
    assert_eq!(bytes.len(), 65);
    let mut data = vec![bytes[64]];
    data.extend_from_slice(&bytes[..64]);
    MockReply::ok(data)
}
