// SPDX-License-Identifier: Apache-2.0

//! Device actions against the Ledger Ethereum app.
//!
//! Every action first probes which app is running. A locked device is polled
//! until it unlocks, the dashboard is asked to launch the Ethereum app, and any
//! other app is closed. Each of those steps is reported as a `Pending` state.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ledger_device_base::{App, AppExt};
use ledger_eth_app::{
    BipPath, EthApp, GetAddress, GetAddressParams, SignEip712, SignMessageParams,
    SignPersonalMessage, TypedData,
};
use ledger_transport::Exchange;
use log::{debug, info};
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::classifier::DeviceFault;
use crate::engine::{
    run_operation, CancelHandle, DeviceAction, DeviceActionState, OperationPayload, RawSignature,
    SigningOperation, StatusUpdate, UserInteraction,
};
use crate::error::AuthResult;

/// Status words meaning the device sits on its PIN screen
const LOCKED_STATUS_WORDS: [u16; 2] = [0x5515, 0x6982];

/// What a finished [`SigningOperation`] produced
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationOutput {
    Address(String),
    Signature(RawSignature),
}

/// Signing capability bound to one device session
pub struct LedgerSigner<E> {
    session_id: String,
    transport: Arc<E>,
    connected: Arc<AtomicBool>,
    probe_interval: Duration,
}

impl<E> Clone for LedgerSigner<E> {
    fn clone(&self) -> Self {
        LedgerSigner {
            session_id: self.session_id.clone(),
            transport: self.transport.clone(),
            connected: self.connected.clone(),
            probe_interval: self.probe_interval,
        }
    }
}

impl<E> LedgerSigner<E>
where
    E: Exchange + Send + Sync + 'static,
    E::Error: std::error::Error + Send + Sync + 'static,
{
    pub(crate) fn new(
        session_id: String,
        transport: Arc<E>,
        connected: Arc<AtomicBool>,
        probe_interval: Duration,
    ) -> Self {
        LedgerSigner {
            session_id,
            transport,
            connected,
            probe_interval,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Derive the address for `path`, optionally showing it on the device first
    pub fn get_address(&self, path: BipPath, verify_on_device: bool) -> DeviceAction<String> {
        let interaction = verify_on_device.then_some(UserInteraction::VerifyAddress);
        self.spawn(interaction, move |transport| async move {
            let mut params = GetAddressParams::new(path);
            if verify_on_device {
                params = params.with_display();
            }
            EthApp::get_address(transport.as_ref(), params)
                .await
                .map(|info| info.address.address)
                .map_err(DeviceFault::from)
        })
    }

    pub fn sign_personal_message(
        &self,
        path: BipPath,
        message: String,
    ) -> DeviceAction<RawSignature> {
        self.spawn(
            Some(UserInteraction::SignMessage),
            move |transport| async move {
                let params = SignMessageParams::new(path, message.into_bytes());
                EthApp::sign_personal_message(transport.as_ref(), params)
                    .await
                    .map(RawSignature::from)
                    .map_err(DeviceFault::from)
            },
        )
    }

    pub fn sign_typed_data(
        &self,
        path: BipPath,
        typed_data: TypedData,
    ) -> DeviceAction<RawSignature> {
        self.spawn(
            Some(UserInteraction::SignTypedData),
            move |transport| async move {
                EthApp::sign_typed_data(transport.as_ref(), path, &typed_data)
                    .await
                    .map(RawSignature::from)
                    .map_err(DeviceFault::from)
            },
        )
    }

    /// Start `operation` and drive it to completion under its own timeout
    pub async fn perform<F>(
        &self,
        operation: SigningOperation,
        on_status: F,
    ) -> AuthResult<OperationOutput>
    where
        F: FnMut(StatusUpdate),
    {
        let SigningOperation {
            kind,
            derivation_path,
            payload,
            timeout,
        } = operation;

        match payload {
            OperationPayload::Address { verify_on_device } => {
                let action = self.get_address(derivation_path, verify_on_device);
                run_operation(kind, action, timeout, on_status)
                    .await
                    .map(OperationOutput::Address)
            }
            OperationPayload::Message(message) => {
                let action = self.sign_personal_message(derivation_path, message);
                run_operation(kind, action, timeout, on_status)
                    .await
                    .map(OperationOutput::Signature)
            }
            OperationPayload::TypedData(typed_data) => {
                let action = self.sign_typed_data(derivation_path, *typed_data);
                run_operation(kind, action, timeout, on_status)
                    .await
                    .map(OperationOutput::Signature)
            }
        }
    }

    fn spawn<T, F, Fut>(&self, interaction: Option<UserInteraction>, work: F) -> DeviceAction<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<E>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, DeviceFault>> + Send + 'static,
    {
        let (tx, states) = mpsc::unbounded_channel();
        let transport = self.transport.clone();
        let connected = self.connected.clone();
        let probe_interval = self.probe_interval;

        let task = tokio::spawn(async move {
            let _ = tx.send(DeviceActionState::NotStarted);

            if !connected.load(Ordering::SeqCst) {
                let _ = tx.send(DeviceActionState::Error(DeviceFault::message(
                    "Ledger device not connected",
                )));
                return;
            }

            if let Err(fault) = ensure_app_open(transport.as_ref(), &tx, probe_interval).await {
                let _ = tx.send(DeviceActionState::Error(fault));
                return;
            }

            let _ = tx.send(DeviceActionState::Pending {
                required_interaction: interaction,
            });

            let terminal = match work(transport).await {
                Ok(output) => DeviceActionState::Completed(output),
                Err(fault) => DeviceActionState::Error(fault),
            };
            let _ = tx.send(terminal);
        });

        let abort = task.abort_handle();
        DeviceAction {
            states,
            cancel: CancelHandle::new(move || abort.abort()),
        }
    }
}

/// Poll the device until the Ethereum app is in the foreground
async fn ensure_app_open<E, T>(
    transport: &E,
    tx: &UnboundedSender<DeviceActionState<T>>,
    probe_interval: Duration,
) -> Result<(), DeviceFault>
where
    E: Exchange + Send + Sync,
    E::Error: std::error::Error,
{
    loop {
        match <EthApp as AppExt<E>>::get_app_info(transport).await {
            Ok(info) if info.app_name == EthApp::NAME => {
                debug!("{} {} is open", info.app_name, info.app_version);
                return Ok(());
            }
            Ok(info) if info.is_dashboard() => {
                info!("dashboard open, asking to launch {}", EthApp::NAME);
                let _ = tx.send(DeviceActionState::pending(UserInteraction::ConfirmOpenApp));
                <EthApp as AppExt<E>>::open_app(transport)
                    .await
                    .map_err(DeviceFault::from)?;
            }
            Ok(info) => {
                info!("{} is running, returning to dashboard", info.app_name);
                <EthApp as AppExt<E>>::quit_app(transport)
                    .await
                    .map_err(DeviceFault::from)?;
            }
            Err(err)
                if err
                    .status_word()
                    .is_some_and(|sw| LOCKED_STATUS_WORDS.contains(&sw)) =>
            {
                debug!("device locked, polling again in {:?}", probe_interval);
                let _ = tx.send(DeviceActionState::pending(UserInteraction::UnlockDevice));
            }
            Err(err) => return Err(err.into()),
        }
        tokio::time::sleep(probe_interval).await;
    }
}
