// SPDX-License-Identifier: Apache-2.0

//! Device-interaction state machine shared by address retrieval and signing.
//!
//! A device action pushes [`DeviceActionState`] values through a channel:
//! `NotStarted`, any number of `Pending`, then exactly one of `Completed`,
//! `Error` or `Stopped`. [`run_operation`] consumes that stream under a deadline.

use std::time::Duration;

use ledger_eth_app::{BipPath, TypedData};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::classifier::{classify, DeviceFault};
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult, ErrorCategory};

/// What the user has to do on the device for the operation to progress
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserInteraction {
    UnlockDevice,
    ConfirmOpenApp,
    VerifyAddress,
    SignMessage,
    SignTypedData,
}

impl UserInteraction {
    pub fn status_text(&self) -> &'static str {
        match self {
            UserInteraction::UnlockDevice => "Please unlock your Ledger device",
            UserInteraction::ConfirmOpenApp => {
                "Please confirm opening the Ethereum app on your Ledger device"
            }
            UserInteraction::VerifyAddress => "Please verify the address on your Ledger device",
            UserInteraction::SignMessage => {
                "Please review and sign the message on your Ledger device"
            }
            UserInteraction::SignTypedData => {
                "Please review and sign the typed data on your Ledger device"
            }
        }
    }
}

#[derive(Clone, Debug)]
pub enum DeviceActionState<T> {
    NotStarted,
    Pending {
        required_interaction: Option<UserInteraction>,
    },
    Completed(T),
    Error(DeviceFault),
    Stopped,
}

impl<T> DeviceActionState<T> {
    pub fn pending(interaction: UserInteraction) -> Self {
        DeviceActionState::Pending {
            required_interaction: Some(interaction),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeviceActionState::Completed(_)
                | DeviceActionState::Error(_)
                | DeviceActionState::Stopped
        )
    }
}

/// Aborts the work behind a device action. Consumed on use, so it runs at most once.
pub struct CancelHandle {
    cancel: Box<dyn FnOnce() + Send>,
}

impl CancelHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        CancelHandle {
            cancel: Box::new(cancel),
        }
    }

    pub fn noop() -> Self {
        CancelHandle::new(|| {})
    }

    pub fn cancel(self) {
        (self.cancel)()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CancelHandle")
    }
}

/// A running device action: its state stream and the means to abort it
#[derive(Debug)]
pub struct DeviceAction<T> {
    pub states: mpsc::UnboundedReceiver<DeviceActionState<T>>,
    pub cancel: CancelHandle,
}

impl<T> DeviceAction<T> {
    /// A sender for driving the action by hand, plus the action itself
    pub fn channel(cancel: CancelHandle) -> (mpsc::UnboundedSender<DeviceActionState<T>>, Self) {
        let (tx, states) = mpsc::unbounded_channel();
        (tx, DeviceAction { states, cancel })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    AddressRetrieval,
    PersonalMessageSign,
    TypedDataSign,
}

impl OperationKind {
    pub fn timeout(&self, config: &AuthConfig) -> Duration {
        match self {
            OperationKind::AddressRetrieval => config.address_timeout(),
            OperationKind::PersonalMessageSign => config.message_timeout(),
            OperationKind::TypedDataSign => config.typed_data_timeout(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            OperationKind::AddressRetrieval => "address retrieval",
            OperationKind::PersonalMessageSign => "message signing",
            OperationKind::TypedDataSign => "typed data signing",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum OperationPayload {
    Address { verify_on_device: bool },
    Message(String),
    TypedData(Box<TypedData>),
}

/// One address-retrieval or signing request
#[derive(Clone, Debug, PartialEq)]
pub struct SigningOperation {
    pub kind: OperationKind,
    pub derivation_path: BipPath,
    pub payload: OperationPayload,
    pub timeout: Duration,
}

impl SigningOperation {
    pub fn get_address(path: BipPath, verify_on_device: bool, config: &AuthConfig) -> Self {
        Self::build(
            OperationKind::AddressRetrieval,
            path,
            OperationPayload::Address { verify_on_device },
            config,
        )
    }

    pub fn sign_message(path: BipPath, message: impl Into<String>, config: &AuthConfig) -> Self {
        Self::build(
            OperationKind::PersonalMessageSign,
            path,
            OperationPayload::Message(message.into()),
            config,
        )
    }

    pub fn sign_typed_data(path: BipPath, typed_data: TypedData, config: &AuthConfig) -> Self {
        Self::build(
            OperationKind::TypedDataSign,
            path,
            OperationPayload::TypedData(Box::new(typed_data)),
            config,
        )
    }

    fn build(
        kind: OperationKind,
        derivation_path: BipPath,
        payload: OperationPayload,
        config: &AuthConfig,
    ) -> Self {
        SigningOperation {
            kind,
            derivation_path,
            payload,
            timeout: kind.timeout(config),
        }
    }
}

/// Progress report handed to the caller's status callback
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusUpdate {
    pub message: String,
    pub required_interaction: Option<UserInteraction>,
}

impl StatusUpdate {
    pub fn text(message: impl Into<String>) -> Self {
        StatusUpdate {
            message: message.into(),
            required_interaction: None,
        }
    }

    fn for_interaction(interaction: Option<UserInteraction>) -> Self {
        match interaction {
            Some(interaction) => StatusUpdate {
                message: interaction.status_text().to_string(),
                required_interaction: Some(interaction),
            },
            None => StatusUpdate::text("Waiting for Ledger device..."),
        }
    }
}

/// Drive `action` to its first terminal state or until `timeout` elapses.
///
/// Each distinct required interaction is reported once. On timeout the state
/// stream is dropped first, then the action is cancelled, and a `Timeout` error
/// is returned; nothing the action emits afterwards is observed, including a
/// state that was only received once the deadline had passed.
pub async fn run_operation<T, F>(
    kind: OperationKind,
    action: DeviceAction<T>,
    timeout: Duration,
    mut on_status: F,
) -> AuthResult<T>
where
    F: FnMut(StatusUpdate),
{
    let DeviceAction { mut states, cancel } = action;
    let deadline = Instant::now() + timeout;
    let mut announced: Option<Option<UserInteraction>> = None;

    info!("starting {} (timeout {:?})", kind.label(), timeout);

    loop {
        // a transport that blocks the runtime can deliver a state after the deadline
        let next = match tokio::time::timeout_at(deadline, states.recv()).await {
            Ok(next) if Instant::now() < deadline => next,
            _ => {
                drop(states);
                cancel.cancel();
                warn!("{} timed out after {:?}", kind.label(), timeout);
                return Err(AuthError::new(
                    ErrorCategory::Timeout,
                    format!(
                        "The device did not finish {} within {}. Check the device and try again.",
                        kind.label(),
                        describe(timeout)
                    ),
                ));
            }
        };

        match next {
            Some(DeviceActionState::NotStarted) => debug!("{} not started yet", kind.label()),
            Some(DeviceActionState::Pending {
                required_interaction,
            }) => {
                if announced != Some(required_interaction) {
                    debug!("{} pending: {:?}", kind.label(), required_interaction);
                    announced = Some(required_interaction);
                    on_status(StatusUpdate::for_interaction(required_interaction));
                }
            }
            Some(DeviceActionState::Completed(output)) => {
                info!("{} completed", kind.label());
                return Ok(output);
            }
            Some(DeviceActionState::Error(fault)) => {
                let error = classify(&fault);
                warn!("{} failed: {} ({})", kind.label(), error, fault);
                return Err(error);
            }
            Some(DeviceActionState::Stopped) => {
                info!("{} stopped", kind.label());
                return Err(AuthError::new(
                    ErrorCategory::UserRejected,
                    format!("The {} was cancelled before it completed.", kind.label()),
                ));
            }
            None => {
                warn!("{} ended without a terminal state", kind.label());
                return Err(AuthError::new(
                    ErrorCategory::TransportError,
                    "The device stopped responding. Reconnect it and try again.",
                ));
            }
        }
    }
}

/// `120 seconds`, or `500 ms` when the duration is not whole seconds
pub(crate) fn describe(timeout: Duration) -> String {
    if timeout.subsec_millis() == 0 {
        format!("{} seconds", timeout.as_secs())
    } else {
        format!("{} ms", timeout.as_millis())
    }
}

/// Signature output of a device, in any of the shapes it may take
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSignature {
    pub r: Option<String>,
    pub s: Option<String>,
    pub v: Option<u64>,
    pub signature: Option<String>,
}

impl RawSignature {
    pub fn from_components(r: impl Into<String>, s: impl Into<String>, v: u64) -> Self {
        RawSignature {
            r: Some(r.into()),
            s: Some(s.into()),
            v: Some(v),
            signature: None,
        }
    }

    pub fn joined(signature: impl Into<String>) -> Self {
        RawSignature {
            signature: Some(signature.into()),
            ..Default::default()
        }
    }
}

impl From<ledger_eth_app::Signature> for RawSignature {
    fn from(signature: ledger_eth_app::Signature) -> Self {
        RawSignature::from_components(
            hex::encode(&signature.r),
            hex::encode(&signature.s),
            u64::from(signature.v),
        )
    }
}

/// Canonical `0x` + r + s + v hex signature.
///
/// `r`/`s` lose any `0x` prefix, `v` becomes two lowercase hex digits. A pre-joined
/// `signature` is used verbatim when components are absent.
pub fn format_signature(raw: &RawSignature) -> AuthResult<String> {
    match raw {
        RawSignature {
            r: Some(r),
            s: Some(s),
            v: Some(v),
            ..
        } if *v <= 0xff => Ok(format!("0x{}{}{:02x}", strip_0x(r), strip_0x(s), v)),
        RawSignature {
            r: None,
            s: None,
            v: None,
            signature: Some(signature),
        } => Ok(signature.clone()),
        _ => Err(AuthError::new(
            ErrorCategory::MalformedResponse,
            "unexpected signature format",
        )),
    }
}

fn strip_0x(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn counting_cancel() -> (Arc<AtomicUsize>, CancelHandle) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let handle = CancelHandle::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (count, handle)
    }

    #[test]
    fn formats_components_with_and_without_prefix() {
        let r = "11".repeat(32);
        let s = "22".repeat(32);
        let expected = format!("0x{}{}1b", r, s);

        let plain = RawSignature::from_components(r.clone(), s.clone(), 27);
        let prefixed = RawSignature::from_components(format!("0x{}", r), format!("0x{}", s), 27);

        assert_eq!(format_signature(&plain).unwrap(), expected);
        assert_eq!(format_signature(&prefixed).unwrap(), expected);
        assert_eq!(expected.len(), 2 + 64 + 64 + 2);
    }

    #[test]
    fn small_v_is_zero_padded() {
        let raw = RawSignature::from_components("aa", "bb", 1);
        assert_eq!(format_signature(&raw).unwrap(), "0xaabb01");
    }

    #[test]
    fn joined_signature_is_verbatim() {
        let raw = RawSignature::joined("0xDEADbeef");
        assert_eq!(format_signature(&raw).unwrap(), "0xDEADbeef");
    }

    #[test]
    fn other_shapes_are_rejected() {
        let partial = RawSignature {
            r: Some("aa".to_string()),
            ..Default::default()
        };
        let oversized_v = RawSignature::from_components("aa", "bb", 256);

        for raw in [RawSignature::default(), partial, oversized_v] {
            let err = format_signature(&raw).unwrap_err();
            assert_eq!(err.category, ErrorCategory::MalformedResponse);
            assert_eq!(err.message, "unexpected signature format");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reports_each_interaction_once() {
        let (_, cancel) = counting_cancel();
        let (tx, action) = DeviceAction::channel(cancel);
        tx.send(DeviceActionState::NotStarted).unwrap();
        tx.send(DeviceActionState::pending(UserInteraction::UnlockDevice))
            .unwrap();
        tx.send(DeviceActionState::pending(UserInteraction::UnlockDevice))
            .unwrap();
        tx.send(DeviceActionState::pending(UserInteraction::SignMessage))
            .unwrap();
        tx.send(DeviceActionState::Completed(7u8)).unwrap();
        tx.send(DeviceActionState::Error(DeviceFault::message("late")))
            .unwrap();

        let mut updates = Vec::new();
        let result = run_operation(
            OperationKind::PersonalMessageSign,
            action,
            Duration::from_secs(120),
            |update| updates.push(update.required_interaction),
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(
            updates,
            vec![
                Some(UserInteraction::UnlockDevice),
                Some(UserInteraction::SignMessage)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_once_and_ignores_late_states() {
        let (cancelled, cancel) = counting_cancel();
        let (tx, action) = DeviceAction::<u8>::channel(cancel);
        tx.send(DeviceActionState::NotStarted).unwrap();
        tx.send(DeviceActionState::pending(UserInteraction::SignTypedData))
            .unwrap();

        let updates = Arc::new(Mutex::new(0usize));
        let seen = updates.clone();
        let started = Instant::now();
        let err = run_operation(
            OperationKind::TypedDataSign,
            action,
            Duration::from_secs(180),
            move |_| *seen.lock().unwrap() += 1,
        )
        .await
        .unwrap_err();

        assert_eq!(err.category, ErrorCategory::Timeout);
        assert!(started.elapsed() >= Duration::from_secs(180));
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(*updates.lock().unwrap(), 1);

        // the stream is gone, later emissions go nowhere
        assert!(tx.send(DeviceActionState::Completed(1)).is_err());
        assert_eq!(*updates.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn device_error_is_classified() {
        let (cancelled, cancel) = counting_cancel();
        let (tx, action) = DeviceAction::<u8>::channel(cancel);
        tx.send(DeviceActionState::Error(DeviceFault::StatusWord(0x6985)))
            .unwrap();

        let err = run_operation(
            OperationKind::AddressRetrieval,
            action,
            Duration::from_secs(120),
            |_| {},
        )
        .await
        .unwrap_err();

        assert_eq!(err.category, ErrorCategory::UserRejected);
        assert_eq!(cancelled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_stream_without_terminal_is_an_error() {
        let (tx, action) = DeviceAction::<u8>::channel(CancelHandle::noop());
        tx.send(DeviceActionState::NotStarted).unwrap();
        drop(tx);

        let err = run_operation(
            OperationKind::AddressRetrieval,
            action,
            Duration::from_secs(120),
            |_| {},
        )
        .await
        .unwrap_err();
        assert_eq!(err.category, ErrorCategory::TransportError);
    }

    #[test]
    fn timeouts_follow_config() {
        let config = AuthConfig::default();
        assert_eq!(
            OperationKind::TypedDataSign.timeout(&config),
            Duration::from_secs(180)
        );
        let op = SigningOperation::sign_message(BipPath::default(), "hi", &config);
        assert_eq!(op.timeout, Duration::from_secs(120));
    }
}
