use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerHIDError {
    /// Device not found error
    #[error("Ledger device not found")]
    DeviceNotFound,
    /// Handle used after the device was closed
    #[error("Ledger device not connected")]
    NotConnected,
    /// Opening the HID interface failed (usually claimed by another application)
    #[error("cannot open device `{0}`: {1}")]
    Open(String, hidapi::HidError),
    /// Communication error
    #[error("Ledger device: communication error `{0}`")]
    Comm(&'static str),
    /// i/o error
    #[error("Ledger device: i/o error")]
    Io(#[from] std::io::Error),
    /// HID error
    #[error("Ledger device: hid error `{0}`")]
    Hid(#[from] hidapi::HidError),
}
