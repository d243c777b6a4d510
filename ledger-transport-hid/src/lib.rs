mod errors;

use std::{
    ffi::CString,
    fmt,
    io::Cursor,
    ops::Deref,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, TryLockError,
    },
    time::{Duration, Instant},
};

use byteorder::{BigEndian, ReadBytesExt};
pub use errors::LedgerHIDError;
pub use hidapi;
use hidapi::{DeviceInfo, HidApi, HidDevice};
use ledger_transport::{async_trait, APDUAnswer, APDUCommand, Exchange};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

pub const LEDGER_VENDOR_ID: u16 = 0x2c97;
pub const LEDGER_CHANNEL: u16 = 0x0101;
pub const LEDGER_USAGE_PAGE: u16 = 0xffa0;
// for Windows compatability, we prepend the buffer with a 0x00
// so the actual buffer is 64 bytes
pub const LEDGER_PACKET_WRITE_SIZE: u8 = 65;
pub const LEDGER_PACKET_READ_SIZE: u8 = 64;
pub const LEDGER_TIMEOUT: i32 = 10_000_000;
/// Longest single blocking read; a closed transport is noticed within this window
const READ_SLICE_MS: i32 = 100;
/// channel (2) + tag (1) + sequence index (2)
const HEADER_SIZE: usize = 5;
const TAG_APDU: u8 = 0x05;

// USB Product IDs (Normal / Bootloader)
pub mod pid {
    pub const NANO_S: u16 = 0x0010; // Identifiers: 0x10
    pub const NANO_S_PLUS: u16 = 0x0050; // Identifiers: 0x50
    pub const NANO_S_PLUS_BL: u16 = 0x0005;

    pub const NANO_X: u16 = 0x0040; // Identifiers: 0x40
    pub const NANO_X_BL: u16 = 0x0004;

    pub const STAX: u16 = 0x0060; // Identifiers: 0x60
    pub const STAX_BL: u16 = 0x0006;

    pub const FLEX: u16 = 0x0070; // Identifiers: 0x70
    pub const FLEX_BL: u16 = 0x0007;
}

/// Ledger hardware model, derived from the USB product id
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerModel {
    NanoS,
    NanoSPlus,
    NanoX,
    Stax,
    Flex,
    Unknown,
}

impl LedgerModel {
    /// Recent firmware reports `<model>xx` product ids (e.g. 0x4011), older firmware and
    /// bootloaders report the bare identifier.
    pub fn from_product_id(product_id: u16) -> Self {
        let id = if product_id > 0xff {
            product_id >> 8
        } else {
            product_id
        };

        match id {
            pid::NANO_S => LedgerModel::NanoS,
            pid::NANO_S_PLUS | pid::NANO_S_PLUS_BL => LedgerModel::NanoSPlus,
            pid::NANO_X | pid::NANO_X_BL => LedgerModel::NanoX,
            pid::STAX | pid::STAX_BL => LedgerModel::Stax,
            pid::FLEX | pid::FLEX_BL => LedgerModel::Flex,
            _ => LedgerModel::Unknown,
        }
    }
}

impl fmt::Display for LedgerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LedgerModel::NanoS => "Nano S",
            LedgerModel::NanoSPlus => "Nano S Plus",
            LedgerModel::NanoX => "Nano X",
            LedgerModel::Stax => "Stax",
            LedgerModel::Flex => "Flex",
            LedgerModel::Unknown => "Ledger",
        };
        f.write_str(name)
    }
}

/// A discovered, not yet opened, Ledger HID interface
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDeviceInfo {
    /// Platform specific HID path, used to open the device
    pub path: String,
    pub product_id: u16,
    pub model: LedgerModel,
    pub serial_number: Option<String>,
}

impl LedgerDeviceInfo {
    fn from_hid(dev: &DeviceInfo) -> Self {
        LedgerDeviceInfo {
            path: dev.path().to_string_lossy().into_owned(),
            product_id: dev.product_id(),
            model: LedgerModel::from_product_id(dev.product_id()),
            serial_number: dev.serial_number().map(str::to_string),
        }
    }
}

pub struct TransportNativeHID {
    device: Arc<Mutex<Option<HidDevice>>>,
    closed: Arc<AtomicBool>,
}

impl TransportNativeHID {
    fn is_ledger(dev: &DeviceInfo) -> bool {
        dev.vendor_id() == LEDGER_VENDOR_ID && dev.usage_page() == LEDGER_USAGE_PAGE
    }

    fn ledgers(api: &HidApi) -> impl Iterator<Item = &DeviceInfo> {
        api.device_list().filter(|dev| Self::is_ledger(dev))
    }

    /// Enumerate Ledger interfaces currently plugged in, in enumeration order
    pub fn list_devices(api: &mut HidApi) -> Result<Vec<LedgerDeviceInfo>, LedgerHIDError> {
        api.refresh_devices()?;
        let devices: Vec<_> = Self::ledgers(api).map(LedgerDeviceInfo::from_hid).collect();
        debug!("found {} Ledger interface(s)", devices.len());
        Ok(devices)
    }

    /// Open a device previously returned by [`TransportNativeHID::list_devices`]
    pub fn open_path(api: &HidApi, info: &LedgerDeviceInfo) -> Result<Self, LedgerHIDError> {
        let path = CString::new(info.path.as_bytes())
            .map_err(|_| LedgerHIDError::Comm("invalid device path"))?;
        let device = api
            .open_path(&path)
            .map_err(|e| LedgerHIDError::Open(info.path.clone(), e))?;
        // reads below rely on blocking mode with an explicit timeout
        let _ = device.set_blocking_mode(true);
        info!("opened {} at {}", info.model, info.path);
        Ok(TransportNativeHID {
            device: Arc::new(Mutex::new(Some(device))),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Frame `apdu` as `len_hi len_lo apdu...` split over HID reports
    fn write_apdu(device: &HidDevice, channel: u16, apdu: &[u8]) -> Result<(), LedgerHIDError> {
        let len = u16::try_from(apdu.len()).map_err(|_| LedgerHIDError::Comm("APDU too long"))?;
        let mut payload = Vec::with_capacity(apdu.len() + 2);
        payload.extend_from_slice(&len.to_be_bytes());
        payload.extend_from_slice(apdu);

        // report id 0x00 first: required on Windows, ignored elsewhere
        let header_len = 1 + HEADER_SIZE;
        let mut report = [0u8; LEDGER_PACKET_WRITE_SIZE as usize];
        report[1..3].copy_from_slice(&channel.to_be_bytes());
        report[3] = TAG_APDU;

        for (seq, chunk) in payload
            .chunks(LEDGER_PACKET_WRITE_SIZE as usize - header_len)
            .enumerate()
        {
            report[4..6].copy_from_slice(&(seq as u16).to_be_bytes());
            report[header_len..header_len + chunk.len()].copy_from_slice(chunk);
            report[header_len + chunk.len()..].fill(0);

            debug!("[{:3}] >> {}", report.len(), hex::encode(report));

            if device.write(&report)? < report.len() {
                return Err(LedgerHIDError::Comm(
                    "USB write error. Could not send whole message",
                ));
            }
        }
        Ok(())
    }

    /// Wait for one report, giving up once `closed` is set or `LEDGER_TIMEOUT` elapses
    fn read_report(
        device: &HidDevice,
        closed: &AtomicBool,
        report: &mut [u8],
    ) -> Result<usize, LedgerHIDError> {
        let started = Instant::now();
        let limit = Duration::from_millis(LEDGER_TIMEOUT as u64);
        loop {
            let read = device.read_timeout(report, READ_SLICE_MS)?;
            if read > 0 {
                return Ok(read);
            }
            if closed.load(Ordering::SeqCst) {
                return Err(LedgerHIDError::NotConnected);
            }
            if started.elapsed() >= limit {
                return Err(LedgerHIDError::Comm("USB read timed out"));
            }
        }
    }

    /// Reassemble one APDU answer from HID reports on `channel`
    fn read_apdu(
        device: &HidDevice,
        closed: &AtomicBool,
        channel: u16,
    ) -> Result<Vec<u8>, LedgerHIDError> {
        let mut report = [0u8; LEDGER_PACKET_READ_SIZE as usize];
        let mut answer = Vec::with_capacity(256);
        let mut expected = 0usize;

        for seq in 0u16.. {
            let read = Self::read_report(device, closed, &mut report)?;
            let min = if seq == 0 { HEADER_SIZE + 2 } else { HEADER_SIZE };
            if read < min {
                return Err(LedgerHIDError::Comm("USB read error. Incomplete header"));
            }

            let mut rdr = Cursor::new(&report[..]);
            if rdr.read_u16::<BigEndian>()? != channel {
                return Err(LedgerHIDError::Comm("Invalid channel"));
            }
            if rdr.read_u8()? != TAG_APDU {
                return Err(LedgerHIDError::Comm("Invalid tag"));
            }
            if rdr.read_u16::<BigEndian>()? != seq {
                return Err(LedgerHIDError::Comm("Invalid sequence index"));
            }
            if seq == 0 {
                expected = rdr.read_u16::<BigEndian>()? as usize;
            }

            let start = rdr.position() as usize;
            let take = (report.len() - start).min(expected - answer.len());
            let chunk = &report[start..start + take];
            debug!("[{:3}] << {}", chunk.len(), hex::encode(chunk));
            answer.extend_from_slice(chunk);

            if answer.len() >= expected {
                break;
            }
        }
        Ok(answer)
    }

    /// Write `apdu` and wait for its answer on the calling thread
    fn exchange_blocking(
        device: &Mutex<Option<HidDevice>>,
        closed: &AtomicBool,
        apdu: &[u8],
    ) -> Result<APDUAnswer<Vec<u8>>, LedgerHIDError> {
        let mut guard = device
            .lock()
            .map_err(|_| LedgerHIDError::Comm("HID device poisoned"))?;
        if closed.load(Ordering::SeqCst) {
            // close() could not take the handle while an earlier exchange held it
            guard.take();
            return Err(LedgerHIDError::NotConnected);
        }
        let handle = guard.as_ref().ok_or(LedgerHIDError::NotConnected)?;

        let answer = Self::write_apdu(handle, LEDGER_CHANNEL, apdu)
            .and_then(|()| Self::read_apdu(handle, closed, LEDGER_CHANNEL));
        if matches!(answer, Err(LedgerHIDError::NotConnected)) {
            guard.take();
        }

        APDUAnswer::from_answer(answer?)
            .map_err(|_| LedgerHIDError::Comm("response was too short"))
    }

    /// Send `command` from a blocking worker so the async caller stays responsive
    pub async fn exchange<I: Deref<Target = [u8]>>(
        &self,
        command: &APDUCommand<I>,
    ) -> Result<APDUAnswer<Vec<u8>>, LedgerHIDError> {
        let apdu = command.serialize();
        let device = self.device.clone();
        let closed = self.closed.clone();

        tokio::task::spawn_blocking(move || Self::exchange_blocking(&device, &closed, &apdu))
            .await
            .map_err(|_| LedgerHIDError::Comm("HID worker stopped"))?
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark the transport closed and drop the HID handle.
    ///
    /// Never waits on an exchange in flight: that exchange sees the flag within one
    /// read slice, fails with [`LedgerHIDError::NotConnected`] and releases the handle.
    pub fn close(&self) -> Result<(), LedgerHIDError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.device.try_lock() {
            Ok(mut guard) => {
                if guard.take().is_some() {
                    info!("closed Ledger HID handle");
                }
            }
            Err(TryLockError::WouldBlock) => {
                warn!("Ledger HID exchange in flight, handle released when it stops");
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                poisoned.into_inner().take();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Exchange for TransportNativeHID {
    type Error = LedgerHIDError;
    type AnswerType = Vec<u8>;

    async fn exchange<I>(
        &self,
        command: &APDUCommand<I>,
    ) -> Result<APDUAnswer<Self::AnswerType>, Self::Error>
    where
        I: Deref<Target = [u8]> + Send + Sync,
    {
        TransportNativeHID::exchange(self, command).await
    }

    async fn close(&self) -> Result<(), Self::Error> {
        TransportNativeHID::close(self)
    }
}
