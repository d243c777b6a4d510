// SPDX-License-Identifier: Apache-2.0

//! APDU framing shared by every layer that talks to a Ledger device.
//!
//! A command is `CLA INS P1 P2 Lc DATA`; an answer is `DATA SW1 SW2`, where the
//! trailing two bytes form the status word.

#![no_std]
#![deny(missing_docs)]

extern crate no_std_compat as std;

use core::ops::Deref;
use std::convert::{TryFrom, TryInto};

use snafu::prelude::*;

/// An APDU command sent to the device
#[derive(Debug, Clone)]
pub struct APDUCommand<B> {
    /// APDU instruction class
    pub cla: u8,
    /// Instruction code
    pub ins: u8,
    /// Instruction parameter 1
    pub p1: u8,
    /// Instruction parameter 2
    pub p2: u8,
    /// Command data
    pub data: B,
}

#[cfg(feature = "std")]
impl<B> APDUCommand<B>
where
    B: Deref<Target = [u8]>,
{
    /// Serialize this command into the raw byte layout expected by the device
    pub fn serialize(&self) -> std::vec::Vec<u8> {
        let mut raw = std::vec::Vec::with_capacity(5 + self.data.len());
        raw.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2, self.data.len() as u8]);
        raw.extend_from_slice(&self.data);
        raw
    }
}

/// An answer received from the device
#[derive(Debug)]
pub struct APDUAnswer<B> {
    data: B,
    retcode: u16,
}

/// Error interpreting bytes as an APDU answer
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum APDUAnswerError {
    #[snafu(display("answer too short (< 2 bytes)"))]
    /// Passed APDU answer was less than the minimum 2 bytes required for the return code
    TooShort,
}

impl<B> APDUAnswer<B>
where
    B: Deref<Target = [u8]>,
{
    /// Attempt to interpret the given slice as an APDU answer
    pub fn from_answer(answer: B) -> Result<Self, APDUAnswerError> {
        ensure!(answer.len() >= 2, TooShortSnafu);
        let retcode = arrayref::array_ref!(answer, answer.len() - 2, 2);
        let retcode = u16::from_be_bytes(*retcode);

        Ok(APDUAnswer {
            data: answer,
            retcode,
        })
    }

    /// Will return the answer's payload
    #[inline(always)]
    pub fn apdu_data(&self) -> &[u8] {
        &self.data[..self.data.len() - 2]
    }

    /// Will return the answer's payload
    #[inline(always)]
    pub fn data(&self) -> &[u8] {
        self.apdu_data()
    }

    /// Will attempt to interpret the status word as a known [`APDUErrorCode`]
    ///
    /// Returns the raw status word when it is not known
    pub fn error_code(&self) -> Result<APDUErrorCode, u16> {
        self.retcode
            .try_into()
            .map_err(|ErrorCodeUnknown { code }| code)
    }

    /// Returns the raw status word
    #[inline(always)]
    pub fn retcode(&self) -> u16 {
        self.retcode
    }
}

/// Status words a Ledger device may answer with
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum APDUErrorCode {
    /// success
    NoError = 0x9000,
    /// device is locked (PIN screen)
    DeviceLocked = 0x5515,
    /// user refused the action on the dashboard (e.g. opening an app)
    UserRefusedOnDevice = 0x5501,
    /// no application opened, the dashboard answered
    AppNotOpen = 0x6511,
    /// error during apdu execution
    ExecutionError = 0x6400,
    /// apdu command wrong length
    WrongLength = 0x6700,
    /// requested application is not installed
    AppNotInstalled = 0x6807,
    /// security status not satisfied (older firmware reports a locked device this way)
    SecurityStatusNotSatisfied = 0x6982,
    /// output buffer too small
    OutputBufferTooSmall = 0x6983,
    /// data invalid
    DataInvalid = 0x6984,
    /// conditions not satisfied, the user denied the request
    ConditionsNotSatisfied = 0x6985,
    /// command not allowed
    CommandNotAllowed = 0x6986,
    /// invalid data (blind signing disabled, malformed payload)
    BadKeyHandle = 0x6A80,
    /// invalid P1/P2
    InvalidP1P2 = 0x6B00,
    /// instruction not supported by the running app
    InsNotSupported = 0x6D00,
    /// class not supported by the running app
    ClaNotSupported = 0x6E00,
    /// unknown
    Unknown = 0x6F00,
    /// sign/verify error
    SignVerifyError = 0x6F01,
}

#[cfg(feature = "std")]
impl APDUErrorCode {
    /// Quick-hand to retrieve the error code's description
    pub fn description(&self) -> std::string::String {
        let text = match self {
            APDUErrorCode::NoError => "[APDU_CODE_NOERROR]",
            APDUErrorCode::DeviceLocked => "[APDU_CODE_DEVICE_LOCKED] Device is locked",
            APDUErrorCode::UserRefusedOnDevice => {
                "[APDU_CODE_USER_REFUSED] Action refused on device"
            }
            APDUErrorCode::AppNotOpen => "[APDU_CODE_APP_NOT_OPEN] No application opened",
            APDUErrorCode::ExecutionError => {
                "[APDU_CODE_EXECUTION_ERROR] No information given (NV-Ram not changed)"
            }
            APDUErrorCode::WrongLength => "[APDU_CODE_WRONG_LENGTH] Wrong length",
            APDUErrorCode::AppNotInstalled => {
                "[APDU_CODE_APP_NOT_INSTALLED] Application not installed"
            }
            APDUErrorCode::SecurityStatusNotSatisfied => {
                "[APDU_CODE_SECURITY_STATUS] Security status not satisfied"
            }
            APDUErrorCode::OutputBufferTooSmall => "[APDU_CODE_OUTPUT_BUFFER_TOO_SMALL]",
            APDUErrorCode::DataInvalid => "[APDU_CODE_DATA_INVALID] data reversibly blocked",
            APDUErrorCode::ConditionsNotSatisfied => {
                "[APDU_CODE_CONDITIONS_NOT_SATISFIED] Conditions of use not satisfied"
            }
            APDUErrorCode::CommandNotAllowed => {
                "[APDU_CODE_COMMAND_NOT_ALLOWED] Command not allowed (no current EF)"
            }
            APDUErrorCode::BadKeyHandle => {
                "[APDU_CODE_BAD_KEY_HANDLE] The parameters in the data field are incorrect"
            }
            APDUErrorCode::InvalidP1P2 => "[APDU_CODE_INVALIDP1P2] Wrong parameter(s) P1-P2",
            APDUErrorCode::InsNotSupported => {
                "[APDU_CODE_INS_NOT_SUPPORTED] Instruction code not supported or invalid"
            }
            APDUErrorCode::ClaNotSupported => "[APDU_CODE_CLA_NOT_SUPPORTED] Class not supported",
            APDUErrorCode::Unknown => "[APDU_CODE_UNKNOWN]",
            APDUErrorCode::SignVerifyError => "[APDU_CODE_SIGN_VERIFY_ERROR]",
        };
        std::string::String::from(text)
    }
}

/// Status word not recognized as an [`APDUErrorCode`]
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(display("unknown status word {code:#06x}"))]
pub struct ErrorCodeUnknown {
    /// The raw status word
    pub code: u16,
}

impl TryFrom<u16> for APDUErrorCode {
    type Error = ErrorCodeUnknown;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        let this = match code {
            0x9000 => Self::NoError,
            0x5515 => Self::DeviceLocked,
            0x5501 => Self::UserRefusedOnDevice,
            0x6511 => Self::AppNotOpen,
            0x6400 => Self::ExecutionError,
            0x6700 => Self::WrongLength,
            0x6807 => Self::AppNotInstalled,
            0x6982 => Self::SecurityStatusNotSatisfied,
            0x6983 => Self::OutputBufferTooSmall,
            0x6984 => Self::DataInvalid,
            0x6985 => Self::ConditionsNotSatisfied,
            0x6986 => Self::CommandNotAllowed,
            0x6A80 => Self::BadKeyHandle,
            0x6B00 => Self::InvalidP1P2,
            0x6D00 => Self::InsNotSupported,
            0x6E00 => Self::ClaNotSupported,
            0x6F00 => Self::Unknown,
            0x6F01 => Self::SignVerifyError,
            _ => return ErrorCodeUnknownSnafu { code }.fail(),
        };

        Ok(this)
    }
}
