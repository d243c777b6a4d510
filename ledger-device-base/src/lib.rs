mod errors;
use std::str;

use async_trait::async_trait;
pub use errors::*;
use ledger_transport::{APDUAnswer, APDUCommand, APDUErrorCode, Exchange};
use serde::{Deserialize, Serialize};

// Ledger generic (non app-specific) APDU constants
const CLA_APP_INFO: u8 = 0xb0;
const INS_APP_INFO: u8 = 0x01;
const INS_QUIT_APP: u8 = 0xa7;
const CLA_DASHBOARD: u8 = 0xe0;
const INS_OPEN_APP: u8 = 0xd8;

/// Name the dashboard reports when no application is running
pub const DASHBOARD_APP_NAME: &str = "BOLOS";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
/// App Information
pub struct AppInfo {
    /// Name of the application
    #[serde(rename(serialize = "appName"))]
    pub app_name: String,
    /// App version
    #[serde(rename(serialize = "appVersion"))]
    pub app_version: String,
    /// Flag length
    #[serde(rename(serialize = "flagLen"))]
    pub flag_len: u8,
    /// Flag value
    #[serde(rename(serialize = "flagsValue"))]
    pub flags_value: u8,
    /// Flag Recovery
    #[serde(rename(serialize = "flagsRecovery"))]
    pub flag_recovery: bool,
    /// Flag Signed MCU code
    #[serde(rename(serialize = "flagsSignedMCUCode"))]
    pub flag_signed_mcu_code: bool,
    /// Flag Onboarded
    #[serde(rename(serialize = "flagsOnboarded"))]
    pub flag_onboarded: bool,
    /// Flag Pin Validated
    #[serde(rename(serialize = "flagsPINValidated"))]
    pub flag_pin_validated: bool,
}

impl AppInfo {
    /// True when the device sits on its dashboard rather than inside an app
    pub fn is_dashboard(&self) -> bool {
        self.app_name == DASHBOARD_APP_NAME
    }
}

/// Defines what we can consider an "App"
pub trait App {
    /// App's APDU CLA
    const CLA: u8;
    /// Name under which the app is installed on the device
    const NAME: &'static str;
}

#[async_trait]
pub trait AppExt<E>: App
where
    E: Exchange + Send + Sync,
    E::Error: std::error::Error,
{
    /// Check APDU status word. Ok on 0x9000, otherwise map to SDK errors.
    fn handle_response_error(
        response: &APDUAnswer<E::AnswerType>,
    ) -> Result<(), LedgerAppError<E::Error>> {
        match response.error_code() {
            Ok(APDUErrorCode::NoError) => Ok(()),
            Ok(err) => Err(LedgerAppError::AppSpecific(err as _, err.description())),
            Err(err) => Err(LedgerAppError::Unknown(err)),
        }
    }

    /// Same as `handle_response_error`, but also requires non-empty payload (signature).
    fn handle_response_error_signature(
        response: &APDUAnswer<E::AnswerType>,
    ) -> Result<(), LedgerAppError<E::Error>> {
        match response.error_code() {
            Ok(APDUErrorCode::NoError) if response.data().is_empty() => {
                Err(LedgerAppError::NoSignature)
            }
            _ => Self::handle_response_error(response),
        }
    }

    /// Query current app info (name, version, flags) from the device.
    ///
    /// Works from the dashboard too, in which case the name is [`DASHBOARD_APP_NAME`].
    async fn get_app_info(transport: &E) -> Result<AppInfo, LedgerAppError<E::Error>> {
        let command = APDUCommand {
            cla: CLA_APP_INFO,
            ins: INS_APP_INFO,
            p1: 0x00,
            p2: 0x00,
            data: Vec::new(),
        };

        let response = transport.exchange(&command).await?;
        Self::handle_response_error(&response)?;

        parse_app_info(response.data())
    }

    /// Ask the dashboard to launch this app. The user has to confirm on the device.
    async fn open_app(transport: &E) -> Result<(), LedgerAppError<E::Error>> {
        let name = Self::NAME.as_bytes();
        if name.is_empty() || name.len() > u8::MAX as usize {
            return Err(LedgerAppError::InvalidAppName(Self::NAME.to_string()));
        }

        let command = APDUCommand {
            cla: CLA_DASHBOARD,
            ins: INS_OPEN_APP,
            p1: 0x00,
            p2: 0x00,
            data: name.to_vec(),
        };

        let response = transport.exchange(&command).await?;
        Self::handle_response_error(&response)
    }

    /// Leave whatever app is running and go back to the dashboard
    async fn quit_app(transport: &E) -> Result<(), LedgerAppError<E::Error>> {
        let command = APDUCommand {
            cla: CLA_APP_INFO,
            ins: INS_QUIT_APP,
            p1: 0x00,
            p2: 0x00,
            data: Vec::new(),
        };

        let response = transport.exchange(&command).await?;
        Self::handle_response_error(&response)
    }
}

impl<T, E> AppExt<E> for T
where
    T: App,
    E: Exchange + Send + Sync,
    E::Error: std::error::Error,
{
}

fn take<'a, E: std::error::Error>(
    data: &'a [u8],
    idx: &mut usize,
    len: usize,
) -> Result<&'a [u8], LedgerAppError<E>> {
    let chunk = data
        .get(*idx..*idx + len)
        .ok_or(LedgerAppError::InvalidFormatID)?;
    *idx += len;
    Ok(chunk)
}

/// Parse the BOLOS app-info payload: format id, name, version, flags
fn parse_app_info<E: std::error::Error>(data: &[u8]) -> Result<AppInfo, LedgerAppError<E>> {
    let mut idx = 0;

    if take::<E>(data, &mut idx, 1)?[0] != 1 {
        return Err(LedgerAppError::InvalidFormatID);
    }

    let app_name_len = take::<E>(data, &mut idx, 1)?[0] as usize;
    let app_name =
        str::from_utf8(take::<E>(data, &mut idx, app_name_len)?).map_err(|_e| LedgerAppError::Utf8)?;

    let app_version_len = take::<E>(data, &mut idx, 1)?[0] as usize;
    let app_version = str::from_utf8(take::<E>(data, &mut idx, app_version_len)?)
        .map_err(|_e| LedgerAppError::Utf8)?;

    // Some firmware versions omit the flags
    let (flag_len, flags_value) = match data.get(idx) {
        Some(&len) => {
            idx += 1;
            let value = if len > 0 { take::<E>(data, &mut idx, 1)?[0] } else { 0 };
            (len, value)
        }
        None => (0, 0),
    };

    Ok(AppInfo {
        app_name: app_name.to_string(),
        app_version: app_version.to_string(),
        flag_len,
        flags_value,
        flag_recovery: (flags_value & 1) != 0,
        flag_signed_mcu_code: (flags_value & 2) != 0,
        flag_onboarded: (flags_value & 4) != 0,
        flag_pin_validated: (flags_value & 128) != 0,
    })
}
