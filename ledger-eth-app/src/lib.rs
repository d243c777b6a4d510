// SPDX-License-Identifier: Apache-2.0

//! Ledger Ethereum Application SDK
//!
//! The subset of the Ethereum application's APDU set needed to authenticate a user:
//!
//! - **Addresses**: derive (and optionally display) the address for a BIP32 path
//! - **Personal messages**: chunked `personal_sign` over any message length
//! - **Typed data**: EIP-712 in hashed mode, with host-side hashing of the JSON payload
//!
//! Commands are traits implemented by [`EthApp`] over any [`ledger_transport::Exchange`].

use ledger_device_base::App;

pub mod commands;
pub mod eip712;
pub mod errors;
pub mod instructions;
pub mod types;
pub mod utils;

pub use commands::*;
pub use eip712::{TypedData, TypedDataError};
pub use errors::*;
pub use types::*;

/// Ethereum app marker implementing `App` trait CLA.
#[derive(Debug, Clone)]
pub struct EthApp;

impl App for EthApp {
    /// CLA for Ethereum app on Ledger (0xE0)
    const CLA: u8 = 0xE0;
    const NAME: &'static str = "Ethereum";
}
