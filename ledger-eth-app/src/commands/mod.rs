// SPDX-License-Identifier: Apache-2.0

//! Command implementations for Ethereum application

pub mod get_address;
pub mod sign_eip712;
pub mod sign_message;

pub use get_address::*;
pub use sign_eip712::*;
pub use sign_message::*;
