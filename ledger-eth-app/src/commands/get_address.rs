// SPDX-License-Identifier: Apache-2.0

//! GET ETH PUBLIC ADDRESS

use async_trait::async_trait;
use ledger_device_base::{App, AppExt};
use ledger_transport::{APDUCommand, Exchange};

use crate::errors::{map_ledger_error, EthAppError, EthAppResult};
use crate::instructions::{ins, length, p1_get_address, p2_get_address};
use crate::types::{EthAddress, GetAddressParams, PublicKeyInfo};
use crate::utils::{encode_bip32_path, validate_bip32_path, ResponseReader};
use crate::EthApp;

#[async_trait]
pub trait GetAddress<E>
where
    E: Exchange + Send + Sync,
    E::Error: std::error::Error,
{
    /// Derive the address at `params.path`, optionally confirming it on screen
    async fn get_address(
        transport: &E,
        params: GetAddressParams,
    ) -> EthAppResult<PublicKeyInfo, E::Error>;
}

#[async_trait]
impl<E> GetAddress<E> for EthApp
where
    E: Exchange + Send + Sync,
    E::Error: std::error::Error,
{
    async fn get_address(
        transport: &E,
        params: GetAddressParams,
    ) -> EthAppResult<PublicKeyInfo, E::Error> {
        validate_bip32_path(&params.path)?;

        let mut data = encode_bip32_path(&params.path);
        if let Some(chain_id) = params.chain_id {
            data.extend_from_slice(&chain_id.to_be_bytes());
        }

        let command = APDUCommand {
            cla: Self::CLA,
            ins: ins::GET_ETH_PUBLIC_ADDRESS,
            p1: if params.display {
                p1_get_address::DISPLAY_AND_CONFIRM
            } else {
                p1_get_address::RETURN_ADDRESS
            },
            p2: if params.return_chain_code {
                p2_get_address::RETURN_CHAIN_CODE
            } else {
                p2_get_address::NO_CHAIN_CODE
            },
            data,
        };

        let response = transport
            .exchange(&command)
            .await
            .map_err(|e| EthAppError::Transport(e.into()))?;

        // 0x6985 when the user rejects the address on screen
        <EthApp as AppExt<E>>::handle_response_error(&response).map_err(map_ledger_error)?;

        parse_response(response.data(), params.return_chain_code)
    }
}

/// `pk_len || pk || addr_len || ascii addr [|| chain code]`
fn parse_response<E: std::error::Error>(
    data: &[u8],
    with_chain_code: bool,
) -> EthAppResult<PublicKeyInfo, E> {
    let mut reader = ResponseReader::new(data);

    let public_key = reader.length_prefixed::<E>("public key")?;
    if public_key.len() != 65 {
        return Err(EthAppError::InvalidResponseData(format!(
            "Invalid public key length: {} (expected 65)",
            public_key.len()
        )));
    }

    let address = EthAddress::from_ascii(reader.length_prefixed::<E>("address")?)
        .map_err(EthAppError::InvalidAddress)?;

    let chain_code = if with_chain_code && reader.remaining() > 0 {
        Some(reader.fixed::<E>(length::CHAIN_CODE_SIZE, "chain code")?.to_vec())
    } else {
        None
    };

    Ok(PublicKeyInfo {
        public_key: public_key.to_vec(),
        address,
        chain_code,
    })
}
