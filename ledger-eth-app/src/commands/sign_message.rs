// SPDX-License-Identifier: Apache-2.0

//! SIGN ETH PERSONAL MESSAGE command implementation

use async_trait::async_trait;
use ledger_device_base::{App, AppExt};
use ledger_transport::{APDUCommand, Exchange};

use crate::errors::{map_ledger_error, EthAppError, EthAppResult};
use crate::instructions::{ins, length, p1_sign_message};
use crate::types::{SignMessageParams, Signature};
use crate::utils::{encode_bip32_path, validate_bip32_path};
use crate::EthApp;

#[async_trait]
pub trait SignPersonalMessage<E>
where
    E: Exchange + Send + Sync,
    E::Error: std::error::Error,
{
    /// Sign an Ethereum personal message using the given BIP 32 path
    async fn sign_personal_message(
        transport: &E,
        params: SignMessageParams,
    ) -> EthAppResult<Signature, E::Error>;
}

#[async_trait]
impl<E> SignPersonalMessage<E> for EthApp
where
    E: Exchange + Send + Sync,
    E::Error: std::error::Error,
{
    async fn sign_personal_message(
        transport: &E,
        params: SignMessageParams,
    ) -> EthAppResult<Signature, E::Error> {
        validate_bip32_path(&params.path)?;

        if params.message.is_empty() {
            return Err(EthAppError::InvalidMessage(
                "Message cannot be empty".to_string(),
            ));
        }

        let chunks = message_chunks::<E::Error>(&params)?;
        let last = chunks.len() - 1;

        let mut signature = None;
        for (idx, chunk) in chunks.into_iter().enumerate() {
            let command = APDUCommand {
                cla: Self::CLA,
                ins: ins::SIGN_ETH_PERSONAL_MESSAGE,
                p1: if idx == 0 {
                    p1_sign_message::FIRST_DATA_BLOCK
                } else {
                    p1_sign_message::SUBSEQUENT_DATA_BLOCK
                },
                p2: 0x00,
                data: chunk,
            };

            let response = transport
                .exchange(&command)
                .await
                .map_err(|e| EthAppError::Transport(e.into()))?;

            if idx == last {
                <EthApp as AppExt<E>>::handle_response_error_signature(&response)
                    .map_err(map_ledger_error)?;
                signature = Some(
                    Signature::from_response(response.data())
                        .map_err(EthAppError::InvalidSignature)?,
                );
            } else {
                <EthApp as AppExt<E>>::handle_response_error(&response)
                    .map_err(map_ledger_error)?;
            }
        }

        signature.ok_or_else(|| EthAppError::InvalidResponseData("no chunk sent".to_string()))
    }
}

/// Split a personal message into APDU payloads.
///
/// The first payload carries the path and the total message length (u32 BE)
/// ahead of the message bytes.
fn message_chunks<E: std::error::Error>(params: &SignMessageParams) -> EthAppResult<Vec<Vec<u8>>, E> {
    let path_data = encode_bip32_path(&params.path);
    let first_chunk_overhead = path_data.len() + 4;

    if first_chunk_overhead >= length::MAX_MESSAGE_CHUNK_SIZE {
        return Err(EthAppError::InvalidBip32Path(
            "BIP32 path too long for message signing".to_string(),
        ));
    }
    let message_len = u32::try_from(params.message.len())
        .map_err(|_| EthAppError::InvalidMessage("Message too long".to_string()))?;

    let first_room = length::MAX_MESSAGE_CHUNK_SIZE - first_chunk_overhead;
    let split = params.message.len().min(first_room);
    let (head, tail) = params.message.split_at(split);

    let mut first = Vec::with_capacity(first_chunk_overhead + head.len());
    first.extend_from_slice(&path_data);
    first.extend_from_slice(&message_len.to_be_bytes());
    first.extend_from_slice(head);

    let mut chunks = vec![first];
    chunks.extend(
        tail.chunks(length::MAX_MESSAGE_CHUNK_SIZE)
            .map(<[u8]>::to_vec),
    );
    Ok(chunks)
}
