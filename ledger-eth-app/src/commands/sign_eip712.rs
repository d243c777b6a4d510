// SPDX-License-Identifier: Apache-2.0

//! SIGN ETH EIP 712 command implementation (hashed mode)

use async_trait::async_trait;
use ledger_device_base::{App, AppExt};
use ledger_transport::{APDUCommand, Exchange};

use crate::eip712::TypedData;
use crate::errors::{map_ledger_error, EthAppError, EthAppResult};
use crate::instructions::{ins, length, p1_sign_eip712, p2_sign_eip712};
use crate::types::{BipPath, SignEip712Params, Signature};
use crate::utils::{encode_bip32_path, validate_bip32_path};
use crate::EthApp;

#[async_trait]
pub trait SignEip712<E>
where
    E: Exchange + Send + Sync,
    E::Error: std::error::Error,
{
    /// Sign a precomputed domain separator and message hash
    async fn sign_eip712_hashed(
        transport: &E,
        params: SignEip712Params,
    ) -> EthAppResult<Signature, E::Error>;

    /// Hash `typed_data` on the host, then sign it in hashed mode
    async fn sign_typed_data(
        transport: &E,
        path: BipPath,
        typed_data: &TypedData,
    ) -> EthAppResult<Signature, E::Error> {
        let domain_hash = typed_data
            .domain_separator()
            .map_err(|e| EthAppError::InvalidEip712Data(e.to_string()))?;
        let message_hash = typed_data
            .message_hash()
            .map_err(|e| EthAppError::InvalidEip712Data(e.to_string()))?;

        Self::sign_eip712_hashed(
            transport,
            SignEip712Params::new(path, domain_hash, message_hash),
        )
        .await
    }
}

#[async_trait]
impl<E> SignEip712<E> for EthApp
where
    E: Exchange + Send + Sync,
    E::Error: std::error::Error,
{
    async fn sign_eip712_hashed(
        transport: &E,
        params: SignEip712Params,
    ) -> EthAppResult<Signature, E::Error> {
        validate_bip32_path(&params.path)?;

        let path_data = encode_bip32_path(&params.path);
        let mut data = Vec::with_capacity(
            path_data.len() + length::EIP712_DOMAIN_HASH_SIZE + length::EIP712_MESSAGE_HASH_SIZE,
        );
        data.extend_from_slice(&path_data);
        data.extend_from_slice(&params.domain_hash);
        data.extend_from_slice(&params.message_hash);

        let command = APDUCommand {
            cla: Self::CLA,
            ins: ins::SIGN_ETH_EIP712,
            p1: p1_sign_eip712::FIRST_CHUNK,
            p2: p2_sign_eip712::V0_IMPLEMENTATION,
            data,
        };

        let response = transport
            .exchange(&command)
            .await
            .map_err(|e| EthAppError::Transport(e.into()))?;

        <EthApp as AppExt<E>>::handle_response_error_signature(&response)
            .map_err(map_ledger_error)?;

        Signature::from_response(response.data()).map_err(EthAppError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_transport::mock::{MockReply, MockTransport};

    fn signature_reply() -> MockReply {
        let mut data = vec![0x1c];
        data.extend([0x01; 32]);
        data.extend([0x02; 32]);
        MockReply::ok(data)
    }

    #[tokio::test]
    async fn sends_path_and_both_hashes() {
        let transport = MockTransport::new([signature_reply()]);
        let params = SignEip712Params::new(BipPath::default(), [0xAA; 32], [0xBB; 32]);

        let signature = EthApp::sign_eip712_hashed(&transport, params).await.unwrap();
        assert_eq!(signature.v, 0x1c);

        let sent = &transport.sent()[0];
        assert_eq!(&sent[..4], &[0xE0, 0x0C, 0x00, 0x00]);
        assert_eq!(sent[4] as usize, 21 + 64);
        assert_eq!(sent[5], 5);
        assert_eq!(&sent[26..58], &[0xAA; 32]);
        assert_eq!(&sent[58..90], &[0xBB; 32]);
    }

    #[tokio::test]
    async fn refusal_is_user_rejected() {
        let transport = MockTransport::new([MockReply::status(0x6985)]);
        let params = SignEip712Params::new(BipPath::default(), [0; 32], [0; 32]);

        let err = EthApp::sign_eip712_hashed(&transport, params)
            .await
            .unwrap_err();
        assert!(err.is_user_rejected());
    }

    #[tokio::test]
    async fn typed_data_errors_never_reach_the_device() {
        let transport = MockTransport::default();
        let typed: TypedData = serde_json::from_value(serde_json::json!({
            "types": { "Login": [{ "name": "nonce", "type": "uint256" }] },
            "primaryType": "Login",
            "domain": { "name": "x" },
            "message": {}
        }))
        .unwrap();

        let err = EthApp::sign_typed_data(&transport, BipPath::default(), &typed)
            .await
            .unwrap_err();
        assert!(matches!(err, EthAppError::InvalidEip712Data(_)));
        assert!(transport.sent().is_empty());
    }
}
