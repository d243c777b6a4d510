// SPDX-License-Identifier: Apache-2.0

mod common;

use std::time::Duration;

use common::{address_reply, app_info, authenticator, signature_reply};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use ledger_eth_app::TypedData;
use ledger_transport::mock::MockReply;
use wallet_auth::verifier::address_of;
use wallet_auth::{ErrorCategory, LocalKeyWallet, UserInteraction};

const SECRET: [u8; 32] = [0x5a; 32];

fn login(nonce: u64) -> TypedData {
    TypedData::from_json(&format!(
        r#"{{
            "types": {{
                "EIP712Domain": [
                    {{ "name": "name", "type": "string" }},
                    {{ "name": "version", "type": "string" }},
                    {{ "name": "chainId", "type": "uint256" }}
                ],
                "Login": [
                    {{ "name": "contents", "type": "string" }},
                    {{ "name": "nonce", "type": "uint256" }}
                ]
            }},
            "primaryType": "Login",
            "domain": {{ "name": "Pay-Peer-Roll", "version": "1", "chainId": 1 }},
            "message": {{ "contents": "Welcome to Pay-Peer-Roll App", "nonce": {} }}
        }}"#,
        nonce
    ))
    .unwrap()
}

/// `0x` r || s || v signature over the typed-data digest, as the device would produce it
fn device_signature(key: &SigningKey, typed: &TypedData) -> String {
    let digest = typed.signing_hash().unwrap();
    let (signature, recovery_id) = key.sign_prehash_recoverable(&digest).unwrap();
    let mut bytes = signature.to_bytes().to_vec();
    bytes.push(27 + recovery_id.to_byte());
    format!("0x{}", hex::encode(bytes))
}

fn recover(typed: &TypedData, signature: &str) -> String {
    let bytes = hex::decode(signature.trim_start_matches("0x")).unwrap();
    let sig = Signature::from_slice(&bytes[..64]).unwrap();
    let recovery_id = k256::ecdsa::RecoveryId::from_byte(bytes[64] - 27).unwrap();
    let key =
        VerifyingKey::recover_from_prehash(&typed.signing_hash().unwrap(), &sig, recovery_id)
            .unwrap();
    address_of(&key)
}

#[tokio::test(start_paused = true)]
async fn hardware_signs_typed_data() {
    let key = SigningKey::from_slice(&SECRET).unwrap();
    let address = LocalKeyWallet::from_bytes(&SECRET).unwrap().address();
    let typed = login(7);
    let expected = device_signature(&key, &typed);

    let (auth, _) = authenticator(vec![
        app_info("Ethereum"),
        address_reply(&address),
        app_info("Ethereum"),
        signature_reply(&expected),
    ]);
    let connection = auth.connect_hardware_device(|_| {}).await.unwrap();
    let transport = auth.sessions().current().await.unwrap().transport().clone();

    let mut interactions = Vec::new();
    let signature = auth
        .sign_typed_data(&connection.handle(), typed.clone(), |update| {
            interactions.push(update.required_interaction)
        })
        .await
        .unwrap();

    assert_eq!(interactions, vec![Some(UserInteraction::SignTypedData)]);
    assert_eq!(signature, expected);
    assert_eq!(signature.len(), 2 + 130);
    assert!(signature[2..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    assert_eq!(recover(&typed, &signature), address.to_lowercase());

    // a personal-message check must not accept a typed-data signature
    assert!(!auth.verify("Welcome to Pay-Peer-Roll App", &signature, &address));

    let sent = transport.sent();
    let command = sent.last().unwrap();
    assert_eq!(&command[..2], &[0xe0, 0x0c]);
    assert_eq!(&command[26..58], &typed.domain_separator().unwrap());
    assert_eq!(&command[58..90], &typed.message_hash().unwrap());
    assert!(auth.sessions().is_active(&connection.session_id).await);
}

#[tokio::test(start_paused = true)]
async fn typed_data_waits_longer_than_a_message() {
    let address = LocalKeyWallet::from_bytes(&SECRET).unwrap().address();
    let mut replies = vec![app_info("Ethereum"), address_reply(&address)];
    replies.extend((0..1_000).map(|_| MockReply::status(0x5515)));
    let (auth, _) = authenticator(replies);
    let connection = auth.connect_hardware_device(|_| {}).await.unwrap();

    let started = tokio::time::Instant::now();
    let err = auth
        .sign_typed_data(&connection.handle(), login(1), |_| {})
        .await
        .unwrap_err();

    assert_eq!(err.category, ErrorCategory::Timeout);
    assert!(started.elapsed() >= Duration::from_secs(180));
    assert!(started.elapsed() < Duration::from_secs(182));
}
