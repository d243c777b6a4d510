// SPDX-License-Identifier: Apache-2.0

//! Sign EIP-712 typed data on a Ledger device
//!
//! The device shows the domain and message hashes; the Ethereum app may require
//! blind signing to be enabled in its settings.

use std::error::Error;

use ledger_eth_app::TypedData;
use wallet_auth::{AuthConfig, Authenticator, MemoryStorage};

const MAIL: &str = r#"{
  "types": {
    "EIP712Domain": [
      { "name": "name", "type": "string" },
      { "name": "version", "type": "string" },
      { "name": "chainId", "type": "uint256" },
      { "name": "verifyingContract", "type": "address" }
    ],
    "Person": [
      { "name": "name", "type": "string" },
      { "name": "wallet", "type": "address" }
    ],
    "Mail": [
      { "name": "from", "type": "Person" },
      { "name": "to", "type": "Person" },
      { "name": "contents", "type": "string" }
    ]
  },
  "primaryType": "Mail",
  "domain": {
    "name": "Ether Mail",
    "version": "1",
    "chainId": 1,
    "verifyingContract": "0xCcCCccccCCCCcCCCCCCcCcCccCcCCCcCcccccccC"
  },
  "message": {
    "from": { "name": "Cow", "wallet": "0xCD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826" },
    "to": { "name": "Bob", "wallet": "0xbBbBBBBbbBBBbbbBbbBbbbbBBbBbbbbBbBbbBBbB" },
    "contents": "Hello, Bob!"
  }
}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let typed_data = TypedData::from_json(MAIL)?;
    println!("📋 Domain separator: 0x{}", hex(&typed_data.domain_separator()?));
    println!("📋 Message hash:     0x{}", hex(&typed_data.message_hash()?));

    let auth = Authenticator::with_hid(AuthConfig::default(), MemoryStorage::new());

    println!("🔌 Connecting to Ledger device...");
    let connection = auth
        .connect_hardware_device(|update| println!("⏳ {}", update.message))
        .await?;
    println!("✅ Address: {}", connection.address);

    match auth
        .sign_typed_data(&connection.handle(), typed_data, |update| {
            println!("👉 {}", update.message)
        })
        .await
    {
        Ok(signature) => println!("✅ Signature: {}", signature),
        Err(e) => {
            eprintln!("❌ {}", e.message);
            eprintln!("   {}", e.category.guidance());
        }
    }

    auth.disconnect().await;
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
