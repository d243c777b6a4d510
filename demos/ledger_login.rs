// SPDX-License-Identifier: Apache-2.0

//! Sign in with a Ledger device
//!
//! Connects over USB, reads the account address, has the device sign the welcome
//! message and stores the verified sign-in under `./.wallet-auth` (or the
//! directory given as the first argument).

use std::error::Error;

use wallet_auth::{AuthConfig, Authenticator, FileStorage, StatusUpdate};

fn print_status(update: StatusUpdate) {
    match update.required_interaction {
        Some(_) => println!("👉 {}", update.message),
        None => println!("⏳ {}", update.message),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| ".wallet-auth".to_string());
    let auth = Authenticator::with_hid(AuthConfig::default(), FileStorage::new(&dir)?);

    let status = auth.check_stored_authentication();
    if status.is_authenticated {
        println!(
            "✅ Already signed in as {} until {}",
            status.address.unwrap_or_default(),
            status
                .expires_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default()
        );
        return Ok(());
    }

    println!("🔌 Connecting to Ledger device...");
    let connection = match auth.connect_hardware_device(print_status).await {
        Ok(connection) => connection,
        Err(e) => {
            eprintln!("❌ {}", e.message);
            eprintln!("   {}", e.category.guidance());
            return Ok(());
        }
    };
    println!("✅ Address: {}", connection.address);

    println!("\n✍️  Signing the welcome message...");
    match auth.sign_in(&connection.handle(), print_status).await {
        Ok(stored) => {
            println!("✅ Signed in");
            println!("  Message:   {}", stored.message);
            println!("  Signature: {}", stored.signature);
        }
        Err(e) => {
            eprintln!("❌ {}", e.message);
            eprintln!("   {}", e.category.guidance());
        }
    }

    auth.disconnect().await;
    Ok(())
}
