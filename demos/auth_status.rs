// SPDX-License-Identifier: Apache-2.0

//! Show or clear the stored sign-in
//!
//! Usage: `auth_status [--logout] [dir]`

use std::error::Error;

use wallet_auth::{AuthConfig, Authenticator, FileStorage};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut logout = false;
    let mut dir = ".wallet-auth".to_string();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--logout" => logout = true,
            other => dir = other.to_string(),
        }
    }

    let auth = Authenticator::with_hid(AuthConfig::default(), FileStorage::new(&dir)?);

    if logout {
        auth.clear_stored_authentication().await?;
        println!("👋 Signed out");
        return Ok(());
    }

    let status = auth.check_stored_authentication();
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
