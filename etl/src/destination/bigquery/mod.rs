mod client;
mod core;
mod encoding;

use std::sync::Once;

pub use client::BigQueryClient;
pub use core::{BigQueryCredentials, BigQueryDestination};

/// Ensures the crypto provider is only installed once.
static INIT_CRYPTO: Once = Once::new();

/// Installs the AWS LC crypto provider as the process default for rustls.
///
/// Feature unification can enable several rustls providers, in which case rustls refuses to
/// pick one on its own. A provider installed earlier by the host process is kept.
pub fn install_crypto_provider() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}
