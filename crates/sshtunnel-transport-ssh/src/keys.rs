//! Private key loading

use russh::keys::{load_secret_key, PrivateKey};
use sshtunnel_transport::{TransportError, TransportResult};
use std::path::Path;
use std::sync::Arc;

/// Load an unencrypted private key in any format russh understands.
pub fn load_identity(path: &Path) -> TransportResult<Arc<PrivateKey>> {
    load_secret_key(path, None)
        .map(Arc::new)
        .map_err(|e| TransportError::Credential {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}
