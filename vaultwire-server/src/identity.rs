//! Server identity key on disk.
//!
//! PKCS#1 PEM. Created on first start, reused afterwards so clients can pin
//! the fingerprint.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use tracing::info;
use vaultwire_core::KeyPair;
use zeroize::Zeroizing;

use crate::error::ServerError;

/// Load the keypair at `path`, or generate one of `bits` bits and save it there.
///
/// # Errors
///
/// `KeyFile` if the file exists but does not parse, `Key` if generation
/// fails, `Io` on filesystem errors.
pub fn load_or_create(path: &Path, bits: usize) -> Result<KeyPair, ServerError> {
    if path.exists() {
        let pem = Zeroizing::new(std::fs::read_to_string(path)?);
        let keypair =
            KeyPair::from_pem(&pem).map_err(|_| ServerError::KeyFile(path.to_path_buf()))?;
        info!(path = %path.display(), "loaded identity key");
        return Ok(keypair);
    }

    let keypair = KeyPair::generate(bits)?;
    let pem = keypair.to_pem()?;

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(pem.as_bytes())?;
    file.sync_all()?;

    info!(path = %path.display(), bits, "generated identity key");
    Ok(keypair)
}
