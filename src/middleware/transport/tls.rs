//! TLS material for broker sockets
//!
//! CA certificate is mandatory, client certificate + key are optional but
//! must come together. Files are PEM. Everything is read and checked once,
//! when the configuration is built. An `ENCRYPTED PRIVATE KEY` (PKCS#8,
//! PBES2) is decrypted with `key_password` and kept as a plain PKCS#8 PEM.

use std::fmt;
use std::fs;
use std::io::BufReader;
use std::path::Path;
use pkcs8::der::Document;
use pkcs8::{EncryptedPrivateKeyInfo, LineEnding};
use rumqttc::TlsConfiguration;

use crate::config::TlsFiles;
use crate::error::ConfigError;

const ENCRYPTED_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";
const KEY_LABEL: &str = "PRIVATE KEY";
const LEGACY_ENCRYPTION_HEADER: &str = "Proc-Type: 4,ENCRYPTED";

#[derive(Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    ca: Vec<u8>,
    client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterial {
    pub fn has_client_auth(&self) -> bool {
        self.client_auth.is_some()
    }

    pub fn to_configuration(&self) -> TlsConfiguration {
        TlsConfiguration::Simple {
            ca: self.ca.clone(),
            alpn: None,
            client_auth: self.client_auth.clone(),
        }
    }
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_bytes", &self.ca.len())
            .field("client_auth", &self.client_auth.is_some())
            .finish()
    }
}

pub fn load(files: &TlsFiles) -> Result<TlsMaterial, ConfigError> {
    tracing::debug!(
        "[Tls] Loading CA {:?}, client cert {:?}, client key {:?}",
        files.ca_cert_file, files.client_cert_file, files.client_key_file
    );

    let ca = read_pem(&files.ca_cert_file)?;
    ensure_certificates(&ca, &files.ca_cert_file)?;

    let client_auth = match (&files.client_cert_file, &files.client_key_file) {
        (Some(cert_path), Some(key_path)) => {
            let cert = read_pem(cert_path)?;
            ensure_certificates(&cert, cert_path)?;
            let key = read_pem(key_path)?;
            let key = load_private_key(key, key_path, files.key_password.as_deref())?;
            Some((cert, key))
        }
        (None, None) => None,
        _ => {
            return Err(ConfigError::InvalidTls(
                "client_cert_file and client_key_file must be given together".to_string(),
            ))
        }
    };

    Ok(TlsMaterial { ca, client_auth })
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ConfigError> {
    fs::read(path).map_err(|e| ConfigError::InvalidTls(format!("cannot read {}: {}", path.display(), e)))
}

fn ensure_certificates(pem: &[u8], path: &Path) -> Result<(), ConfigError> {
    let mut reader = BufReader::new(pem);
    let mut found = 0;
    for cert in rustls_pemfile::certs(&mut reader) {
        cert.map_err(|e| ConfigError::InvalidTls(format!("{}: {}", path.display(), e)))?;
        found += 1;
    }
    if found == 0 {
        return Err(ConfigError::InvalidTls(format!("{}: no PEM certificate found", path.display())));
    }
    Ok(())
}

fn load_private_key(pem: Vec<u8>, path: &Path, password: Option<&str>) -> Result<Vec<u8>, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidTls(format!("{}: {}", path.display(), reason));

    let text = String::from_utf8_lossy(&pem);
    if text.contains(LEGACY_ENCRYPTION_HEADER) {
        return Err(invalid("legacy OpenSSL key encryption is not supported, convert the key to PKCS#8".to_string()));
    }
    let encrypted = text.contains(ENCRYPTED_KEY_LABEL);
    drop(text);

    let pem = if encrypted {
        let password =
            password.ok_or_else(|| invalid("private key is encrypted and no key_password was given".to_string()))?;
        decrypt_private_key(&pem, password).map_err(invalid)?
    } else {
        pem
    };

    let mut reader = BufReader::new(pem.as_slice());
    match rustls_pemfile::private_key(&mut reader) {
        Ok(Some(_)) => Ok(pem),
        Ok(None) => Err(invalid("no PEM private key found".to_string())),
        Err(e) => Err(invalid(e.to_string())),
    }
}

fn decrypt_private_key(pem: &[u8], password: &str) -> Result<Vec<u8>, String> {
    let text = std::str::from_utf8(pem).map_err(|e| e.to_string())?;
    let (label, document) = Document::from_pem(text.trim()).map_err(|e| e.to_string())?;
    if label != ENCRYPTED_KEY_LABEL {
        return Err(format!("unexpected PEM section {}", label));
    }

    let info = EncryptedPrivateKeyInfo::try_from(document.as_bytes()).map_err(|e| e.to_string())?;
    let decrypted = info
        .decrypt(password)
        .map_err(|_| "cannot decrypt private key with the given key_password".to_string())?;
    let plain = decrypted.to_pem(KEY_LABEL, LineEnding::LF).map_err(|e| e.to_string())?;

    tracing::debug!("[Tls] Decrypted PKCS#8 client key");
    Ok(plain.as_bytes().to_vec())
}
