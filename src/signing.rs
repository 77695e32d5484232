//! Capsule signing.
//!
//! The signing provider is injected into the pipeline as a trait so the
//! orchestrator never depends on a concrete crypto implementation. The
//! shipped provider signs with Ed25519 over the capsule body and exports
//! the verifying key as a PEM sidecar. Private keys are PKCS#8 PEM,
//! optionally passphrase-encrypted; key material lives in zeroizing
//! buffers scoped to the sign step.

use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use pkcs8::LineEnding;
use std::path::{Path, PathBuf};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::config::KeyPass;

/// Errors produced while loading keys or signing.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("failed to read private key {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse private key: {0}")]
    Parse(String),

    /// Distinguished from a generic parse failure so callers can re-prompt.
    #[error("wrong or missing passphrase for encrypted private key")]
    BadPassphrase,

    #[error("failed to export public key: {0}")]
    Export(String),

    #[error("failed to write public key {path}: {source}")]
    PubkeyWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read passphrase: {0}")]
    Prompt(String),

    #[error("malformed signature: {0}")]
    BadSignature(String),
}

/// Private-key material scoped to the sign step. Both buffers are zeroed
/// on drop.
pub struct SigningMaterial {
    pem: Zeroizing<String>,
    passphrase: Option<Zeroizing<String>>,
}

impl SigningMaterial {
    /// Load key material, resolving a `prompt` passphrase interactively
    /// through the supplied callback.
    pub fn load(
        path: &Path,
        pass: Option<&KeyPass>,
        prompt: &dyn Fn() -> std::io::Result<String>,
    ) -> Result<Self, SigningError> {
        let pem = std::fs::read_to_string(path).map_err(|source| SigningError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let passphrase = match pass {
            None => None,
            Some(KeyPass::Literal(value)) => Some(Zeroizing::new(value.clone())),
            Some(KeyPass::Prompt) => Some(Zeroizing::new(
                prompt().map_err(|e| SigningError::Prompt(e.to_string()))?,
            )),
        };
        Ok(Self {
            pem: Zeroizing::new(pem),
            passphrase,
        })
    }

    fn parse_key(&self) -> Result<SigningKey, SigningError> {
        let pem = self.pem.trim();
        if pem.contains("ENCRYPTED PRIVATE KEY") {
            let pass = self
                .passphrase
                .as_ref()
                .ok_or(SigningError::BadPassphrase)?;
            SigningKey::from_pkcs8_encrypted_pem(pem, pass.as_bytes())
                .map_err(|_| SigningError::BadPassphrase)
        } else {
            SigningKey::from_pkcs8_pem(pem).map_err(|e| SigningError::Parse(e.to_string()))
        }
    }
}

/// A detached signature plus the exported verifying key.
#[derive(Debug)]
pub struct SignatureBlock {
    pub algorithm: String,
    pub signature: Vec<u8>,
    pub public_key_pem: String,
}

/// External signing capability consumed by the build pipeline.
pub trait SigningProvider {
    fn sign(
        &self,
        material: &SigningMaterial,
        message: &[u8],
    ) -> Result<SignatureBlock, SigningError>;
}

/// The shipped Ed25519 provider.
pub struct Ed25519Signer;

impl SigningProvider for Ed25519Signer {
    fn sign(
        &self,
        material: &SigningMaterial,
        message: &[u8],
    ) -> Result<SignatureBlock, SigningError> {
        let key = material.parse_key()?;
        let signature: Signature = key.sign(message);
        let public_key_pem = key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| SigningError::Export(e.to_string()))?;
        Ok(SignatureBlock {
            algorithm: "ed25519".to_string(),
            signature: signature.to_bytes().to_vec(),
            public_key_pem,
        })
    }
}

/// Verify a detached signature against a PEM-encoded verifying key.
pub fn verify(
    public_key_pem: &str,
    message: &[u8],
    signature: &[u8],
) -> Result<bool, SigningError> {
    let key = VerifyingKey::from_public_key_pem(public_key_pem)
        .map_err(|e| SigningError::Parse(e.to_string()))?;
    let signature =
        Signature::from_slice(signature).map_err(|e| SigningError::BadSignature(e.to_string()))?;
    Ok(key.verify(message, &signature).is_ok())
}

/// Sidecar path for the exported public key: `<output>.pubkey`.
pub fn pubkey_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".pubkey");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::pkcs8::EncodePrivateKey;
    use std::fs;
    use tempfile::TempDir;

    const SEED: [u8; 32] = [7u8; 32];

    fn no_prompt() -> Box<dyn Fn() -> std::io::Result<String>> {
        Box::new(|| panic!("prompt must not be called"))
    }

    fn write_plain_key(dir: &Path) -> PathBuf {
        let key = SigningKey::from_bytes(&SEED);
        let pem = key.to_pkcs8_pem(LineEnding::LF).unwrap();
        let path = dir.join("signing.pem");
        fs::write(&path, pem.as_bytes()).unwrap();
        path
    }

    fn write_encrypted_key(dir: &Path, passphrase: &str) -> PathBuf {
        let key = SigningKey::from_bytes(&SEED);
        let pem = key
            .to_pkcs8_encrypted_pem(&mut rand::rngs::OsRng, passphrase.as_bytes(), LineEnding::LF)
            .unwrap();
        let path = dir.join("signing-enc.pem");
        fs::write(&path, pem.as_bytes()).unwrap();
        path
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let tmp = TempDir::new().unwrap();
        let key_path = write_plain_key(tmp.path());
        let material = SigningMaterial::load(&key_path, None, &*no_prompt()).unwrap();
        let block = Ed25519Signer.sign(&material, b"capsule body").unwrap();
        assert_eq!(block.algorithm, "ed25519");
        assert_eq!(block.signature.len(), 64);
        assert!(verify(&block.public_key_pem, b"capsule body", &block.signature).unwrap());
        assert!(!verify(&block.public_key_pem, b"tampered body", &block.signature).unwrap());
    }

    #[test]
    fn encrypted_key_round_trip() {
        let tmp = TempDir::new().unwrap();
        let key_path = write_encrypted_key(tmp.path(), "hunter2");
        let material = SigningMaterial::load(
            &key_path,
            Some(&KeyPass::Literal("hunter2".to_string())),
            &*no_prompt(),
        )
        .unwrap();
        let block = Ed25519Signer.sign(&material, b"message").unwrap();
        assert!(verify(&block.public_key_pem, b"message", &block.signature).unwrap());
    }

    #[test]
    fn wrong_passphrase_is_distinguished() {
        let tmp = TempDir::new().unwrap();
        let key_path = write_encrypted_key(tmp.path(), "hunter2");
        let material = SigningMaterial::load(
            &key_path,
            Some(&KeyPass::Literal("wrong".to_string())),
            &*no_prompt(),
        )
        .unwrap();
        let err = Ed25519Signer.sign(&material, b"message").unwrap_err();
        assert!(matches!(err, SigningError::BadPassphrase));
    }

    #[test]
    fn missing_passphrase_is_distinguished() {
        let tmp = TempDir::new().unwrap();
        let key_path = write_encrypted_key(tmp.path(), "hunter2");
        let material = SigningMaterial::load(&key_path, None, &*no_prompt()).unwrap();
        let err = Ed25519Signer.sign(&material, b"message").unwrap_err();
        assert!(matches!(err, SigningError::BadPassphrase));
    }

    #[test]
    fn prompt_resolves_the_passphrase() {
        let tmp = TempDir::new().unwrap();
        let key_path = write_encrypted_key(tmp.path(), "spoken");
        let prompt: Box<dyn Fn() -> std::io::Result<String>> =
            Box::new(|| Ok("spoken".to_string()));
        let material =
            SigningMaterial::load(&key_path, Some(&KeyPass::Prompt), &*prompt).unwrap();
        let block = Ed25519Signer.sign(&material, b"message").unwrap();
        assert!(verify(&block.public_key_pem, b"message", &block.signature).unwrap());
    }

    #[test]
    fn garbage_key_is_a_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("junk.pem");
        fs::write(&path, "not a key").unwrap();
        let material = SigningMaterial::load(&path, None, &*no_prompt()).unwrap();
        let err = Ed25519Signer.sign(&material, b"message").unwrap_err();
        assert!(matches!(err, SigningError::Parse(_)));
    }

    #[test]
    fn pubkey_sidecar_name() {
        assert_eq!(
            pubkey_path(Path::new("/out/app.capsule")),
            PathBuf::from("/out/app.capsule.pubkey")
        );
    }
}
