//! Ed25519 manifest signatures and the deployment signing policy.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde_json::Value;
use tracing::debug;

use crate::canonical;
use crate::error::PluginError;

const SIGNATURE_TARGET: &str = "tackle_plugins::manifest::signature";

/// Manifest key holding the base64 signature.
pub const SIGNATURE_KEY: &str = "signature";

/// Manifest key holding the base64 Ed25519 public key.
pub const SIGNER_KEY: &str = "signer";

/// Deployment policy governing manifest signatures.
///
/// # Example
///
/// ```
/// use tackle_plugins::SignaturePolicy;
///
/// let policy = SignaturePolicy::new(true).with_trusted_signers(vec!["a2V5".into()]);
/// assert!(policy.requires_signatures());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignaturePolicy {
    require_signatures: bool,
    trusted_signers: Vec<String>,
}

impl SignaturePolicy {
    /// Creates a policy; `require_signatures` rejects unsigned manifests.
    #[must_use]
    pub const fn new(require_signatures: bool) -> Self {
        Self {
            require_signatures,
            trusted_signers: Vec::new(),
        }
    }

    /// Restricts accepted signers to the given base64 public keys.
    ///
    /// An empty list accepts any signer whose signature verifies.
    #[must_use]
    pub fn with_trusted_signers(mut self, signers: Vec<String>) -> Self {
        self.trusted_signers = signers;
        self
    }

    /// Returns true when unsigned manifests are rejected.
    #[must_use]
    pub const fn requires_signatures(&self) -> bool {
        self.require_signatures
    }

    /// Returns the trusted signer allow-list.
    #[must_use]
    pub fn trusted_signers(&self) -> &[String] {
        &self.trusted_signers
    }

    /// Applies the policy to a parsed manifest document.
    ///
    /// Returns the signer's public key when the manifest is signed.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Signature`] if the manifest is unsigned while
    /// signatures are required, only one of `signature` and `signer` is
    /// present, the signer is not trusted, or the signature does not verify.
    pub fn check(&self, document: &Value) -> Result<Option<String>, PluginError> {
        let signature = document.get(SIGNATURE_KEY).and_then(Value::as_str);
        let signer = document.get(SIGNER_KEY).and_then(Value::as_str);

        match (signature, signer) {
            (None, None) if self.require_signatures => Err(signature_error(
                "manifest is unsigned and signatures are required",
            )),
            (None, None) => Ok(None),
            (Some(_), None) | (None, Some(_)) => Err(signature_error(
                "manifest must declare both signature and signer",
            )),
            (Some(encoded_signature), Some(encoded_signer)) => {
                if !self.trusted_signers.is_empty()
                    && !self.trusted_signers.iter().any(|key| key == encoded_signer)
                {
                    return Err(signature_error("signer is not in the trusted signer list"));
                }
                verify(document, encoded_signature, encoded_signer)?;
                debug!(
                    target: SIGNATURE_TARGET,
                    signer = encoded_signer,
                    "manifest signature verified"
                );
                Ok(Some(encoded_signer.to_owned()))
            }
        }
    }
}

/// Returns the canonical bytes a manifest signature covers.
///
/// The payload is the canonical JSON serialisation of the manifest with the
/// `signature` and `signer` keys removed.
#[must_use]
pub fn signing_payload(document: &Value) -> String {
    let mut unsigned = document.clone();
    if let Some(map) = unsigned.as_object_mut() {
        map.remove(SIGNATURE_KEY);
        map.remove(SIGNER_KEY);
    }
    canonical::to_canonical_string(&unsigned)
}

fn verify(
    document: &Value,
    encoded_signature: &str,
    encoded_signer: &str,
) -> Result<(), PluginError> {
    let key_bytes: [u8; 32] = decode(encoded_signer, "signer")?
        .try_into()
        .map_err(|_| signature_error("signer must be a 32-byte Ed25519 public key"))?;
    let signature_bytes: [u8; 64] = decode(encoded_signature, "signature")?
        .try_into()
        .map_err(|_| signature_error("signature must be 64 bytes"))?;

    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|error| signature_error(&format!("signer key is invalid: {error}")))?;
    let signature = Signature::from_bytes(&signature_bytes);
    key.verify(signing_payload(document).as_bytes(), &signature)
        .map_err(|_| signature_error("signature does not match manifest contents"))
}

fn decode(encoded: &str, field: &str) -> Result<Vec<u8>, PluginError> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|error| signature_error(&format!("{field} is not valid base64: {error}")))
}

fn signature_error(message: &str) -> PluginError {
    PluginError::Signature {
        message: message.to_owned(),
    }
}
