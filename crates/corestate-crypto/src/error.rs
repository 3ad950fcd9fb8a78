//! Crypto error taxonomy for key loading and the content cipher.

use thiserror::Error;

/// Errors from key loading and the content cipher.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The key source URI used an unrecognized scheme.
    #[error("unrecognized key source scheme: {0}")]
    UnknownScheme(String),

    /// The URI was recognized but malformed (missing mount/path segments).
    #[error("malformed key source uri: {0}")]
    MalformedUri(String),

    /// Reading key material from disk failed.
    #[error("failed to read key material: {0}")]
    Io(#[from] std::io::Error),

    /// The remote secret store returned an error or an unexpected shape.
    #[error("secret store error: {0}")]
    SecretStore(String),

    /// A required environment variable was not set.
    #[error("missing environment variable: {0}")]
    MissingEnv(String),

    /// The PEM-encoded key material could not be parsed.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// Encryption or decryption failed (wrong key, corrupted envelope,
    /// tag mismatch).
    #[error("cipher operation failed: {0}")]
    CipherFailed(String),

    /// The envelope's framing header was malformed or truncated.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}
