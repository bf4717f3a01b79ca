//! HMAC-SHA256 command authentication.
//!
//! A signed command has the form `<body>|<sig>`, where `<sig>` is the HMAC-SHA256
//! of `<body>` under the pre-shared key, rendered as 64 lowercase hex
//! characters. The line is split at the **last** `|`, so a body may itself
//! contain the separator.
//!
//! The default comparison is a plain string comparison, which leaks timing
//! information about how many leading characters matched.
//! [`SignatureCheck::ConstantTime`] closes that channel without changing the
//! wire format.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Separator between command body and signature.
pub const SIGNATURE_SEPARATOR: char = '|';

/// Length of a hex-encoded HMAC-SHA256 signature.
pub const SIGNATURE_HEX_LEN: usize = 64;

/// How a received signature is compared against the computed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureCheck {
    /// Case-sensitive string equality.
    #[default]
    Plain,
    /// Constant-time byte comparison.
    ConstantTime,
}

/// A command line split into its body and received signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedCommand<'a> {
    /// Text before the last `|`.
    pub body: &'a str,
    /// Text after the last `|`.
    pub signature: &'a str,
}

impl<'a> SignedCommand<'a> {
    /// Split a line at the last `|`.
    pub fn split(line: &'a str) -> Result<Self, AuthError> {
        line.rsplit_once(SIGNATURE_SEPARATOR)
            .map(|(body, signature)| SignedCommand { body, signature })
            .ok_or(AuthError::NoSignature)
    }
}

/// Verifies and produces signatures for command lines.
#[derive(Clone)]
pub struct CommandAuthenticator {
    /// MAC keyed with the pre-shared secret, cloned for every computation.
    keyed: HmacSha256,
    check: SignatureCheck,
}

impl fmt::Debug for CommandAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandAuthenticator")
            .field("key", &"<redacted>")
            .field("check", &self.check)
            .finish()
    }
}

impl CommandAuthenticator {
    /// Create an authenticator for the given pre-shared key.
    ///
    /// An empty key is rejected with [`AuthError::InvalidKey`].
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self, AuthError> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(AuthError::InvalidKey);
        }
        let keyed = HmacSha256::new_from_slice(key).map_err(|_| AuthError::InvalidKey)?;
        Ok(CommandAuthenticator {
            keyed,
            check: SignatureCheck::default(),
        })
    }

    /// Select the signature comparison mode.
    pub fn with_check(mut self, check: SignatureCheck) -> Self {
        self.check = check;
        self
    }

    /// The signature comparison mode in use.
    pub fn check(&self) -> SignatureCheck {
        self.check
    }

    /// Compute the lowercase hex signature of a command body.
    pub fn sign(&self, body: &str) -> String {
        let mut mac = self.keyed.clone();
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Build a complete signed line (`<body>|<sig>`), without terminator.
    pub fn sign_line(&self, body: &str) -> String {
        format!("{}{}{}", body, SIGNATURE_SEPARATOR, self.sign(body))
    }

    /// Verify a signed line and return its body.
    pub fn verify<'a>(&self, line: &'a str) -> Result<&'a str, AuthError> {
        let signed = SignedCommand::split(line).map_err(|e| {
            log::warn!("command rejected: no signature found");
            e
        })?;

        let expected = self.sign(signed.body);
        let matches = match self.check {
            SignatureCheck::Plain => signed.signature == expected,
            SignatureCheck::ConstantTime => {
                bool::from(signed.signature.as_bytes().ct_eq(expected.as_bytes()))
            }
        };

        if matches {
            Ok(signed.body)
        } else {
            log::warn!(
                "command rejected: signature mismatch (got {} chars)",
                signed.signature.len()
            );
            Err(AuthError::SignatureMismatch)
        }
    }
}
