//! Wrapper for credentials which keeps them out of logs.

use std::{borrow::Cow, fmt, ops::Deref};

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// A password or token. Generally any semi-secret item.
///
/// This wrapper prevents the value from appearing in debug reprs, and
/// zeroes owned values on drop.
///
/// Use [Secret::revealed] to get the underlying value.
#[derive(Clone, Deserialize, Serialize)]
#[serde(from = "String")]
pub struct Secret(Cow<'static, str>);

impl Drop for Secret {
    fn drop(&mut self) {
        if let Cow::Owned(ref mut s) = self.0 {
            s.zeroize()
        }
    }
}

/// Tiny wrapper struct to indicate that the inner object should
/// be directly printed in fmt::Debug implementations.
struct DirectDebug<D>(D);

impl<D> fmt::Debug for DirectDebug<D>
where
    D: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Secret").field(&DirectDebug("****")).finish()
    }
}

impl Secret {
    /// Expose the underlying value of this secret
    pub fn revealed(&self) -> &str {
        self.0.deref()
    }

    /// Compare a candidate against this secret in constant time.
    pub fn verify(&self, candidate: &str) -> bool {
        let expected = self.revealed().as_bytes();
        let candidate = candidate.as_bytes();
        expected.ct_eq(candidate).into()
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        Secret(s.to_owned().into())
    }
}

impl From<Cow<'static, str>> for Secret {
    fn from(inner: Cow<'static, str>) -> Self {
        Secret(inner)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value.into())
    }
}

impl From<&'static str> for Secret {
    fn from(value: &'static str) -> Self {
        Secret(value.into())
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn secret_hidden_debug() {
        let password = Secret::from("hunter2");

        assert!(!format!("{password:?}").contains("hunter2"));
        assert_eq!(&format!("{password:?}"), "Secret(****)");
        assert_eq!(password.revealed(), "hunter2");
    }

    #[test]
    fn verify_matches_exactly() {
        let password = Secret::from_str("correct horse");

        assert!(password.verify("correct horse"));
        assert!(!password.verify("correct horsE"));
        assert!(!password.verify("correct"));
        assert!(!password.verify(""));
    }

    #[test]
    fn deserializes_from_plain_string() {
        let password: Secret = serde_json::from_str("\"s3cret\"").unwrap();
        assert!(password.verify("s3cret"));
    }
}
