// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The seam between the coordination core and the external payload codec.
//!
//! The core never interprets payload bytes. Everything it knows about a
//! payload is captured by [`Message`]: a stable type name (matched
//! against the advertised type on dispatch) and encode/decode to an
//! opaque byte string. Schema libraries implement this trait for their
//! generated types; tests implement it by hand.

use crate::error::Result;

/// A typed payload the core can ship as an opaque blob.
pub trait Message: Send + Sync + Sized + 'static {
    /// Stable, globally meaningful name of the payload type
    /// (e.g. `"example.msgs.Int32"`).
    fn type_name() -> &'static str;

    /// Serialize into a byte string.
    ///
    /// # Errors
    /// Returns [`crate::Error::Serialization`] when the external codec
    /// rejects the value.
    fn encode(&self) -> Result<Vec<u8>>;

    /// Deserialize from a byte string.
    ///
    /// # Errors
    /// Returns [`crate::Error::Serialization`] when the bytes do not
    /// describe a value of this type.
    fn decode(data: &[u8]) -> Result<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[derive(Debug, PartialEq, Eq)]
    struct Int32Msg {
        data: i32,
    }

    impl Message for Int32Msg {
        fn type_name() -> &'static str {
            "test.Int32"
        }

        fn encode(&self) -> Result<Vec<u8>> {
            Ok(self.data.to_le_bytes().to_vec())
        }

        fn decode(data: &[u8]) -> Result<Self> {
            let bytes: [u8; 4] = data
                .try_into()
                .map_err(|_| Error::Serialization("expected 4 bytes".into()))?;
            Ok(Self {
                data: i32::from_le_bytes(bytes),
            })
        }
    }

    #[test]
    fn round_trip() {
        let msg = Int32Msg { data: -77 };
        let bytes = msg.encode().unwrap();
        assert_eq!(Int32Msg::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn decode_rejects_wrong_width() {
        assert!(Int32Msg::decode(&[1, 2]).is_err());
    }
}
