//! `#[serde(with = "as_bytes")]`: encode a byte slice, array or vector as
//! Solidity `bytes` instead of `uint8[]`.
//!
//! ```ignore
//! #[derive(Serialize)]
//! struct Call<'a> {
//!     to: Address,
//!     #[serde(with = "as_bytes")]
//!     data: &'a [u8],
//! }
//! ```

use serde::{ser::SerializeTuple, Serialize, Serializer};

use super::ser::DynamicMarker;

/// Raw payload, written without a length slot of its own.
struct Payload<'a>(&'a [u8]);

impl Serialize for Payload<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self.0)
    }
}

pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    // dynamic marker, then the length slot, then the padded payload
    let mut tuple = serializer.serialize_tuple(3)?;
    tuple.serialize_element(&DynamicMarker)?;
    tuple.serialize_element(&data.len())?;
    tuple.serialize_element(&Payload(data))?;
    tuple.end()
}
