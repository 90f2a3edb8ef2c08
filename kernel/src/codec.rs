// Payload Codec
//
// Serialises payloads into the text stored in the `json` column.
// The same payload must always produce the same bytes, since the
// content hash is computed over this text.

use crate::error::LedgerError;
use crate::record::Payload;

pub trait PayloadCodec: Send + Sync {
    fn encode(&self, payload: &Payload) -> Result<String, LedgerError>;
}

/// Compact `serde_json` output, keys in sorted order.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactJsonCodec;

impl PayloadCodec for CompactJsonCodec {
    fn encode(&self, payload: &Payload) -> Result<String, LedgerError> {
        Ok(serde_json::to_string(&payload.0)?)
    }
}
