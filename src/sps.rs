//! Wire envelope for the symbolic protocol-state sidecar channel.
//!
//! Grounded in `symbolic_protocol_states.h`: messages are `[tag, payload]`
//! pairs with `tag` one of `SPS_DATA` (concrete packet bytes to feed the
//! simulated program) or `SPS_RST` (reset the connection/session state).
//! The original frames these over a socket to the simulator process; that
//! transport is out of scope here; this module only carries the message
//! type and its bencoded wire form.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

const SPS_DATA: u8 = 0x0;
const SPS_RST: u8 = 0x1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpsMessage {
    Data(Vec<u8>),
    Reset,
}

#[derive(Serialize, Deserialize)]
struct Wire(u8, serde_bytes::ByteBuf);

impl SpsMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let wire = match self {
            SpsMessage::Data(bytes) => Wire(SPS_DATA, serde_bytes::ByteBuf::from(bytes.clone())),
            SpsMessage::Reset => Wire(SPS_RST, serde_bytes::ByteBuf::new()),
        };
        serde_bencode::to_bytes(&wire)
            .map_err(|e| EngineError::MalformedDescriptor(format!("sps encode: {e}")))
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let Wire(tag, payload) = serde_bencode::from_bytes(data)
            .map_err(|e| EngineError::MalformedDescriptor(format!("sps decode: {e}")))?;
        match tag {
            SPS_DATA => Ok(SpsMessage::Data(payload.into_vec())),
            SPS_RST => Ok(SpsMessage::Reset),
            other => Err(EngineError::MalformedDescriptor(format!(
                "unknown sps tag: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn data_message_round_trips() {
        let msg = SpsMessage::Data(vec![1, 2, 3]);
        let encoded = msg.encode().unwrap();
        let decoded = SpsMessage::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn reset_message_round_trips() {
        let msg = SpsMessage::Reset;
        let encoded = msg.encode().unwrap();
        assert_eq!(SpsMessage::decode(&encoded).unwrap(), msg);
    }
}
