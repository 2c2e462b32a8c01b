//! Text and amount helpers shared by the client and the mock ledger.

use alloy_primitives::{utils::format_ether, U256};

use crate::{error::ValidationError, ids::EncodedText};

/// Encodes human text into the ledger's bytes32 representation.
pub fn encode_text(text: &str) -> Result<EncodedText, ValidationError> {
    let bytes = text.as_bytes();
    if bytes.len() > EncodedText::LEN {
        return Err(ValidationError::TextTooLong {
            text: text.to_string(),
            len: bytes.len(),
            max: EncodedText::LEN,
        });
    }
    let mut word = [0u8; EncodedText::LEN];
    word[..bytes.len()].copy_from_slice(bytes);
    Ok(EncodedText::new(word))
}

/// Decodes a bytes32 word back into text, dropping the zero padding.
pub fn decode_text(encoded: &EncodedText) -> String {
    let bytes = encoded.as_bytes();
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |pos| pos + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Formats a minor-unit amount (wei-scale) for display.
pub fn format_amount(amount: U256) -> String {
    format!("{} ETH", format_ether(amount))
}
