//! Base58 (Bitcoin alphabet) encoding, used for every human- or URL-facing key/id/token.

/// Encode bytes as base58.
pub fn encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

/// Decode a base58 string back to bytes.
pub fn decode(s: &str) -> Result<Vec<u8>, bs58::decode::Error> {
    bs58::decode(s).into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let data = b"hello repbin";
        let encoded = encode(data);
        let decoded = decode(&encoded).expect("decodes");
        assert_eq!(decoded, data);
    }
}
