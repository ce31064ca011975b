//! # Operator-Facing Codes
//!
//! Short strings staff read off one screen and type into another.
//!
//! ```text
//! PeerId     discreet-4821     rendezvous address of one running terminal
//! StoreCode  discreet-k3x9q    key of a hosted inventory
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SyncError, SyncResult};

/// Longest code accepted from an operator.
const MAX_CODE_LEN: usize = 64;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Trims, lowercases and checks an operator-typed code.
fn normalize(raw: &str) -> SyncResult<String> {
    let code = raw.trim().to_lowercase();

    let invalid = |reason: &str| SyncError::InvalidCode {
        code: raw.to_string(),
        reason: reason.to_string(),
    };

    if code.is_empty() {
        return Err(invalid("empty"));
    }
    if code.len() > MAX_CODE_LEN {
        return Err(invalid("too long"));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid("only letters, digits, '-' and '_' are allowed"));
    }

    Ok(code)
}

// =============================================================================
// Peer Identifier
// =============================================================================

/// Self-chosen rendezvous identifier of one terminal.
///
/// Not globally unique: the directory rejects duplicates and the mesh picks
/// a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// `<prefix>-NNNN` with NNNN in 1000..=9999.
    pub fn generate(prefix: &str) -> Self {
        let n: u16 = rand::thread_rng().gen_range(1000..=9999);
        PeerId(format!("{}-{}", prefix, n))
    }

    /// Parses an operator-typed identifier.
    pub fn parse(raw: &str) -> SyncResult<Self> {
        normalize(raw).map(PeerId)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Store Code
// =============================================================================

/// Key of a hosted inventory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreCode(String);

impl StoreCode {
    /// `<prefix>-xxxxx` with five random base36 characters.
    pub fn generate(prefix: &str) -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..5)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect();
        StoreCode(format!("{}-{}", prefix, suffix))
    }

    pub fn parse(raw: &str) -> SyncResult<Self> {
        normalize(raw).map(StoreCode)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_peer_id_format() {
        for _ in 0..50 {
            let id = PeerId::generate("discreet");
            let digits = id.as_str().strip_prefix("discreet-").unwrap();
            let n: u16 = digits.parse().unwrap();
            assert!((1000..=9999).contains(&n));
        }
    }

    #[test]
    fn test_generated_store_code_format() {
        let code = StoreCode::generate("discreet");
        let suffix = code.as_str().strip_prefix("discreet-").unwrap();
        assert_eq!(suffix.len(), 5);
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_operator_input_is_normalized() {
        assert_eq!(PeerId::parse("  DSC-1234 ").unwrap().as_str(), "dsc-1234");
        assert!(PeerId::parse("").is_err());
        assert!(PeerId::parse("has space").is_err());
        assert!(StoreCode::parse(&"x".repeat(65)).is_err());
    }
}
