//! Identifier and vocabulary types shared by every service.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum key length in bytes.
pub const MAX_KEY_LEN: usize = 512;

/// Address of a physical storage node.
///
/// An opaque string, used verbatim as the node's HTTP base URL
/// (e.g. `http://127.0.0.1:8082`). Node identity is stable for the
/// lifetime of a ring; the string is also the tie-break order for
/// colliding virtual points, so it must be deterministic cluster-wide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddr(String);

impl NodeAddr {
    pub fn new(addr: impl Into<String>) -> Self {
        NodeAddr(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeAddr {
    fn from(s: &str) -> Self {
        NodeAddr(s.to_string())
    }
}

impl From<String> for NodeAddr {
    fn from(s: String) -> Self {
        NodeAddr(s)
    }
}

/// Per-operation consistency level.
///
/// `Eventual` acknowledges after the primary write and replicates in the
/// background; `Strong` withholds the acknowledgment until a majority of
/// replicas confirm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    #[default]
    Eventual,
    Strong,
}

impl FromStr for Consistency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eventual" => Ok(Consistency::Eventual),
            "strong" => Ok(Consistency::Strong),
            other => Err(Error::BadRequest(format!(
                "invalid consistency level: {other:?}"
            ))),
        }
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Consistency::Eventual => f.write_str("eventual"),
            Consistency::Strong => f.write_str("strong"),
        }
    }
}

/// Mutation kind carried by WAL records and replication tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StoreOp {
    Set,
    Delete,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOp::Set => f.write_str("SET"),
            StoreOp::Delete => f.write_str("DELETE"),
        }
    }
}

/// Validate a user-supplied key: non-empty, bounded length.
///
/// Keys arrive as URL path segments so they are UTF-8 by construction;
/// this checks the remaining invariants.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::BadRequest("key must not be empty".into()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(Error::BadRequest(format!(
            "key exceeds {MAX_KEY_LEN} bytes"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consistency_parse() {
        assert_eq!(
            "eventual".parse::<Consistency>().unwrap(),
            Consistency::Eventual
        );
        assert_eq!("strong".parse::<Consistency>().unwrap(), Consistency::Strong);
        assert!("quorum".parse::<Consistency>().is_err());
        assert!("Strong".parse::<Consistency>().is_err());
    }

    #[test]
    fn test_consistency_default_is_eventual() {
        assert_eq!(Consistency::default(), Consistency::Eventual);
    }

    #[test]
    fn test_consistency_serde_roundtrip() {
        let json = serde_json::to_string(&Consistency::Strong).unwrap();
        assert_eq!(json, "\"strong\"");
        let parsed: Consistency = serde_json::from_str("\"eventual\"").unwrap();
        assert_eq!(parsed, Consistency::Eventual);
    }

    #[test]
    fn test_store_op_wire_form() {
        assert_eq!(serde_json::to_string(&StoreOp::Set).unwrap(), "\"SET\"");
        assert_eq!(
            serde_json::to_string(&StoreOp::Delete).unwrap(),
            "\"DELETE\""
        );
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("user:42").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN)).is_ok());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_node_addr_ordering_is_lexicographic() {
        let a = NodeAddr::from("http://a:1");
        let b = NodeAddr::from("http://b:1");
        assert!(a < b);
    }
}
