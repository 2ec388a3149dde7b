//! Wire types shared between the gateway and the replication coordinator.

use crate::types::{Consistency, StoreOp};
use serde::{Deserialize, Serialize};

/// Replication descriptor the gateway posts to the coordinator after a
/// successful primary write.
///
/// `value` is present for SET and absent for DELETE; it travels base64
/// encoded because values are opaque bytes. `replica_nodes` is the tail
/// of the ring's `locate(key, K)` for the key — the primary has already
/// been written and is carried only for logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicateRequest {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_base64")]
    pub value: Option<Vec<u8>>,
    pub op: StoreOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ns: Option<u64>,
    #[serde(default)]
    pub consistency: Consistency,
    pub primary_node: String,
    pub replica_nodes: Vec<String>,
    pub user_id: String,
}

/// Base64 (de)serialization for `Option<Vec<u8>>` values inside JSON.
mod opt_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
