//! The access control filter.
//!
//! [`allow`] is the single security boundary between the vector index and
//! anything leaving the retrieval pipeline. It is a pure function of the
//! candidate chunk and the requesting identity, evaluated fresh on every
//! query; results must never be cached across requests because identity
//! capabilities can change between queries.

use crate::types::{Capability, ChunkRecord, Identity, Sensitivity};

/// Whether `identity` may see `chunk`.
///
/// General chunks are visible to every authenticated identity. Restricted
/// chunks require either ownership (with the owner-restricted capability)
/// or the administrative capability; caution-escalated chunks carry no owner
/// and are therefore admin-only.
pub fn allow(chunk: &ChunkRecord, identity: &Identity) -> bool {
    match chunk.sensitivity {
        Sensitivity::General => true,
        Sensitivity::Restricted => {
            if identity.has(Capability::Admin) {
                return true;
            }
            match (&chunk.owner, identity.has(Capability::OwnerRestricted)) {
                (Some(owner), true) => owner == &identity.owner_id,
                _ => false,
            }
        }
    }
}
