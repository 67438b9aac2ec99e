//! Product/tag join rows.
//!
//! # Invariants
//! - `association_id` is the row's own identity and is distinct from
//!   `target_id`; deletes address rows by `association_id`.
//! - `created_at` is preserved for rows that survive reconciliation.

use crate::model::product::{ProductId, TagId};
use serde::{Deserialize, Serialize};

/// Identity of one persisted product/tag link.
pub type AssociationId = i64;

/// One persisted link between an owning product and a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationRow {
    pub association_id: AssociationId,
    pub owner_id: ProductId,
    pub target_id: TagId,
    /// Creation time in epoch milliseconds.
    pub created_at: i64,
}

/// Insert payload for a link that does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NewAssociation {
    pub owner_id: ProductId,
    pub target_id: TagId,
}
