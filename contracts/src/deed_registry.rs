//! # Deed Registry
//!
//! Custody of deed tokens. The escrow coordinator never owns deed state
//! itself; it calls into a [`DeedRegistry`] to take custody when a deed is
//! listed and to hand it to the buyer when the sale settles.
//!
//! [`InMemoryDeedRegistry`] is the reference implementation used by tests
//! and the simulator. It follows the usual non-fungible token rules:
//!
//! - **Minting**: anyone can mint a deed to themselves with a metadata URI.
//!   Ids are sequential, starting at 1.
//! - **Approval**: only the current owner can approve a spender, and a
//!   deed has at most one approved spender at a time.
//! - **Transfer-on-behalf**: `transfer_from` succeeds when `from` is the
//!   owner and the operator is either the owner or the approved spender.
//!   Every transfer clears the approval.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::Address;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The referenced deed has never been minted.
    #[error("deed not found: {0}")]
    DeedNotFound(DeedId),

    /// The caller does not own the deed it tried to approve.
    #[error("{caller} is not the owner of deed {deed_id}")]
    NotOwner {
        /// The identity that attempted the operation.
        caller: Address,
        /// The deed in question.
        deed_id: DeedId,
    },

    /// The `from` identity of a transfer is not the current owner.
    #[error("transfer from {from} rejected: deed {deed_id} is owned by {owner}")]
    FromNotOwner {
        /// The claimed current owner.
        from: Address,
        /// The actual current owner.
        owner: Address,
        /// The deed in question.
        deed_id: DeedId,
    },

    /// The operator is neither the owner nor the approved spender.
    #[error("{operator} is not approved to transfer deed {deed_id}")]
    NotAuthorized {
        /// The identity that attempted the transfer.
        operator: Address,
        /// The deed in question.
        deed_id: DeedId,
    },

    /// An owner tried to approve itself.
    #[error("approval to current owner")]
    SelfApproval,

    /// A deed must carry a metadata URI.
    #[error("token URI must not be empty")]
    EmptyTokenUri,

    /// The id counter would overflow.
    #[error("deed supply exhausted")]
    SupplyOverflow,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Identifier of a deed token. Assigned sequentially from 1.
pub type DeedId = u64;

/// The custody capability the escrow coordinator consumes.
pub trait DeedRegistry {
    /// Address of the registry itself.
    fn address(&self) -> &str;

    /// Current owner of `deed_id`.
    fn owner_of(&self, deed_id: DeedId) -> Result<Address, RegistryError>;

    /// Authorizes `spender` to transfer `deed_id` on the caller's behalf.
    fn approve(
        &mut self,
        caller: &str,
        spender: &str,
        deed_id: DeedId,
    ) -> Result<(), RegistryError>;

    /// Moves `deed_id` from `from` to `to`, acting as `operator`.
    fn transfer_from(
        &mut self,
        operator: &str,
        from: &str,
        to: &str,
        deed_id: DeedId,
    ) -> Result<(), RegistryError>;
}

/// A minted deed and its custody state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeedInfo {
    /// The deed's id.
    pub deed_id: DeedId,
    /// Metadata URI describing the property.
    pub token_uri: String,
    /// Current owner.
    pub owner: Address,
    /// Spender allowed to transfer on the owner's behalf, if any.
    pub approved: Option<Address>,
    /// Identity that minted the deed.
    pub minted_by: Address,
    /// Timestamp of minting.
    pub minted_at: DateTime<Utc>,
}

/// In-memory deed registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryDeedRegistry {
    address: Address,
    deeds: BTreeMap<DeedId, DeedInfo>,
    total_supply: u64,
}

impl InMemoryDeedRegistry {
    /// Creates an empty registry living at `address`.
    pub fn new(address: impl Into<Address>) -> Self {
        Self {
            address: address.into(),
            deeds: BTreeMap::new(),
            total_supply: 0,
        }
    }

    /// Mints a new deed to `caller` and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::EmptyTokenUri`] if `token_uri` is empty.
    /// Returns [`RegistryError::SupplyOverflow`] if the id space is exhausted.
    pub fn mint(&mut self, caller: &str, token_uri: &str) -> Result<DeedId, RegistryError> {
        if token_uri.is_empty() {
            return Err(RegistryError::EmptyTokenUri);
        }

        let deed_id = self
            .total_supply
            .checked_add(1)
            .ok_or(RegistryError::SupplyOverflow)?;

        self.deeds.insert(
            deed_id,
            DeedInfo {
                deed_id,
                token_uri: token_uri.to_string(),
                owner: caller.to_string(),
                approved: None,
                minted_by: caller.to_string(),
                minted_at: Utc::now(),
            },
        );
        self.total_supply = deed_id;

        debug!(deed_id, owner = caller, "deed minted");
        Ok(deed_id)
    }

    /// Metadata URI of `deed_id`.
    pub fn token_uri(&self, deed_id: DeedId) -> Result<&str, RegistryError> {
        self.deed(deed_id).map(|d| d.token_uri.as_str())
    }

    /// Number of deeds minted so far.
    pub fn total_supply(&self) -> u64 {
        self.total_supply
    }

    /// Approved spender of `deed_id`, if any.
    pub fn get_approved(&self, deed_id: DeedId) -> Result<Option<&str>, RegistryError> {
        self.deed(deed_id).map(|d| d.approved.as_deref())
    }

    /// Full record of `deed_id`.
    pub fn deed(&self, deed_id: DeedId) -> Result<&DeedInfo, RegistryError> {
        self.deeds
            .get(&deed_id)
            .ok_or(RegistryError::DeedNotFound(deed_id))
    }
}

impl DeedRegistry for InMemoryDeedRegistry {
    fn address(&self) -> &str {
        &self.address
    }

    fn owner_of(&self, deed_id: DeedId) -> Result<Address, RegistryError> {
        self.deed(deed_id).map(|d| d.owner.clone())
    }

    fn approve(
        &mut self,
        caller: &str,
        spender: &str,
        deed_id: DeedId,
    ) -> Result<(), RegistryError> {
        let deed = self
            .deeds
            .get_mut(&deed_id)
            .ok_or(RegistryError::DeedNotFound(deed_id))?;

        if deed.owner != caller {
            return Err(RegistryError::NotOwner {
                caller: caller.to_string(),
                deed_id,
            });
        }
        if spender == deed.owner {
            return Err(RegistryError::SelfApproval);
        }

        deed.approved = Some(spender.to_string());
        debug!(deed_id, owner = caller, spender, "deed transfer approved");
        Ok(())
    }

    fn transfer_from(
        &mut self,
        operator: &str,
        from: &str,
        to: &str,
        deed_id: DeedId,
    ) -> Result<(), RegistryError> {
        let deed = self
            .deeds
            .get_mut(&deed_id)
            .ok_or(RegistryError::DeedNotFound(deed_id))?;

        if deed.owner != from {
            return Err(RegistryError::FromNotOwner {
                from: from.to_string(),
                owner: deed.owner.clone(),
                deed_id,
            });
        }

        let approved = deed.approved.as_deref() == Some(operator);
        if operator != deed.owner && !approved {
            return Err(RegistryError::NotAuthorized {
                operator: operator.to_string(),
                deed_id,
            });
        }

        deed.owner = to.to_string();
        deed.approved = None;
        debug!(deed_id, from, to, operator, "deed transferred");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_assigns_sequential_ids() {
        let mut registry = InMemoryDeedRegistry::new("registry");
        let first = registry.mint("alice", "ipfs://deed-1").unwrap();
        let second = registry.mint("bob", "ipfs://deed-2").unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(registry.total_supply(), 2);
        assert_eq!(registry.owner_of(2).unwrap(), "bob");
    }

    #[test]
    fn mint_stores_token_uri() {
        let mut registry = InMemoryDeedRegistry::new("registry");
        let id = registry.mint("alice", "https://google.com").unwrap();
        assert_eq!(registry.token_uri(id).unwrap(), "https://google.com");
    }

    #[test]
    fn mint_empty_uri_rejected() {
        let mut registry = InMemoryDeedRegistry::new("registry");
        assert_eq!(registry.mint("alice", ""), Err(RegistryError::EmptyTokenUri));
        assert_eq!(registry.total_supply(), 0);
    }

    #[test]
    fn unknown_deed_is_not_found() {
        let registry = InMemoryDeedRegistry::new("registry");
        assert_eq!(registry.owner_of(7), Err(RegistryError::DeedNotFound(7)));
        assert!(registry.token_uri(7).is_err());
        assert!(registry.get_approved(7).is_err());
    }

    #[test]
    fn only_owner_can_approve() {
        let mut registry = InMemoryDeedRegistry::new("registry");
        let id = registry.mint("alice", "uri").unwrap();
        let result = registry.approve("mallory", "escrow", id);
        assert!(matches!(result, Err(RegistryError::NotOwner { .. })));
        assert_eq!(registry.get_approved(id).unwrap(), None);
    }

    #[test]
    fn self_approval_rejected() {
        let mut registry = InMemoryDeedRegistry::new("registry");
        let id = registry.mint("alice", "uri").unwrap();
        assert_eq!(
            registry.approve("alice", "alice", id),
            Err(RegistryError::SelfApproval)
        );
    }

    #[test]
    fn approved_operator_can_transfer_and_approval_clears() {
        let mut registry = InMemoryDeedRegistry::new("registry");
        let id = registry.mint("alice", "uri").unwrap();
        registry.approve("alice", "escrow", id).unwrap();
        assert_eq!(registry.get_approved(id).unwrap(), Some("escrow"));

        registry.transfer_from("escrow", "alice", "escrow", id).unwrap();
        assert_eq!(registry.owner_of(id).unwrap(), "escrow");
        assert_eq!(registry.get_approved(id).unwrap(), None);
    }

    #[test]
    fn owner_can_transfer_without_approval() {
        let mut registry = InMemoryDeedRegistry::new("registry");
        let id = registry.mint("alice", "uri").unwrap();
        registry.transfer_from("alice", "alice", "bob", id).unwrap();
        assert_eq!(registry.owner_of(id).unwrap(), "bob");
    }

    #[test]
    fn unapproved_operator_rejected() {
        let mut registry = InMemoryDeedRegistry::new("registry");
        let id = registry.mint("alice", "uri").unwrap();
        let result = registry.transfer_from("escrow", "alice", "escrow", id);
        assert!(matches!(result, Err(RegistryError::NotAuthorized { .. })));
        assert_eq!(registry.owner_of(id).unwrap(), "alice");
    }

    #[test]
    fn transfer_from_wrong_owner_rejected() {
        let mut registry = InMemoryDeedRegistry::new("registry");
        let id = registry.mint("alice", "uri").unwrap();
        let result = registry.transfer_from("bob", "bob", "carol", id);
        assert!(matches!(result, Err(RegistryError::FromNotOwner { .. })));
    }
}
