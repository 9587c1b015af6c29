//! # Escrow Configuration & Constants
//!
//! Protocol numbers live at the top of this module. Everything fixed at
//! coordinator construction (the three global roles and the two policy
//! switches) lives in [`EscrowConfig`], which is immutable once the
//! coordinator is built.

use serde::{Deserialize, Serialize};

use crate::Address;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Basis-point denominator. 10_000 bp = 100%.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Earnest money as a share of the purchase price, in basis points.
/// 1_000 bp = 10%.
pub const ESCROW_BPS: u64 = 1_000;

/// Smallest price whose earnest amount is non-zero.
pub const MIN_PURCHASE_PRICE: u64 = BPS_DENOMINATOR / ESCROW_BPS;

/// Domain separator mixed into coordinator address derivation so that the
/// same inputs hashed for another purpose never collide with an address.
pub const ADDRESS_DOMAIN: &[u8] = b"deedflow/escrow-coordinator/v1";

/// Number of hash bytes kept for a derived address (EVM-style, 20 bytes).
pub const ADDRESS_LENGTH: usize = 20;

// ---------------------------------------------------------------------------
// Roles & policies
// ---------------------------------------------------------------------------

/// The process-wide identities of a coordinator. Set once, never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRoles {
    /// The only identity allowed to list deeds; receives the sale proceeds.
    pub seller: Address,
    /// The only identity allowed to record inspection results.
    pub inspector: Address,
    /// Finances the balance of the purchase price and must approve the sale.
    pub lender: Address,
}

impl EscrowRoles {
    /// Whether `who` is the seller, inspector, or lender.
    pub fn holds_role(&self, who: &str) -> bool {
        who == self.seller || who == self.inspector || who == self.lender
    }
}

/// Who may flag approval on a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    /// Only the buyer, seller, and lender may approve.
    #[default]
    ParticipantsOnly,
    /// Any identity may record an approval flag. Only the buyer, seller, and
    /// lender flags gate finalization.
    Open,
}

/// Who may close a sale once every gate is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizePolicy {
    /// Only the seller may finalize.
    #[default]
    SellerOnly,
    /// Any identity may finalize.
    AnyCaller,
}

/// Immutable construction-time configuration for an escrow coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// The global seller, inspector, and lender.
    pub roles: EscrowRoles,
    /// Approval gating, see [`ApprovalPolicy`].
    #[serde(default)]
    pub approval_policy: ApprovalPolicy,
    /// Finalization gating, see [`FinalizePolicy`].
    #[serde(default)]
    pub finalize_policy: FinalizePolicy,
}

impl EscrowConfig {
    /// Builds a config with default policies.
    pub fn new(
        seller: impl Into<Address>,
        inspector: impl Into<Address>,
        lender: impl Into<Address>,
    ) -> Self {
        Self {
            roles: EscrowRoles {
                seller: seller.into(),
                inspector: inspector.into(),
                lender: lender.into(),
            },
            approval_policy: ApprovalPolicy::default(),
            finalize_policy: FinalizePolicy::default(),
        }
    }

    /// Parses a config from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Earnest money owed on a listing at `purchase_price`.
///
/// Floor division over the full `u64` price range. The product is widened
/// to `u128`; the quotient never exceeds `purchase_price`.
pub fn escrow_amount_for(purchase_price: u64) -> u64 {
    let scaled = u128::from(purchase_price) * u128::from(ESCROW_BPS);
    (scaled / u128::from(BPS_DENOMINATOR)) as u64
}

/// Derives the address a coordinator holds funds and deeds under.
///
/// Deterministic in the registry address and the three roles, so a
/// deployment record can be re-derived from its config.
pub fn derive_coordinator_address(registry: &str, roles: &EscrowRoles) -> Address {
    let mut hasher = blake3::Hasher::new();
    hasher.update(ADDRESS_DOMAIN);
    for part in [
        registry,
        roles.seller.as_str(),
        roles.inspector.as_str(),
        roles.lender.as_str(),
    ] {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    format!("0x{}", hex::encode(&digest.as_bytes()[..ADDRESS_LENGTH]))
}
