//! # Escrow Coordinator
//!
//! Governs the sale of a deed token between a fixed seller and a buyer,
//! with an inspector and a lender in the loop. The lifecycle of one
//! listing is:
//!
//! 1. **List** — the seller names a price (and optionally the buyer). The
//!    deed moves into the coordinator's custody.
//! 2. **Deposit earnest** — the buyer pays the earnest amount (10% of the
//!    price) into escrow.
//! 3. **Inspect** — the inspector records whether the property passed.
//! 4. **Approve** — buyer, seller, and lender each approve the sale.
//! 5. **Finalize** — once inspection passed, all three approved, and the
//!    coordinator holds at least the purchase price, the seller is paid
//!    and the deed goes to the buyer.
//!
//! Steps 2 to 4 may happen in any order. Nothing is ever reset: a
//! finalized listing stays on record and rejects further mutation.
//!
//! The remainder of the purchase price reaches the coordinator through
//! [`EscrowCoordinator::fund`], typically called by the lender.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{
    derive_coordinator_address, escrow_amount_for, ApprovalPolicy, EscrowConfig, EscrowRoles,
    FinalizePolicy, MIN_PURCHASE_PRICE,
};
use crate::deed_registry::{DeedId, DeedRegistry, RegistryError};
use crate::ledger::{LedgerError, ValueLedger};
use crate::Address;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Broad category of an [`EscrowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The caller does not hold the role the operation requires.
    Authorization,
    /// The listing is not in a state that allows the operation.
    State,
    /// Value attached to the call, or held by the coordinator, is wrong.
    Funds,
    /// The deed registry rejected a custody change.
    Custody,
}

/// Errors that can occur during escrow operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EscrowError {
    /// Only the seller may list (and, by default, finalize).
    #[error("Only a seller can call this function.")]
    NotSeller {
        /// The identity that attempted the call.
        caller: Address,
    },

    /// Only the listing's buyer may deposit earnest money.
    #[error("Only the buyer can call this function")]
    NotBuyer {
        /// The identity that attempted the call.
        caller: Address,
    },

    /// Only the inspector may record inspection results.
    #[error("Only the inspector can call this function")]
    NotInspector {
        /// The identity that attempted the call.
        caller: Address,
    },

    /// The seller, inspector, and lender cannot also be the buyer.
    #[error("{buyer} holds a coordinator role and cannot be the buyer")]
    ConflictingBuyer {
        /// The identity proposed or acting as buyer.
        buyer: Address,
    },

    /// The caller is not the buyer, seller, or lender of this sale.
    #[error("{caller} is not a party to the sale and cannot approve it")]
    UnauthorizedApprover {
        /// The identity that attempted the call.
        caller: Address,
    },

    /// The deed already has a listing.
    #[error("This token is already listed.")]
    AlreadyListed(DeedId),

    /// No listing exists for the deed.
    #[error("no listing exists for deed {0}")]
    ListingNotFound(DeedId),

    /// The inspector has not passed the property.
    #[error("inspection has not passed for deed {0}")]
    InspectionNotPassed(DeedId),

    /// One or more of buyer, seller, and lender have not approved.
    #[error("sale of deed {deed_id} is missing approval from {}", .missing.join(", "))]
    ApprovalIncomplete {
        /// The deed being finalized.
        deed_id: DeedId,
        /// Roles whose approval is outstanding.
        missing: Vec<String>,
    },

    /// The sale has already settled.
    #[error("sale of deed {0} is already finalized")]
    SaleFinalized(DeedId),

    /// The coordinator does not hold enough value to pay the seller.
    #[error("insufficient escrow balance: holding {available}, purchase price is {required}")]
    InsufficientBalance {
        /// The purchase price.
        required: u64,
        /// The coordinator's current balance.
        available: u64,
    },

    /// The earnest deposit must equal the listing's escrow amount exactly.
    #[error("earnest deposit must be exactly {expected}, got {provided}")]
    EarnestMismatch {
        /// The listing's escrow amount.
        expected: u64,
        /// The value attached to the call.
        provided: u64,
    },

    /// The earnest money for this listing has already been paid.
    #[error("earnest money for deed {0} has already been deposited")]
    EarnestAlreadyDeposited(DeedId),

    /// A value-bearing call carried no value.
    #[error("call must carry a non-zero value")]
    ZeroValue,

    /// The purchase price is too small to carry any earnest money.
    #[error("purchase price {price} is below the minimum of {minimum}")]
    PriceBelowMinimum {
        /// The price offered.
        price: u64,
        /// The smallest accepted price.
        minimum: u64,
    },

    /// The ledger rejected a value transfer.
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    /// The deed registry rejected a custody change.
    #[error("deed registry: {0}")]
    Registry(#[from] RegistryError),

    /// Settlement failed and the seller's payout could not be reversed.
    #[error("deed {deed_id} settlement failed ({transfer}) and payout rollback failed ({rollback})")]
    RollbackFailed {
        /// The deed being finalized.
        deed_id: DeedId,
        /// Why the deed transfer failed.
        transfer: RegistryError,
        /// Why the compensating transfer failed.
        rollback: LedgerError,
    },
}

impl EscrowError {
    /// The category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EscrowError::NotSeller { .. }
            | EscrowError::NotBuyer { .. }
            | EscrowError::NotInspector { .. }
            | EscrowError::ConflictingBuyer { .. }
            | EscrowError::UnauthorizedApprover { .. } => ErrorKind::Authorization,
            EscrowError::AlreadyListed(_)
            | EscrowError::ListingNotFound(_)
            | EscrowError::InspectionNotPassed(_)
            | EscrowError::ApprovalIncomplete { .. }
            | EscrowError::SaleFinalized(_) => ErrorKind::State,
            EscrowError::InsufficientBalance { .. }
            | EscrowError::EarnestMismatch { .. }
            | EscrowError::EarnestAlreadyDeposited(_)
            | EscrowError::ZeroValue
            | EscrowError::PriceBelowMinimum { .. }
            | EscrowError::Ledger(_) => ErrorKind::Funds,
            EscrowError::Registry(_) | EscrowError::RollbackFailed { .. } => ErrorKind::Custody,
        }
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Whether a listing is still open or has settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingStatus {
    /// Listed and awaiting settlement.
    Active,
    /// Settled. Terminal.
    Finalized,
}

impl std::fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListingStatus::Active => write!(f, "Active"),
            ListingStatus::Finalized => write!(f, "Finalized"),
        }
    }
}

/// How far a listing has progressed. Deposit, inspection, and approvals may
/// land in any order; the furthest satisfied step is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingStage {
    /// No listing exists for the deed.
    Unlisted,
    /// Listed, nothing else recorded yet.
    Listed,
    /// The buyer's earnest money is in escrow.
    EarnestDeposited,
    /// The inspector has passed the property.
    InspectionRecorded,
    /// Between one and three of buyer, seller, and lender have approved.
    Approved {
        /// Number of gating approvals recorded.
        approvals: u8,
    },
    /// Settled. Terminal.
    Finalized,
}

/// The per-deed record governing one sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// The deed being sold.
    pub deed_id: DeedId,
    /// True once created. Never reset.
    pub is_listed: bool,
    /// Agreed price. Fixed at listing time.
    pub purchase_price: u64,
    /// Earnest money owed by the buyer. Fixed at listing time.
    pub escrow_amount: u64,
    /// The buyer, once bound. Bound at listing or by the first deposit.
    pub buyer: Option<Address>,
    /// Latest inspection result.
    pub inspection_passed: bool,
    /// Approval flags keyed by approver.
    pub approvals: BTreeMap<Address, bool>,
    /// Earnest money received for this listing.
    pub earnest_deposited: u64,
    /// When the earnest money arrived.
    pub earnest_deposited_at: Option<DateTime<Utc>>,
    /// Lifecycle status.
    pub status: ListingStatus,
    /// Timestamp when the deed was listed.
    pub listed_at: DateTime<Utc>,
    /// Timestamp of the most recent state change.
    pub updated_at: DateTime<Utc>,
    /// Timestamp of settlement.
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Listing {
    /// Whether `who` has approved this sale.
    pub fn approved_by(&self, who: &str) -> bool {
        self.approvals.get(who).copied().unwrap_or(false)
    }

    /// Whether the listing has settled.
    pub fn is_finalized(&self) -> bool {
        self.status == ListingStatus::Finalized
    }

    fn ensure_active(&self) -> Result<(), EscrowError> {
        if self.is_finalized() {
            return Err(EscrowError::SaleFinalized(self.deed_id));
        }
        Ok(())
    }

    /// Roles among buyer, seller, and lender that have not approved yet.
    fn missing_approvals(&self, roles: &EscrowRoles) -> Vec<String> {
        let buyer_approved = self
            .buyer
            .as_deref()
            .map_or(false, |buyer| self.approved_by(buyer));

        [
            ("buyer", buyer_approved),
            ("seller", self.approved_by(&roles.seller)),
            ("lender", self.approved_by(&roles.lender)),
        ]
        .into_iter()
        .filter(|(_, approved)| !approved)
        .map(|(role, _)| role.to_string())
        .collect()
    }
}

/// Record of a successful coordinator call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EscrowEvent {
    /// A deed entered escrow.
    Listed {
        /// The listed deed.
        deed_id: DeedId,
        /// Agreed price.
        purchase_price: u64,
        /// Earnest money owed by the buyer.
        escrow_amount: u64,
        /// The buyer named at listing, if any.
        buyer: Option<Address>,
        /// When the listing was created.
        at: DateTime<Utc>,
    },
    /// The buyer paid the earnest money.
    EarnestDeposited {
        /// The listing the deposit belongs to.
        deed_id: DeedId,
        /// The depositor, now the bound buyer.
        buyer: Address,
        /// Value moved into escrow.
        amount: u64,
        /// When the deposit landed.
        at: DateTime<Utc>,
    },
    /// The inspector recorded a result.
    InspectionUpdated {
        /// The inspected deed.
        deed_id: DeedId,
        /// The recorded result.
        passed: bool,
        /// When the result was recorded.
        at: DateTime<Utc>,
    },
    /// A party approved the sale.
    SaleApproved {
        /// The deed whose sale was approved.
        deed_id: DeedId,
        /// Who approved.
        approver: Address,
        /// When the approval was recorded.
        at: DateTime<Utc>,
    },
    /// Value was sent to the coordinator outside of an earnest deposit.
    Funded {
        /// The sender.
        from: Address,
        /// Value moved into escrow.
        amount: u64,
        /// When the value arrived.
        at: DateTime<Utc>,
    },
    /// The sale settled.
    SaleFinalized {
        /// The settled deed.
        deed_id: DeedId,
        /// New owner of the deed.
        buyer: Address,
        /// Recipient of the purchase price.
        seller: Address,
        /// Value paid out of escrow.
        purchase_price: u64,
        /// When settlement completed.
        at: DateTime<Utc>,
    },
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// The escrow coordinator.
///
/// Owns every [`Listing`], holds value under its own address in the
/// injected [`ValueLedger`], and moves deeds through the injected
/// [`DeedRegistry`]. Every mutating call takes `&mut self` and names its
/// caller explicitly.
#[derive(Debug)]
pub struct EscrowCoordinator<R, L> {
    address: Address,
    config: EscrowConfig,
    registry: R,
    ledger: L,
    listings: BTreeMap<DeedId, Listing>,
    events: Vec<EscrowEvent>,
}

impl<R: DeedRegistry, L: ValueLedger> EscrowCoordinator<R, L> {
    /// Creates a coordinator bound to `registry` and `ledger`.
    ///
    /// The coordinator's address is derived from the registry address and
    /// the configured roles.
    pub fn new(config: EscrowConfig, registry: R, ledger: L) -> Self {
        let address = derive_coordinator_address(registry.address(), &config.roles);
        info!(
            coordinator = %address,
            registry = registry.address(),
            seller = %config.roles.seller,
            inspector = %config.roles.inspector,
            lender = %config.roles.lender,
            "escrow coordinator created"
        );
        Self {
            address,
            config,
            registry,
            ledger,
            listings: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    // -- accessors ----------------------------------------------------------

    /// Address the coordinator holds deeds and value under.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The global seller.
    pub fn seller(&self) -> &str {
        &self.config.roles.seller
    }

    /// The global inspector.
    pub fn inspector(&self) -> &str {
        &self.config.roles.inspector
    }

    /// The global lender.
    pub fn lender(&self) -> &str {
        &self.config.roles.lender
    }

    /// Address of the deed registry this coordinator settles against.
    pub fn registry_address(&self) -> &str {
        self.registry.address()
    }

    /// Roles and policies fixed at construction.
    pub fn config(&self) -> &EscrowConfig {
        &self.config
    }

    /// The deed registry.
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Direct registry access for parties acting outside the coordinator
    /// (minting, approving the coordinator before listing).
    pub fn registry_mut(&mut self) -> &mut R {
        &mut self.registry
    }

    /// The value ledger.
    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Direct ledger access, e.g. for crediting parties before a sale.
    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    /// Snapshot of the listing for `deed_id`, if one exists.
    pub fn listing(&self, deed_id: DeedId) -> Option<&Listing> {
        self.listings.get(&deed_id)
    }

    /// Whether `who` has approved the sale of `deed_id`.
    pub fn approval_state(&self, deed_id: DeedId, who: &str) -> bool {
        self.listings
            .get(&deed_id)
            .map_or(false, |listing| listing.approved_by(who))
    }

    /// Value currently held by the coordinator.
    pub fn balance(&self) -> u64 {
        self.ledger.balance_of(&self.address)
    }

    /// Every successful call so far, oldest first.
    pub fn events(&self) -> &[EscrowEvent] {
        &self.events
    }

    /// How far the sale of `deed_id` has progressed.
    pub fn stage(&self, deed_id: DeedId) -> ListingStage {
        let Some(listing) = self.listings.get(&deed_id) else {
            return ListingStage::Unlisted;
        };
        if listing.is_finalized() {
            return ListingStage::Finalized;
        }

        let approvals = 3 - listing.missing_approvals(&self.config.roles).len() as u8;
        if approvals > 0 {
            ListingStage::Approved { approvals }
        } else if listing.inspection_passed {
            ListingStage::InspectionRecorded
        } else if listing.earnest_deposited_at.is_some() {
            ListingStage::EarnestDeposited
        } else {
            ListingStage::Listed
        }
    }

    // -- operations ---------------------------------------------------------

    /// Lists `deed_id` for sale at `purchase_price`.
    ///
    /// The seller must have approved the coordinator's address on the
    /// registry beforehand; the deed moves into the coordinator's custody.
    /// When `buyer` is `None`, the first earnest depositor becomes the buyer.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::NotSeller`] if `caller` is not the seller.
    /// Returns [`EscrowError::AlreadyListed`] if the deed is already listed.
    /// Returns [`EscrowError::ConflictingBuyer`] if `buyer` is the seller,
    /// inspector, or lender.
    /// Returns [`EscrowError::PriceBelowMinimum`] if the price would carry
    /// no earnest money.
    /// Returns [`EscrowError::Registry`] if the custody transfer is refused.
    pub fn list(
        &mut self,
        caller: &str,
        deed_id: DeedId,
        purchase_price: u64,
        buyer: Option<&str>,
    ) -> Result<(), EscrowError> {
        let result = self.try_list(caller, deed_id, purchase_price, buyer);
        rejected("list", caller, deed_id, result)
    }

    fn try_list(
        &mut self,
        caller: &str,
        deed_id: DeedId,
        purchase_price: u64,
        buyer: Option<&str>,
    ) -> Result<(), EscrowError> {
        if caller != self.config.roles.seller {
            return Err(EscrowError::NotSeller {
                caller: caller.to_string(),
            });
        }
        if self.listings.contains_key(&deed_id) {
            return Err(EscrowError::AlreadyListed(deed_id));
        }
        if let Some(buyer) = buyer.filter(|buyer| self.config.roles.holds_role(buyer)) {
            return Err(EscrowError::ConflictingBuyer {
                buyer: buyer.to_string(),
            });
        }
        if purchase_price < MIN_PURCHASE_PRICE {
            return Err(EscrowError::PriceBelowMinimum {
                price: purchase_price,
                minimum: MIN_PURCHASE_PRICE,
            });
        }
        let escrow_amount = escrow_amount_for(purchase_price);

        self.registry
            .transfer_from(&self.address, caller, &self.address, deed_id)?;

        let now = Utc::now();
        let buyer = buyer.map(str::to_string);
        self.listings.insert(
            deed_id,
            Listing {
                deed_id,
                is_listed: true,
                purchase_price,
                escrow_amount,
                buyer: buyer.clone(),
                inspection_passed: false,
                approvals: BTreeMap::new(),
                earnest_deposited: 0,
                earnest_deposited_at: None,
                status: ListingStatus::Active,
                listed_at: now,
                updated_at: now,
                finalized_at: None,
            },
        );
        self.events.push(EscrowEvent::Listed {
            deed_id,
            purchase_price,
            escrow_amount,
            buyer: buyer.clone(),
            at: now,
        });

        info!(
            deed_id,
            purchase_price,
            escrow_amount,
            buyer = buyer.as_deref().unwrap_or("<unbound>"),
            "deed listed"
        );
        Ok(())
    }

    /// Buyer pays the earnest money for `deed_id`.
    ///
    /// `value` must equal the listing's escrow amount, and may be paid once.
    /// If the listing has no buyer yet, `caller` becomes the buyer.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::ListingNotFound`] if the deed is not listed.
    /// Returns [`EscrowError::NotBuyer`] if a different buyer is bound.
    /// Returns [`EscrowError::ConflictingBuyer`] if the listing is unbound
    /// and `caller` is the seller, inspector, or lender.
    /// Returns [`EscrowError::ZeroValue`] if `value` is zero.
    /// Returns [`EscrowError::EarnestMismatch`] if `value` is not the escrow amount.
    /// Returns [`EscrowError::Ledger`] if the caller cannot cover `value`.
    pub fn deposit_earnest(
        &mut self,
        caller: &str,
        deed_id: DeedId,
        value: u64,
    ) -> Result<(), EscrowError> {
        let result = self.try_deposit_earnest(caller, deed_id, value);
        rejected("deposit_earnest", caller, deed_id, result)
    }

    fn try_deposit_earnest(
        &mut self,
        caller: &str,
        deed_id: DeedId,
        value: u64,
    ) -> Result<(), EscrowError> {
        let listing = self
            .listings
            .get_mut(&deed_id)
            .ok_or(EscrowError::ListingNotFound(deed_id))?;
        listing.ensure_active()?;

        match listing.buyer.as_deref() {
            Some(buyer) if buyer != caller => {
                return Err(EscrowError::NotBuyer {
                    caller: caller.to_string(),
                });
            }
            None if self.config.roles.holds_role(caller) => {
                return Err(EscrowError::ConflictingBuyer {
                    buyer: caller.to_string(),
                });
            }
            _ => {}
        }
        if listing.earnest_deposited_at.is_some() {
            return Err(EscrowError::EarnestAlreadyDeposited(deed_id));
        }
        if value == 0 {
            return Err(EscrowError::ZeroValue);
        }
        if value != listing.escrow_amount {
            return Err(EscrowError::EarnestMismatch {
                expected: listing.escrow_amount,
                provided: value,
            });
        }

        self.ledger.transfer(caller, &self.address, value)?;

        let now = Utc::now();
        listing.buyer = Some(caller.to_string());
        listing.earnest_deposited = value;
        listing.earnest_deposited_at = Some(now);
        listing.updated_at = now;
        self.events.push(EscrowEvent::EarnestDeposited {
            deed_id,
            buyer: caller.to_string(),
            amount: value,
            at: now,
        });

        info!(deed_id, buyer = caller, amount = value, "earnest deposited");
        Ok(())
    }

    /// Inspector records whether `deed_id` passed inspection.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::NotInspector`] if `caller` is not the inspector.
    /// Returns [`EscrowError::ListingNotFound`] if the deed is not listed.
    pub fn update_inspection_status(
        &mut self,
        caller: &str,
        deed_id: DeedId,
        passed: bool,
    ) -> Result<(), EscrowError> {
        let result = self.try_update_inspection_status(caller, deed_id, passed);
        rejected("update_inspection_status", caller, deed_id, result)
    }

    fn try_update_inspection_status(
        &mut self,
        caller: &str,
        deed_id: DeedId,
        passed: bool,
    ) -> Result<(), EscrowError> {
        if caller != self.config.roles.inspector {
            return Err(EscrowError::NotInspector {
                caller: caller.to_string(),
            });
        }
        let listing = self
            .listings
            .get_mut(&deed_id)
            .ok_or(EscrowError::ListingNotFound(deed_id))?;
        listing.ensure_active()?;

        let now = Utc::now();
        listing.inspection_passed = passed;
        listing.updated_at = now;
        self.events.push(EscrowEvent::InspectionUpdated {
            deed_id,
            passed,
            at: now,
        });

        info!(deed_id, passed, "inspection status updated");
        Ok(())
    }

    /// `caller` approves the sale of `deed_id`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::ListingNotFound`] if the deed is not listed.
    /// Returns [`EscrowError::UnauthorizedApprover`] if the approval policy
    /// is [`ApprovalPolicy::ParticipantsOnly`] and `caller` is not the buyer,
    /// seller, or lender.
    pub fn approve_sale(&mut self, caller: &str, deed_id: DeedId) -> Result<(), EscrowError> {
        let result = self.try_approve_sale(caller, deed_id);
        rejected("approve_sale", caller, deed_id, result)
    }

    fn try_approve_sale(&mut self, caller: &str, deed_id: DeedId) -> Result<(), EscrowError> {
        let roles = &self.config.roles;
        let listing = self
            .listings
            .get_mut(&deed_id)
            .ok_or(EscrowError::ListingNotFound(deed_id))?;
        listing.ensure_active()?;

        if self.config.approval_policy == ApprovalPolicy::ParticipantsOnly {
            let is_party = caller == roles.seller
                || caller == roles.lender
                || listing.buyer.as_deref() == Some(caller);
            if !is_party {
                return Err(EscrowError::UnauthorizedApprover {
                    caller: caller.to_string(),
                });
            }
        }

        if listing.approved_by(caller) {
            return Ok(());
        }

        let now = Utc::now();
        listing.approvals.insert(caller.to_string(), true);
        listing.updated_at = now;
        self.events.push(EscrowEvent::SaleApproved {
            deed_id,
            approver: caller.to_string(),
            at: now,
        });

        info!(deed_id, approver = caller, "sale approved");
        Ok(())
    }

    /// Sends `value` from `caller` to the coordinator.
    ///
    /// This is how the lender finances the balance of a purchase.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::ZeroValue`] if `value` is zero.
    /// Returns [`EscrowError::Ledger`] if the caller cannot cover `value`.
    pub fn fund(&mut self, caller: &str, value: u64) -> Result<(), EscrowError> {
        let result = self.try_fund(caller, value);
        if let Err(err) = &result {
            warn!(op = "fund", caller, error = %err, "escrow call rejected");
        }
        result
    }

    fn try_fund(&mut self, caller: &str, value: u64) -> Result<(), EscrowError> {
        if value == 0 {
            return Err(EscrowError::ZeroValue);
        }
        self.ledger.transfer(caller, &self.address, value)?;

        self.events.push(EscrowEvent::Funded {
            from: caller.to_string(),
            amount: value,
            at: Utc::now(),
        });

        info!(from = caller, amount = value, balance = self.balance(), "escrow funded");
        Ok(())
    }

    /// Settles the sale of `deed_id`: the seller receives the purchase price
    /// and the buyer receives the deed.
    ///
    /// The payout happens first. If the deed transfer then fails, the payout
    /// is reversed before the error is returned, so either both effects land
    /// or neither does.
    ///
    /// The balance gate looks at everything the coordinator holds, not at
    /// value attributed to this listing. A listing without earnest can
    /// therefore settle on another listing's deposit, after which that other
    /// listing still reports `earnest_deposited` while the coordinator no
    /// longer holds it.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::ListingNotFound`] if the deed is not listed.
    /// Returns [`EscrowError::SaleFinalized`] if the sale already settled.
    /// Returns [`EscrowError::NotSeller`] under [`FinalizePolicy::SellerOnly`]
    /// when `caller` is not the seller.
    /// Returns [`EscrowError::InspectionNotPassed`] if inspection has not passed.
    /// Returns [`EscrowError::ApprovalIncomplete`] if an approval is missing.
    /// Returns [`EscrowError::InsufficientBalance`] if the coordinator holds
    /// less than the purchase price.
    /// Returns [`EscrowError::Registry`] if the deed transfer is refused and
    /// the payout was reversed.
    /// Returns [`EscrowError::RollbackFailed`] if the deed transfer is
    /// refused and the payout could not be reversed.
    pub fn finalize_sale(&mut self, caller: &str, deed_id: DeedId) -> Result<(), EscrowError> {
        let result = self.try_finalize_sale(caller, deed_id);
        rejected("finalize_sale", caller, deed_id, result)
    }

    fn try_finalize_sale(&mut self, caller: &str, deed_id: DeedId) -> Result<(), EscrowError> {
        let roles = &self.config.roles;
        let listing = self
            .listings
            .get(&deed_id)
            .ok_or(EscrowError::ListingNotFound(deed_id))?;
        listing.ensure_active()?;

        if self.config.finalize_policy == FinalizePolicy::SellerOnly && caller != roles.seller {
            return Err(EscrowError::NotSeller {
                caller: caller.to_string(),
            });
        }
        if !listing.inspection_passed {
            return Err(EscrowError::InspectionNotPassed(deed_id));
        }

        let missing = listing.missing_approvals(roles);
        let buyer = match listing.buyer.clone() {
            Some(buyer) if missing.is_empty() => buyer,
            _ => return Err(EscrowError::ApprovalIncomplete { deed_id, missing }),
        };

        let purchase_price = listing.purchase_price;
        let available = self.ledger.balance_of(&self.address);
        if available < purchase_price {
            return Err(EscrowError::InsufficientBalance {
                required: purchase_price,
                available,
            });
        }

        let seller = roles.seller.clone();
        self.ledger
            .transfer(&self.address, &seller, purchase_price)?;

        if let Err(transfer) =
            self.registry
                .transfer_from(&self.address, &self.address, &buyer, deed_id)
        {
            return match self.ledger.transfer(&seller, &self.address, purchase_price) {
                Ok(()) => {
                    warn!(deed_id, error = %transfer, "deed transfer failed, payout reversed");
                    Err(EscrowError::Registry(transfer))
                }
                Err(rollback) => Err(EscrowError::RollbackFailed {
                    deed_id,
                    transfer,
                    rollback,
                }),
            };
        }

        let now = Utc::now();
        if let Some(listing) = self.listings.get_mut(&deed_id) {
            listing.status = ListingStatus::Finalized;
            listing.finalized_at = Some(now);
            listing.updated_at = now;
        }
        self.events.push(EscrowEvent::SaleFinalized {
            deed_id,
            buyer: buyer.clone(),
            seller: seller.clone(),
            purchase_price,
            at: now,
        });

        info!(
            deed_id,
            buyer = %buyer,
            seller = %seller,
            purchase_price,
            balance = self.balance(),
            "sale finalized"
        );
        Ok(())
    }
}

/// Logs a rejected call and passes the result through.
fn rejected<T>(
    op: &'static str,
    caller: &str,
    deed_id: DeedId,
    result: Result<T, EscrowError>,
) -> Result<T, EscrowError> {
    if let Err(err) = &result {
        warn!(op, caller, deed_id, kind = ?err.kind(), error = %err, "escrow call rejected");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deed_registry::InMemoryDeedRegistry;
    use crate::ledger::InMemoryLedger;

    const SELLER: &str = "0xseller";
    const BUYER: &str = "0xbuyer";
    const INSPECTOR: &str = "0xinspector";
    const LENDER: &str = "0xlender";

    type Coordinator = EscrowCoordinator<InMemoryDeedRegistry, InMemoryLedger>;

    fn coordinator() -> Coordinator {
        let mut ledger = InMemoryLedger::new();
        ledger.credit(BUYER, 1_000).unwrap();
        ledger.credit(LENDER, 1_000).unwrap();
        EscrowCoordinator::new(
            EscrowConfig::new(SELLER, INSPECTOR, LENDER),
            InMemoryDeedRegistry::new("0xregistry"),
            ledger,
        )
    }

    /// Mints a deed to the seller, approves the coordinator, and lists it.
    fn listed(price: u64, buyer: Option<&str>) -> (Coordinator, DeedId) {
        let mut escrow = coordinator();
        let address = escrow.address().to_string();
        let id = escrow.registry_mut().mint(SELLER, "ipfs://deed").unwrap();
        escrow.registry_mut().approve(SELLER, &address, id).unwrap();
        escrow.list(SELLER, id, price, buyer).unwrap();
        (escrow, id)
    }

    #[test]
    fn list_moves_deed_into_custody() {
        let (escrow, id) = listed(100, Some(BUYER));
        assert_eq!(escrow.registry().owner_of(id).unwrap(), escrow.address());

        let listing = escrow.listing(id).unwrap();
        assert!(listing.is_listed);
        assert_eq!(listing.purchase_price, 100);
        assert_eq!(listing.escrow_amount, 10);
        assert_eq!(listing.buyer.as_deref(), Some(BUYER));
        assert!(!listing.inspection_passed);
        assert_eq!(escrow.stage(id), ListingStage::Listed);
    }

    #[test]
    fn list_without_registry_approval_creates_nothing() {
        let mut escrow = coordinator();
        let id = escrow.registry_mut().mint(SELLER, "ipfs://deed").unwrap();
        let result = escrow.list(SELLER, id, 100, Some(BUYER));
        assert!(matches!(result, Err(EscrowError::Registry(_))));
        assert!(escrow.listing(id).is_none());
        assert!(escrow.events().is_empty());
        assert_eq!(escrow.registry().owner_of(id).unwrap(), SELLER);
    }

    #[test]
    fn earnest_must_match_escrow_amount() {
        let (mut escrow, id) = listed(100, Some(BUYER));
        let result = escrow.deposit_earnest(BUYER, id, 9);
        assert_eq!(
            result,
            Err(EscrowError::EarnestMismatch {
                expected: 10,
                provided: 9
            })
        );
        assert_eq!(escrow.balance(), 0);
    }

    #[test]
    fn earnest_deposited_once() {
        let (mut escrow, id) = listed(100, Some(BUYER));
        escrow.deposit_earnest(BUYER, id, 10).unwrap();
        assert_eq!(
            escrow.deposit_earnest(BUYER, id, 10),
            Err(EscrowError::EarnestAlreadyDeposited(id))
        );
        assert_eq!(escrow.balance(), 10);
        assert_eq!(escrow.stage(id), ListingStage::EarnestDeposited);
    }

    #[test]
    fn earnest_without_funds_rejected() {
        let (mut escrow, id) = listed(100, Some("0xbroke"));
        let result = escrow.deposit_earnest("0xbroke", id, 10);
        assert!(matches!(result, Err(EscrowError::Ledger(_))));
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Funds);
        assert!(escrow.listing(id).unwrap().earnest_deposited_at.is_none());
    }

    #[test]
    fn unbound_buyer_is_bound_by_first_deposit() {
        let (mut escrow, id) = listed(100, None);
        escrow.deposit_earnest(BUYER, id, 10).unwrap();
        assert_eq!(escrow.listing(id).unwrap().buyer.as_deref(), Some(BUYER));
        assert_eq!(escrow.listing(id).unwrap().earnest_deposited, 10);
    }

    #[test]
    fn roles_cannot_bind_themselves_as_buyer() {
        let (mut escrow, id) = listed(100, None);
        for role in [SELLER, INSPECTOR, LENDER] {
            assert_eq!(
                escrow.deposit_earnest(role, id, 10),
                Err(EscrowError::ConflictingBuyer {
                    buyer: role.to_string()
                })
            );
        }
        assert!(escrow.listing(id).unwrap().buyer.is_none());
        assert_eq!(escrow.balance(), 0);
    }

    #[test]
    fn seller_cannot_settle_to_itself_with_two_approvals() {
        let (mut escrow, id) = listed(100, None);
        escrow.ledger_mut().credit(SELLER, 10).unwrap();
        assert!(escrow.deposit_earnest(SELLER, id, 10).is_err());

        escrow.update_inspection_status(INSPECTOR, id, true).unwrap();
        escrow.approve_sale(SELLER, id).unwrap();
        escrow.approve_sale(LENDER, id).unwrap();
        escrow.fund(LENDER, 100).unwrap();
        assert_eq!(
            escrow.finalize_sale(SELLER, id),
            Err(EscrowError::ApprovalIncomplete {
                deed_id: id,
                missing: vec!["buyer".to_string()],
            })
        );
        assert_eq!(escrow.registry().owner_of(id).unwrap(), escrow.address());
    }

    #[test]
    fn list_rejects_role_as_buyer() {
        let mut escrow = coordinator();
        let address = escrow.address().to_string();
        let id = escrow.registry_mut().mint(SELLER, "ipfs://deed").unwrap();
        escrow.registry_mut().approve(SELLER, &address, id).unwrap();

        let result = escrow.list(SELLER, id, 100, Some(LENDER));
        assert_eq!(
            result,
            Err(EscrowError::ConflictingBuyer {
                buyer: LENDER.to_string()
            })
        );
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Authorization);
        assert!(escrow.listing(id).is_none());
        assert_eq!(escrow.registry().owner_of(id).unwrap(), SELLER);
    }

    #[test]
    fn zero_value_earnest_rejected() {
        let (mut escrow, id) = listed(100, Some(BUYER));
        assert_eq!(escrow.deposit_earnest(BUYER, id, 0), Err(EscrowError::ZeroValue));
        assert!(escrow.listing(id).unwrap().earnest_deposited_at.is_none());
    }

    #[test]
    fn price_without_earnest_is_rejected() {
        let mut escrow = coordinator();
        let address = escrow.address().to_string();
        let id = escrow.registry_mut().mint(SELLER, "ipfs://deed").unwrap();
        escrow.registry_mut().approve(SELLER, &address, id).unwrap();

        assert_eq!(
            escrow.list(SELLER, id, 9, Some(BUYER)),
            Err(EscrowError::PriceBelowMinimum {
                price: 9,
                minimum: MIN_PURCHASE_PRICE
            })
        );
        assert!(escrow.listing(id).is_none());
    }

    #[test]
    fn large_prices_are_listed() {
        let (escrow, id) = listed(100_000_000_000_000_000, Some(BUYER));
        assert_eq!(
            escrow.listing(id).unwrap().escrow_amount,
            10_000_000_000_000_000
        );

        let (escrow, id) = listed(u64::MAX, Some(BUYER));
        assert_eq!(escrow.listing(id).unwrap().escrow_amount, u64::MAX / 10);
    }

    #[test]
    fn inspection_can_be_revised_before_settlement() {
        let (mut escrow, id) = listed(100, Some(BUYER));
        escrow.update_inspection_status(INSPECTOR, id, true).unwrap();
        assert_eq!(escrow.stage(id), ListingStage::InspectionRecorded);
        escrow.update_inspection_status(INSPECTOR, id, false).unwrap();
        assert!(!escrow.listing(id).unwrap().inspection_passed);
    }

    #[test]
    fn approval_is_idempotent() {
        let (mut escrow, id) = listed(100, Some(BUYER));
        escrow.approve_sale(BUYER, id).unwrap();
        escrow.approve_sale(BUYER, id).unwrap();
        assert!(escrow.approval_state(id, BUYER));
        let approvals = escrow
            .events()
            .iter()
            .filter(|e| matches!(e, EscrowEvent::SaleApproved { .. }))
            .count();
        assert_eq!(approvals, 1);
        assert_eq!(escrow.stage(id), ListingStage::Approved { approvals: 1 });
    }

    #[test]
    fn outsider_cannot_approve_by_default() {
        let (mut escrow, id) = listed(100, Some(BUYER));
        let result = escrow.approve_sale("0xstranger", id);
        assert!(matches!(
            result,
            Err(EscrowError::UnauthorizedApprover { .. })
        ));
        assert!(!escrow.approval_state(id, "0xstranger"));
    }

    #[test]
    fn open_policy_records_any_approval() {
        let mut config = EscrowConfig::new(SELLER, INSPECTOR, LENDER);
        config.approval_policy = ApprovalPolicy::Open;
        let mut escrow = EscrowCoordinator::new(
            config,
            InMemoryDeedRegistry::new("0xregistry"),
            InMemoryLedger::new(),
        );
        let address = escrow.address().to_string();
        let id = escrow.registry_mut().mint(SELLER, "uri").unwrap();
        escrow.registry_mut().approve(SELLER, &address, id).unwrap();
        escrow.list(SELLER, id, 100, Some(BUYER)).unwrap();

        escrow.approve_sale("0xstranger", id).unwrap();
        assert!(escrow.approval_state(id, "0xstranger"));
        assert_eq!(escrow.stage(id), ListingStage::Listed);
    }

    #[test]
    fn missing_approvals_are_named() {
        let (mut escrow, id) = listed(100, Some(BUYER));
        escrow.update_inspection_status(INSPECTOR, id, true).unwrap();
        escrow.approve_sale(SELLER, id).unwrap();
        let result = escrow.finalize_sale(SELLER, id);
        assert_eq!(
            result,
            Err(EscrowError::ApprovalIncomplete {
                deed_id: id,
                missing: vec!["buyer".to_string(), "lender".to_string()],
            })
        );
    }

    #[test]
    fn zero_value_funding_rejected() {
        let mut escrow = coordinator();
        assert_eq!(escrow.fund(LENDER, 0), Err(EscrowError::ZeroValue));
        assert!(escrow.events().is_empty());
    }

    #[test]
    fn error_kinds_group_variants() {
        assert_eq!(
            EscrowError::NotInspector {
                caller: "x".into()
            }
            .kind(),
            ErrorKind::Authorization
        );
        assert_eq!(EscrowError::AlreadyListed(1).kind(), ErrorKind::State);
        assert_eq!(
            EscrowError::InsufficientBalance {
                required: 1,
                available: 0
            }
            .kind(),
            ErrorKind::Funds
        );
        assert_eq!(
            EscrowError::Registry(RegistryError::DeedNotFound(1)).kind(),
            ErrorKind::Custody
        );
    }

    #[test]
    fn reference_messages_are_preserved() {
        let not_seller = EscrowError::NotSeller {
            caller: LENDER.into(),
        };
        assert_eq!(not_seller.to_string(), "Only a seller can call this function.");
        assert_eq!(
            EscrowError::AlreadyListed(1).to_string(),
            "This token is already listed."
        );
    }
}
