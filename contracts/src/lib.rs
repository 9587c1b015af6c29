// Copyright (c) 2026 DeedFlow Contributors. MIT License.
// See LICENSE for details.

//! # DeedFlow Contracts
//!
//! Settlement logic for real-estate deed sales. A deed token only changes
//! hands after the seller lists it, the buyer posts earnest money, the
//! inspector signs off, and buyer, seller and lender all approve:
//!
//! - **Escrow** — the coordinator that owns every listing, gates each
//!   transition by caller role, and holds funds until settlement.
//! - **Deed Registry** — the custody interface the coordinator calls into,
//!   with an in-memory implementation for tests and simulation.
//! - **Ledger** — native balances through which earnest money, lender
//!   financing, and the seller's payout move.
//!
//! ## Design Principles
//!
//! 1. All monetary operations check for overflow. `checked_add` and
//!    `checked_sub` everywhere.
//! 2. Every operation validates all of its preconditions before it mutates
//!    anything. A rejected call leaves no trace.
//! 3. The caller is an explicit argument, never ambient context.
//! 4. Every public type is serializable (serde) for transcripts and
//!    deployment records.

pub mod config;
pub mod deed_registry;
pub mod escrow;
pub mod ledger;

/// An account identity, conventionally a `0x`-prefixed hex address.
pub type Address = String;

pub use deed_registry::{DeedId, DeedRegistry, InMemoryDeedRegistry, RegistryError};
pub use escrow::{EscrowCoordinator, EscrowError, EscrowEvent, Listing, ListingStage};
pub use ledger::{InMemoryLedger, LedgerError, ValueLedger};
