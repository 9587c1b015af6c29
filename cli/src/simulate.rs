//! # Sale Simulation
//!
//! Runs the reference sale against an in-memory registry and ledger: the
//! seller mints and lists a deed, the buyer pays earnest money, the
//! inspector passes the property, all three parties approve, the lender
//! finances the remainder, and the seller settles.

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use deedflow_contracts::config::escrow_amount_for;
use deedflow_contracts::{
    Address, DeedId, DeedRegistry, EscrowCoordinator, EscrowEvent, InMemoryDeedRegistry,
    InMemoryLedger, ValueLedger,
};

use crate::deploy::DeploymentConfig;

/// Transcript of a simulated sale.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub coordinator: Address,
    pub registry: Address,
    pub deed_id: DeedId,
    pub purchase_price: u64,
    pub events: Vec<EscrowEvent>,
    /// Coordinator balance after settlement.
    pub coordinator_balance: u64,
    /// Seller balance after settlement.
    pub seller_balance: u64,
    /// Deed owner after settlement.
    pub deed_owner: Address,
}

/// Runs one complete sale of a freshly minted deed to `buyer` at `price`.
///
/// The buyer is seeded with exactly the earnest money and the lender with
/// exactly the remainder, so a successful run ends with both at zero.
pub fn run(
    config: &DeploymentConfig,
    buyer: &str,
    price: u64,
    token_uri: &str,
) -> Result<SimulationReport> {
    let roles = config.escrow.roles.clone();
    let earnest = escrow_amount_for(price);
    let financed = price - earnest;

    let mut ledger = InMemoryLedger::new();
    ledger.credit(buyer, earnest)?;
    ledger.credit(&roles.lender, financed)?;

    let mut escrow = EscrowCoordinator::new(
        config.escrow.clone(),
        InMemoryDeedRegistry::new(config.registry.clone()),
        ledger,
    );
    let coordinator = escrow.address().to_string();

    let deed_id = escrow.registry_mut().mint(&roles.seller, token_uri)?;
    escrow
        .registry_mut()
        .approve(&roles.seller, &coordinator, deed_id)?;
    info!(deed_id, seller = %roles.seller, "deed minted and approved for escrow");

    escrow.list(&roles.seller, deed_id, price, Some(buyer))?;
    escrow.deposit_earnest(buyer, deed_id, earnest)?;
    escrow.update_inspection_status(&roles.inspector, deed_id, true)?;
    escrow.approve_sale(buyer, deed_id)?;
    escrow.approve_sale(&roles.seller, deed_id)?;
    escrow.approve_sale(&roles.lender, deed_id)?;
    escrow.fund(&roles.lender, financed)?;
    escrow.finalize_sale(&roles.seller, deed_id)?;

    Ok(SimulationReport {
        coordinator,
        registry: config.registry.clone(),
        deed_id,
        purchase_price: price,
        events: escrow.events().to_vec(),
        coordinator_balance: escrow.balance(),
        seller_balance: escrow.ledger().balance_of(&roles.seller),
        deed_owner: escrow.registry().owner_of(deed_id)?,
    })
}
