//! # Deployment Records
//!
//! A deployment config names the network, the deed registry, and the
//! coordinator's roles and policies. `deploy` derives the coordinator
//! address from it and writes a JSON record that other tooling can read
//! back to find the coordinator.

use std::fs;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use deedflow_contracts::config::{
    derive_coordinator_address, ApprovalPolicy, EscrowConfig, EscrowRoles, FinalizePolicy,
};
use deedflow_contracts::Address;

/// Input to `deploy` and `simulate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Network name, e.g. "localhost" or "sepolia".
    pub network: String,
    /// Chain id of the network.
    pub chain_id: u64,
    /// Address of the deed registry the coordinator settles against.
    pub registry: Address,
    /// Coordinator roles and policies.
    pub escrow: EscrowConfig,
}

impl DeploymentConfig {
    /// Reads and validates a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read deployment config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse deployment config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configs with blank identities.
    pub fn validate(&self) -> Result<()> {
        let roles = &self.escrow.roles;
        ensure!(!self.registry.trim().is_empty(), "registry address is empty");
        ensure!(!roles.seller.trim().is_empty(), "seller address is empty");
        ensure!(!roles.inspector.trim().is_empty(), "inspector address is empty");
        ensure!(!roles.lender.trim().is_empty(), "lender address is empty");
        Ok(())
    }
}

/// Output of `deploy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployment_id: Uuid,
    pub network: String,
    pub chain_id: u64,
    /// Derived coordinator address.
    pub coordinator: Address,
    pub registry: Address,
    pub roles: EscrowRoles,
    pub approval_policy: ApprovalPolicy,
    pub finalize_policy: FinalizePolicy,
    pub deployed_at: DateTime<Utc>,
}

impl DeploymentRecord {
    /// Builds the record for `config`.
    pub fn from_config(config: &DeploymentConfig) -> Self {
        Self {
            deployment_id: Uuid::new_v4(),
            network: config.network.clone(),
            chain_id: config.chain_id,
            coordinator: derive_coordinator_address(&config.registry, &config.escrow.roles),
            registry: config.registry.clone(),
            roles: config.escrow.roles.clone(),
            approval_policy: config.escrow.approval_policy,
            finalize_policy: config.escrow.finalize_policy,
            deployed_at: Utc::now(),
        }
    }

    /// Writes the record as pretty JSON, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("failed to encode deployment record")?;
        fs::write(path, json)
            .with_context(|| format!("failed to write deployment record {}", path.display()))?;
        Ok(())
    }
}
