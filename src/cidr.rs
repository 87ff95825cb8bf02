//! Authorized network reconciliation
//!
//! The allow-list is treated as a set of exact CIDR strings. Reconciliation
//! only ever touches the runner entry; rendering always enables the feature
//! and emits blocks in ascending lexicographic order so repeated runs produce
//! the same payload.

use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// What to do with the runner address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Action {
    /// Add the runner address
    #[default]
    #[value(name = "allow")]
    Add,
    /// Remove the runner address
    #[value(name = "cleanup")]
    Remove,
}

/// One allow-list entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CidrBlock {
    pub cidr_block: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl CidrBlock {
    pub fn new(cidr: impl Into<String>) -> Self {
        Self {
            cidr_block: cidr.into(),
            display_name: None,
        }
    }
}

/// Master authorized networks of one cluster, in the container API's shape
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizedNetworksConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cidr_blocks: Vec<CidrBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp_public_cidrs_access_enabled: Option<bool>,
}

impl AuthorizedNetworksConfig {
    /// The CIDR strings currently on the list
    pub fn cidrs(&self) -> BTreeSet<String> {
        self.cidr_blocks
            .iter()
            .map(|b| b.cidr_block.clone())
            .collect()
    }

    /// Build the desired config from a reconciled set.
    ///
    /// Display names of surviving entries are taken from `self`.
    pub fn render(&self, cidrs: &BTreeSet<String>) -> AuthorizedNetworksConfig {
        let names: HashMap<&str, &str> = self
            .cidr_blocks
            .iter()
            .filter_map(|b| Some((b.cidr_block.as_str(), b.display_name.as_deref()?)))
            .collect();

        // BTreeSet iteration is already ascending
        let cidr_blocks = cidrs
            .iter()
            .map(|cidr| CidrBlock {
                cidr_block: cidr.clone(),
                display_name: names.get(cidr.as_str()).map(|n| n.to_string()),
            })
            .collect();

        AuthorizedNetworksConfig {
            enabled: true,
            cidr_blocks,
            gcp_public_cidrs_access_enabled: self.gcp_public_cidrs_access_enabled,
        }
    }
}

/// `/32` entry for the runner address
pub fn runner_cidr(ip: Ipv4Addr) -> String {
    format!("{}/32", ip)
}

/// Compute the desired CIDR set
pub fn reconcile(current: &BTreeSet<String>, runner: &str, action: Action) -> BTreeSet<String> {
    let mut desired = current.clone();
    match action {
        Action::Add => {
            desired.insert(runner.to_string());
        }
        Action::Remove => {
            desired.remove(runner);
        }
    }
    desired
}
