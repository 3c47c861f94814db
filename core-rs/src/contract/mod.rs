//! Pact contracts as read from disk
//!
//! The harness never interprets interactions: they are carried as opaque
//! JSON values from the contract file to the mock service.

mod loader;
mod split;

pub use loader::ContractLoader;
pub use split::{split_bulk_file, RequestFilter};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::errors::{HarnessError, Result};
use crate::stub::StubKey;

/// Named party of a contract
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pacticipant {
    pub name: String,
}

/// A consumer's expectations of one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub provider: Pacticipant,
    pub consumer: Pacticipant,
    #[serde(default)]
    pub interactions: Vec<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
}

impl Contract {
    pub fn new(provider: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            provider: Pacticipant { name: provider.into() },
            consumer: Pacticipant { name: consumer.into() },
            interactions: Vec::new(),
            metadata: None,
        }
    }

    pub fn with_interaction(mut self, interaction: JsonValue) -> Self {
        self.interactions.push(interaction);
        self
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| HarnessError::Contract(format!("Invalid contract: {}", e)))
    }

    /// The stub key this contract is served by
    pub fn key(&self) -> StubKey {
        StubKey::new(&self.provider.name, &self.consumer.name)
    }

    /// One contract per interaction, metadata carried over
    ///
    /// A single-interaction contract comes back unchanged; an empty one
    /// yields nothing.
    pub fn split(&self) -> Vec<Contract> {
        if self.interactions.len() <= 1 {
            return self.interactions.iter().map(|_| self.clone()).collect();
        }

        self.interactions
            .iter()
            .map(|interaction| Contract {
                provider: self.provider.clone(),
                consumer: self.consumer.clone(),
                interactions: vec![interaction.clone()],
                metadata: self.metadata.clone(),
            })
            .collect()
    }
}

/// Merge contracts that share a (provider, consumer) pair
///
/// Interactions are concatenated; pairs keep the order in which they were
/// first seen.
pub fn group_by_pair<I>(contracts: I) -> Vec<Contract>
where
    I: IntoIterator<Item = Contract>,
{
    let mut grouped: Vec<Contract> = Vec::new();

    for contract in contracts {
        let key = contract.key();
        match grouped.iter_mut().find(|c| c.key() == key) {
            Some(existing) => existing.interactions.extend(contract.interactions),
            None => grouped.push(Contract {
                metadata: None,
                ..contract
            }),
        }
    }

    grouped
}
