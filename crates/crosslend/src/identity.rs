//! identity resolver
//!
//! maps chain addresses to one logical user. an address that was never
//! linked acts as its own identity. identities are only ever created or
//! extended by `link`, never merged and never deleted.

use crate::chain::{Address, Chain, PerChain};
use crate::{new_id, Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

pub type IdentityId = String;

/// a logical user spanning linked chain addresses
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Identity {
    pub id: IdentityId,
    pub primary_address: Address,
    /// most recently linked address per chain
    pub linked: PerChain<Option<Address>>,
    /// every member address, in join order
    pub members: Vec<Address>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    /// primary first, then the other members in join order
    pub fn addresses(&self) -> Vec<Address> {
        let mut out = vec![self.primary_address.clone()];
        out.extend(
            self.members
                .iter()
                .filter(|a| **a != self.primary_address)
                .cloned(),
        );
        out
    }
}

/// how one address appears to the outside
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Profile {
    pub address: Address,
    pub chain: Option<Chain>,
    pub linked: bool,
    pub identity_id: Option<IdentityId>,
    pub primary_address: Address,
    pub addresses: Vec<Address>,
}

/// identity store; each address maps to at most one identity
#[derive(Debug, Default)]
pub struct IdentityDirectory {
    identities: HashMap<IdentityId, Identity>,
    by_address: HashMap<Address, IdentityId>,
}

impl IdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Identity> {
        self.identities.get(id)
    }

    pub fn by_address(&self, address: &Address) -> Option<&Identity> {
        self.by_address
            .get(address)
            .and_then(|id| self.identities.get(id))
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// all identities, oldest first
    pub fn all(&self) -> Vec<&Identity> {
        let mut all: Vec<_> = self.identities.values().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// every address of the identity owning `address` (just `address` if unlinked)
    pub fn resolve_all_addresses(&self, address: &Address) -> Vec<Address> {
        match self.by_address(address) {
            Some(identity) => identity.addresses(),
            None => vec![address.clone()],
        }
    }

    /// requester may act on resources owned by `owner`
    pub fn can_access(&self, requester: &Address, owner: &Address) -> bool {
        if requester == owner {
            return true;
        }
        match (self.by_address.get(requester), self.by_address.get(owner)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// the address linked to `address` on `chain`, if any
    pub fn linked_address(&self, address: &Address, chain: Chain) -> Option<&Address> {
        self.by_address(address)
            .and_then(|identity| identity.linked[chain].as_ref())
    }

    pub fn profile(&self, address: &Address) -> Profile {
        match self.by_address(address) {
            Some(identity) => Profile {
                address: address.clone(),
                chain: address.chain(),
                linked: true,
                identity_id: Some(identity.id.clone()),
                primary_address: identity.primary_address.clone(),
                addresses: identity.addresses(),
            },
            None => Profile {
                address: address.clone(),
                chain: address.chain(),
                linked: false,
                identity_id: None,
                primary_address: address.clone(),
                addresses: vec![address.clone()],
            },
        }
    }

    /// link two addresses on different chains into one identity
    ///
    /// - both already in the same identity: returned unchanged
    /// - in two different identities: Conflict, nothing touched
    /// - one has an identity: the other address is added to it
    /// - neither: a new identity with `primary` (default `first`)
    ///
    /// every check runs before the first write.
    pub fn link(
        &mut self,
        first: &Address,
        second: &Address,
        primary: Option<&Address>,
        now: DateTime<Utc>,
    ) -> Result<Identity> {
        let first_chain = address_chain(first)?;
        let second_chain = address_chain(second)?;
        if first_chain == second_chain {
            return Err(Error::Validation(format!(
                "cannot link two {} addresses",
                first_chain
            )));
        }
        if let Some(p) = primary {
            if p != first && p != second {
                return Err(Error::Validation(format!(
                    "primary address {} is not one of the linked addresses",
                    p
                )));
            }
        }

        let first_id = self.by_address.get(first).cloned();
        let second_id = self.by_address.get(second).cloned();

        match (first_id, second_id) {
            (Some(a), Some(b)) if a == b => self
                .identities
                .get(&a)
                .cloned()
                .ok_or_else(|| Error::Internal(format!("dangling identity {}", a))),
            (Some(_), Some(_)) => Err(Error::Conflict(
                "both addresses are already linked to different users".into(),
            )),
            (Some(id), None) => self.extend(&id, second, second_chain, now),
            (None, Some(id)) => self.extend(&id, first, first_chain, now),
            (None, None) => {
                let mut linked = PerChain::default();
                linked[first_chain] = Some(first.clone());
                linked[second_chain] = Some(second.clone());
                let identity = Identity {
                    id: new_id("user"),
                    primary_address: primary.unwrap_or(first).clone(),
                    linked,
                    members: vec![first.clone(), second.clone()],
                    verified: true,
                    created_at: now,
                    updated_at: now,
                };
                self.by_address.insert(first.clone(), identity.id.clone());
                self.by_address.insert(second.clone(), identity.id.clone());
                self.identities.insert(identity.id.clone(), identity.clone());
                info!("created identity {} for {} + {}", identity.id, first, second);
                Ok(identity)
            }
        }
    }

    fn extend(
        &mut self,
        id: &str,
        address: &Address,
        chain: Chain,
        now: DateTime<Utc>,
    ) -> Result<Identity> {
        let identity = self
            .identities
            .get_mut(id)
            .ok_or_else(|| Error::Internal(format!("dangling identity {}", id)))?;

        identity.linked[chain] = Some(address.clone());
        identity.members.push(address.clone());
        identity.updated_at = now;
        let identity = identity.clone();
        self.by_address.insert(address.clone(), identity.id.clone());
        info!("linked {} to identity {}", address, identity.id);
        Ok(identity)
    }
}

fn address_chain(address: &Address) -> Result<Chain> {
    address
        .chain()
        .ok_or_else(|| Error::Validation(format!("invalid address format: {}", address)))
}
