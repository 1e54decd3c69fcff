//! Account registry.
//!
//! Room parameters refer to their owning account by [`AccountId`] and resolve
//! it here, so a parameter object never holds the account alive.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::Address;

/// Identifier of a registered account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub Uuid);

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A SIP account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub identity: Address,
    /// Default conference factory used when creating server-hosted rooms.
    pub conference_factory: Option<Address>,
}

impl Account {
    pub fn new(identity: Address, conference_factory: Option<Address>) -> Self {
        Self {
            id: AccountId(Uuid::new_v4()),
            identity,
            conference_factory,
        }
    }
}

/// Accounts known to the client.
#[derive(Debug, Default)]
pub struct AccountRegistry {
    accounts: HashMap<AccountId, Account>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account, replacing any account with the same id.
    pub fn register(&mut self, account: Account) -> AccountId {
        let id = account.id;
        self.accounts.insert(id, account);
        id
    }

    pub fn remove(&mut self, id: AccountId) -> Option<Account> {
        self.accounts.remove(&id)
    }

    pub fn get(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    /// Mutable access, e.g. to update the identity after re-registration.
    pub fn get_mut(&mut self, id: AccountId) -> Option<&mut Account> {
        self.accounts.get_mut(&id)
    }

    /// Find the account whose identity weakly matches `identity`.
    pub fn find_by_identity(&self, identity: &Address) -> Option<&Account> {
        self.accounts
            .values()
            .find(|account| account.identity.weak_equal(identity))
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
