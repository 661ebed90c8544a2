use std::collections::HashMap;
use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

pub const ENV_CREDENTIAL_PREFIX: &str = "INDEX_REBUILD_CRED";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn redacted(&self) -> Self {
        Self {
            username: self.username.clone(),
            password: "********".to_string(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Resolves a credential reference to a username/password pair.
pub trait CredentialStore {
    fn lookup(&self, reference: &str) -> Option<Credential>;
}

/// Credentials declared in the `[credentials.<reference>]` config tables.
pub struct ConfigCredentialStore {
    entries: HashMap<String, Credential>,
}

impl ConfigCredentialStore {
    pub fn new(entries: HashMap<String, Credential>) -> Self {
        Self { entries }
    }
}

impl CredentialStore for ConfigCredentialStore {
    fn lookup(&self, reference: &str) -> Option<Credential> {
        self.entries.get(reference).cloned()
    }
}

/// Reads `<PREFIX>_<REFERENCE>_USERNAME` and `<PREFIX>_<REFERENCE>_PASSWORD`.
pub struct EnvCredentialStore {
    prefix: String,
}

impl EnvCredentialStore {
    pub fn new() -> Self {
        Self::with_prefix(ENV_CREDENTIAL_PREFIX)
    }

    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    pub fn variable_name(&self, reference: &str, field: &str) -> String {
        let reference: String = reference
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}_{}_{}", self.prefix, reference, field)
    }
}

impl Default for EnvCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for EnvCredentialStore {
    fn lookup(&self, reference: &str) -> Option<Credential> {
        let username = env::var(self.variable_name(reference, "USERNAME")).ok()?;
        let password = env::var(self.variable_name(reference, "PASSWORD")).ok()?;
        Some(Credential { username, password })
    }
}

/// Tries each store in order; the first hit wins.
#[derive(Default)]
pub struct ChainedCredentialStore {
    stores: Vec<Box<dyn CredentialStore>>,
}

impl ChainedCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, store: impl CredentialStore + 'static) -> Self {
        self.stores.push(Box::new(store));
        self
    }
}

impl CredentialStore for ChainedCredentialStore {
    fn lookup(&self, reference: &str) -> Option<Credential> {
        self.stores.iter().find_map(|store| store.lookup(reference))
    }
}

pub fn resolve(store: &dyn CredentialStore, reference: &str) -> Result<Credential> {
    match store.lookup(reference) {
        Some(credential) => {
            debug!("Resolved credential '{}' as user '{}'", reference, credential.username);
            Ok(credential)
        }
        None => Err(Error::CredentialNotFound(reference.to_string())),
    }
}
