//! Quoting for object names interpolated into DDL. `ALTER INDEX` cannot bind
//! object names as parameters, so every name goes through [`quote`].

use thiserror::Error;

/// sysname is nvarchar(128).
pub const MAX_IDENTIFIER_LEN: usize = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier '{0}' is longer than 128 characters")]
    TooLong(String),
    #[error("identifier {0:?} contains control characters")]
    ControlCharacter(String),
}

/// Bracket-quotes `name`, doubling any closing bracket.
pub fn quote(name: &str) -> Result<String, IdentifierError> {
    if name.is_empty() {
        return Err(IdentifierError::Empty);
    }
    if name.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(IdentifierError::TooLong(name.to_string()));
    }
    if name.chars().any(char::is_control) {
        return Err(IdentifierError::ControlCharacter(name.to_string()));
    }
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// `[schema].[object]`
pub fn quote_qualified(schema: &str, object: &str) -> Result<String, IdentifierError> {
    Ok(format!("{}.{}", quote(schema)?, quote(object)?))
}
