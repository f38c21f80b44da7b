//! Error types for target resolution.

use thiserror::Error;

pub type ResolveResult<T> = Result<T, ResolveError>;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("at least one include selector is required")]
    NoIncludeSelectors,

    #[error("\"all\" cannot be used as an exclude selector")]
    ExcludeAll,

    #[error("inventory unavailable: {0}")]
    Inventory(String),
}

impl ResolveError {
    /// Errors caused by the request rather than by the inventory source.
    pub fn is_invalid_input(&self) -> bool {
        !matches!(self, Self::Inventory(_))
    }
}
