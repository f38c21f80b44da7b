//! upgrader-inventory — runtime target selection.
//!
//! A [`TargetSpec`](upgrader_state::TargetSpec) is compiled into regex
//! selectors and evaluated against an [`InventorySource`] snapshot by the
//! [`Resolver`]. The CLI string syntax for selectors lives in [`selector`].

pub mod error;
pub mod resolver;
pub mod selector;
pub mod source;

pub use error::{ResolveError, ResolveResult};
pub use resolver::Resolver;
pub use selector::{CompiledSelector, parse_selector};
pub use source::{InventorySource, StaticInventory, StoreInventory};
