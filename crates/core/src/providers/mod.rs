//! Provider persistence contracts: secrets, plain inputs and the resource cache.

mod in_memory_stores;
mod providers_model;
mod providers_traits;

pub use in_memory_stores::{InMemoryCacheStore, InMemoryInputsStore, InMemorySecretStore};
pub use providers_model::*;
pub use providers_traits::*;
