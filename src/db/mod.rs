pub mod entities;
pub mod enums;
pub mod memory_store;
pub mod models;
pub mod services;
pub mod store;

pub use memory_store::MemoryStore;
pub use models::*;
pub use services::SeaOrmStore;
pub use store::{ServiceStore, StoreError};
