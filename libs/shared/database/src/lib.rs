pub mod memory;
pub mod repository;
pub mod supabase;

pub use memory::{InMemoryStore, MemoryTx};
pub use repository::*;
