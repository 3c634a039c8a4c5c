pub mod memory;
pub mod traits;

pub use memory::{MemoryCredentialStore, MemoryDataStore, MemoryStoreFactory};
pub use traits::{AuthState, CredentialStore, DataStore, StoreBundle, StoreFactory};
