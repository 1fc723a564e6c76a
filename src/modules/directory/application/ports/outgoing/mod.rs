pub mod session_store;
pub mod user_cache;
pub mod user_store;

pub use session_store::{SessionStore, SessionStoreError};
pub use user_cache::{CacheError, UserCache};
pub use user_store::{ListScope, SoftDeleteOutcome, UniqueField, UserStore, UserStoreError};
