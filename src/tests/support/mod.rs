pub mod fakes;

pub use fakes::{InMemorySessionStore, InMemoryUserCache, InMemoryUserStore};
