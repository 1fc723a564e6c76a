pub mod sea_orm_entity;
pub mod security;
pub mod session_store_redis;
pub mod user_cache_redis;
pub mod user_store_postgres;

pub use session_store_redis::RedisSessionStore;
pub use user_cache_redis::RedisUserCache;
pub use user_store_postgres::UserStorePostgres;
