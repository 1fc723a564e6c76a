pub mod session_id_hasher;

pub use session_id_hasher::hash_session_id;
