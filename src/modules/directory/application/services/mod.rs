pub mod backend_guard;
pub mod directory_service;

pub use backend_guard::BackendTimeouts;
pub use directory_service::DirectoryService;
