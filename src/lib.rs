pub mod config;
pub mod health;
pub mod modules;

pub use modules::directory;

#[cfg(test)]
mod tests;
