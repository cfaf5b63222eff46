pub mod api;
pub mod models;
pub mod store;

/// Maximum username length, counted in characters.
pub const MAX_USERNAME_LEN: usize = 32;
