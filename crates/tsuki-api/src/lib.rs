pub mod auth;
pub mod error;
pub mod middleware;
pub mod oauth;
pub mod posts;
pub mod routes;
pub mod users;
pub mod verify;

pub use routes::router;
