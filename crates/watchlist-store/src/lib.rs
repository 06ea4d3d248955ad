//! SQLite persistence for users, sessions and watchlists.

pub mod db;
pub mod repository;
pub mod sessions;
pub mod users;

pub use db::WatchlistDb;
pub use repository::WatchlistRepository;
pub use sessions::SessionStore;
pub use users::{NewUser, UserStore};
