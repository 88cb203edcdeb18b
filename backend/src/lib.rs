pub mod models;
pub mod db;
pub mod services;
pub mod handlers;
pub mod utils;
pub mod constants;
pub mod error;
pub mod state;

pub use utils::config::Config;
pub use db::connection::get_db_pool;
pub use error::{ConflictKind, CoreError};
pub use state::{AppState, Stores};
