pub mod domain;
pub mod repository;
pub mod service;

pub use domain::{User, UserError};
pub use repository::{InMemoryUserRepository, UserRepository};
pub use service::{UserPage, UserService};
