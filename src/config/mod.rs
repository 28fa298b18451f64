//! Configuration schema, validation, persistence, and share tokens.

pub mod schema;
pub mod share;
pub mod store;
pub mod validation;

pub use schema::{Configuration, ServerProfile, DEFAULT_HTTP_PORT, DEFAULT_PAC_PORT};
pub use share::ShareTokenError;
pub use store::{ConfigStore, LoadOutcome, PersistenceError};
pub use validation::{check_port, check_profile, ValidationError};
