//! Plinth argument policy.
//!
//! Every request crossing the trust boundary is checked here before any
//! privileged process exists. The schema comes from the action's manifest;
//! a request either satisfies it exactly or is rejected whole.

pub mod error;
pub mod validator;

pub use error::{ValidationError, ValidationErrorKind};
pub use validator::ArgumentValidator;
