//! HTTP handlers: generic record operations plus galaxy transactions and name validation.

pub mod galaxy;
pub mod records;
pub mod validation;
pub use galaxy::transaction;
pub use validation::validate_name;
