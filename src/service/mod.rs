//! Validation and transactional write coordination.

mod transaction;
mod validation;
pub use transaction::{CreateStep, DeleteStep, Step, StepOutput, TransactionCoordinator, TxReport, TxState, UpdateStep};
pub use validation::{Constraint, RequestValidator, Violation};
