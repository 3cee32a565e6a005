// Expense composition: building and validating an expense submission.

pub mod composer;
pub mod validate;

pub use composer::{split_evenly, ExpenseComposer, MemberRow, SubmitError};
pub use validate::{validate, ValidationError};
