// Validation rules for a submittable expense draft.

use thiserror::Error;

use crate::model::{totals_match, ExpenseDraft};

/// A reason a draft (or a composer operation) is not acceptable. All
/// variants are recoverable: the message is shown to the user, no request
/// is issued, and no state is mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("please complete all required fields with valid values")]
    Incomplete,

    #[error("add at least one member to split the expense")]
    NoSplitMembers,

    #[error("the member share amounts must add up to the total expense")]
    SharesTotalMismatch,

    #[error("share amounts must be greater than zero")]
    NonpositiveShare,

    #[error("contribution amounts must be greater than zero")]
    NonpositiveContribution,

    #[error("the paid amounts must add up to the total expense")]
    ContributionTotalMismatch,

    #[error("select who paid the expense or enter contributions")]
    NoPayer,

    #[error("enter the total amount before splitting evenly")]
    InvalidAmount,

    #[error("select at least one member to split the expense")]
    NoMembers,
}

/// Check the invariants for a submittable expense, stopping at the first
/// violation:
///
/// 1. group, title and a finite amount > 0 are present (`Incomplete`);
/// 2. at least one share exists (`NoSplitMembers`);
/// 3. shares sum to the amount within the cent tolerance
///    (`SharesTotalMismatch`) and every share is > 0 (`NonpositiveShare`);
/// 4. when contributors are present, every contribution is > 0
///    (`NonpositiveContribution`) and they sum to the amount
///    (`ContributionTotalMismatch`); otherwise a payer must be selected
///    (`NoPayer`).
///
/// When contributors are present they are the funding method; a selected
/// payer is carried along in the payload but not required.
pub fn validate(draft: &ExpenseDraft) -> Result<(), ValidationError> {
    let amount = match (draft.group_id, draft.amount) {
        (Some(_), Some(amount))
            if amount.is_finite() && amount > 0.0 && !draft.title.trim().is_empty() =>
        {
            amount
        }
        _ => return Err(ValidationError::Incomplete),
    };

    if draft.shares.is_empty() {
        return Err(ValidationError::NoSplitMembers);
    }
    if !totals_match(amount, draft.shares.iter().map(|s| s.share_amount)) {
        return Err(ValidationError::SharesTotalMismatch);
    }
    if draft.shares.iter().any(|s| s.share_amount <= 0.0) {
        return Err(ValidationError::NonpositiveShare);
    }

    if !draft.contributors.is_empty() {
        if draft.contributors.iter().any(|c| c.amount_paid <= 0.0) {
            return Err(ValidationError::NonpositiveContribution);
        }
        if !totals_match(amount, draft.contributors.iter().map(|c| c.amount_paid)) {
            return Err(ValidationError::ContributionTotalMismatch);
        }
    } else if draft.paid_by.is_none() {
        return Err(ValidationError::NoPayer);
    }

    Ok(())
}
