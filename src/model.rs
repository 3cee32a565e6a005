// Data models for the SplitIt backend API: members, shares, contributions,
// expense drafts, and the balance/expense read models returned by the server.

use serde::{Deserialize, Serialize};

/// Absolute tolerance for monetary totals comparison. Share and contribution
/// sums are entered as decimal strings and rounded to cents, so exact
/// equality is too strict; both validation and the even-split helper use
/// this same tolerance.
pub const CENT_TOLERANCE: f64 = 0.01;

/// Round a monetary value to 2 decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Whether `values` sums to `target` within [`CENT_TOLERANCE`].
///
/// The difference is rounded to whole cents before comparing, so a
/// one-cent gap is accepted even when the f64 subtraction lands a hair
/// above 0.01 (e.g. `100.0 - 99.99`).
pub fn totals_match(target: f64, values: impl IntoIterator<Item = f64>) -> bool {
    let total: f64 = values.into_iter().sum();
    ((total - target) * 100.0).round().abs() <= CENT_TOLERANCE * 100.0
}

// ---------------------------------------------------------------------------
// Group members
// ---------------------------------------------------------------------------

/// A member of a group. Owned by the backend; read-only to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub email: String,
}

// ---------------------------------------------------------------------------
// Expense composition (write side)
// ---------------------------------------------------------------------------

/// How much of an expense's total a member is responsible for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareEntry {
    pub user_id: i64,
    pub share_amount: f64,
}

/// Money a member actually put in toward the expense at creation time
/// (multi-payer expenses).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionEntry {
    pub user_id: i64,
    pub amount_paid: f64,
}

/// Working state of an in-progress expense. Produced by the composer's
/// `serialize`, persisted by the draft store, and validated before
/// submission. `amount` is `None` while the amount field is empty.
///
/// `split_among` is the ordered set of member ids currently marked
/// "included" in the split; its membership always mirrors the `user_id`s
/// in `shares`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseDraft {
    pub group_id: Option<i64>,
    pub title: String,
    pub amount: Option<f64>,
    pub paid_by: Option<i64>,
    pub shares: Vec<ShareEntry>,
    pub contributors: Vec<ContributionEntry>,
    pub split_among: Vec<i64>,
}

/// The expense-creation payload sent to the backend.
#[derive(Debug, Clone, Serialize)]
pub struct NewExpense {
    pub title: String,
    pub amount: f64,
    pub paid_by: Option<i64>,
    pub shares: Vec<ShareEntry>,
    pub contributors: Vec<ContributionEntry>,
}

// ---------------------------------------------------------------------------
// Balance snapshot (read side)
// ---------------------------------------------------------------------------

/// One member's net position in a group. Positive `net_balance` means the
/// group owes them money.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub user_id: i64,
    pub name: String,
    pub net_balance: f64,
    #[serde(default)]
    pub pending_amount: f64,
}

/// One transfer in the backend's minimal settlement plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementEntry {
    pub from_name: String,
    pub to_name: String,
    pub amount: f64,
}

/// Balances and settlement plan for a group, as computed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub balances: Vec<BalanceEntry>,
    pub settlements: Vec<SettlementEntry>,
}

// ---------------------------------------------------------------------------
// Expense read model
// ---------------------------------------------------------------------------

/// Per-member share of a recorded expense. `pending_amount` is maintained by
/// the backend, decreases as payments are recorded, and never exceeds
/// `share_amount`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseShare {
    pub user_id: i64,
    pub name: String,
    pub share_amount: f64,
    #[serde(default)]
    pub paid_amount: f64,
    #[serde(default)]
    pub pending_amount: f64,
}

/// A contribution recorded at expense creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseContribution {
    pub user_id: i64,
    pub name: String,
    pub amount: f64,
}

/// A recorded expense as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseReadModel {
    pub id: i64,
    pub title: String,
    pub amount: f64,
    pub paid_by: Option<i64>,
    #[serde(default)]
    pub paid_by_name: Option<String>,
    #[serde(default)]
    pub date_added: String,
    #[serde(default)]
    pub shares: Vec<ExpenseShare>,
    #[serde(default)]
    pub contributions: Vec<ExpenseContribution>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round2_rounds_to_cents() {
        assert_eq!(round2(33.333333), 33.33);
        assert_eq!(round2(33.337), 33.34);
        assert_eq!(round2(100.0), 100.0);
    }

    #[test]
    fn totals_match_uses_cent_tolerance() {
        assert!(totals_match(100.0, vec![33.33, 33.33, 33.34]));
        assert!(totals_match(100.0, vec![99.99]));
        assert!(totals_match(100.0, vec![100.01]));
        assert!(!totals_match(100.0, vec![99.98]));
        assert!(!totals_match(100.0, vec![100.02]));
    }
}
