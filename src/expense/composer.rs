// ExpenseComposer: turns per-member include flags, share amounts, and
// contribution amounts into a validated expense-creation payload.
//
// The composer holds all form state explicitly (group id, member rows,
// title/amount/payer fields) so the composition rules are testable without
// any rendering environment. Every edit opportunistically snapshots the
// current state into the draft store, so in-progress input survives a
// reload.

use thiserror::Error;
use tracing::{debug, warn};

use crate::api::{ApiError, SplitApi};
use crate::model::{
    round2, ContributionEntry, ExpenseDraft, ExpenseReadModel, Member, NewExpense, ShareEntry,
};
use crate::store::{DraftStore, KeyValueStore};

use super::validate::{validate, ValidationError};

/// A failed submission attempt.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// A previous submission is still outstanding; the trigger should stay
    /// disabled until it completes.
    #[error("an expense submission is already in flight")]
    InFlight,

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Compute an even split of `total_amount` across `member_ids`.
///
/// Every member but the last receives the equal share rounded to 2 decimal
/// places; the last member in listing order absorbs the rounding remainder
/// (`total − Σ others`, rounded to 2 decimals), so the shares always sum to
/// the total exactly to the cent. The listing order is fixed and
/// deterministic, so the remainder lands on the same member for a given
/// order.
pub fn split_evenly(total_amount: f64, member_ids: &[i64]) -> Result<Vec<ShareEntry>, ValidationError> {
    if !total_amount.is_finite() || total_amount <= 0.0 {
        return Err(ValidationError::InvalidAmount);
    }
    if member_ids.is_empty() {
        return Err(ValidationError::NoMembers);
    }

    let even_share = round2(total_amount / member_ids.len() as f64);
    let mut assigned = 0.0;
    let mut shares = Vec::with_capacity(member_ids.len());
    for (index, &user_id) in member_ids.iter().enumerate() {
        let share_amount = if index == member_ids.len() - 1 {
            round2(total_amount - assigned)
        } else {
            assigned += even_share;
            even_share
        };
        shares.push(ShareEntry {
            user_id,
            share_amount,
        });
    }
    Ok(shares)
}

/// One member's row in the composition form: whether they are included in
/// the split, and their (optional) share and contribution amounts.
#[derive(Debug, Clone)]
pub struct MemberRow {
    pub member: Member,
    pub included: bool,
    pub share: Option<f64>,
    pub contribution: Option<f64>,
}

impl MemberRow {
    fn new(member: Member) -> Self {
        Self {
            member,
            included: false,
            share: None,
            contribution: None,
        }
    }
}

/// Builder for a single expense submission within one group.
pub struct ExpenseComposer<S> {
    group_id: i64,
    title: String,
    amount: Option<f64>,
    paid_by: Option<i64>,
    rows: Vec<MemberRow>,
    drafts: DraftStore<S>,
    in_flight: bool,
}

impl<S: KeyValueStore> ExpenseComposer<S> {
    /// Create an empty composer for `group_id` with one row per member, in
    /// the given listing order.
    pub fn new(group_id: i64, members: Vec<Member>, drafts: DraftStore<S>) -> Self {
        Self {
            group_id,
            title: String::new(),
            amount: None,
            paid_by: None,
            rows: members.into_iter().map(MemberRow::new).collect(),
            drafts,
            in_flight: false,
        }
    }

    pub fn rows(&self) -> &[MemberRow] {
        &self.rows
    }

    pub fn is_submitting(&self) -> bool {
        self.in_flight
    }

    pub fn drafts(&self) -> &DraftStore<S> {
        &self.drafts
    }

    fn row_mut(&mut self, user_id: i64) -> Option<&mut MemberRow> {
        let row = self.rows.iter_mut().find(|r| r.member.id == user_id);
        if row.is_none() {
            warn!("ignoring edit for unknown member {user_id}");
        }
        row
    }

    fn save_draft(&self) {
        self.drafts.save(&self.serialize());
    }

    /// Include or exclude a member from the split. Inclusion enables the
    /// share field without imposing a default value; exclusion clears the
    /// member's share and contribution.
    pub fn toggle_member(&mut self, user_id: i64, included: bool) {
        if let Some(row) = self.row_mut(user_id) {
            row.included = included;
            if !included {
                row.share = None;
                row.contribution = None;
            }
            self.save_draft();
        }
    }

    /// Include every member not yet included, preserving any share values
    /// already entered.
    pub fn select_all(&mut self) {
        for row in &mut self.rows {
            row.included = true;
        }
        self.save_draft();
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.save_draft();
    }

    /// Set the total amount; `None` means the field is empty.
    pub fn set_amount(&mut self, amount: Option<f64>) {
        self.amount = amount;
        self.save_draft();
    }

    /// Select the designated payer. Unknown member ids are ignored.
    pub fn set_paid_by(&mut self, paid_by: Option<i64>) {
        if let Some(user_id) = paid_by {
            if !self.rows.iter().any(|r| r.member.id == user_id) {
                warn!("ignoring unknown payer {user_id}");
                return;
            }
        }
        self.paid_by = paid_by;
        self.save_draft();
    }

    /// Set a member's share amount. Only included members have an editable
    /// share field; edits for excluded members are ignored.
    pub fn set_share(&mut self, user_id: i64, share: Option<f64>) {
        if let Some(row) = self.row_mut(user_id) {
            if !row.included {
                debug!("ignoring share edit for excluded member {user_id}");
                return;
            }
            row.share = share;
            self.save_draft();
        }
    }

    /// Set a member's contribution (money actually paid in). Contributions
    /// are editable regardless of split inclusion.
    pub fn set_contribution(&mut self, user_id: i64, contribution: Option<f64>) {
        if let Some(row) = self.row_mut(user_id) {
            row.contribution = contribution;
            self.save_draft();
        }
    }

    /// Assign an even split of the current amount across the included
    /// members, with the last included row absorbing the rounding
    /// remainder.
    pub fn split_evenly(&mut self) -> Result<(), ValidationError> {
        let amount = self
            .amount
            .filter(|a| a.is_finite() && *a > 0.0)
            .ok_or(ValidationError::InvalidAmount)?;
        let included: Vec<i64> = self
            .rows
            .iter()
            .filter(|r| r.included)
            .map(|r| r.member.id)
            .collect();
        let shares = split_evenly(amount, &included)?;
        for entry in shares {
            if let Some(row) = self.rows.iter_mut().find(|r| r.member.id == entry.user_id) {
                row.share = Some(entry.share_amount);
            }
        }
        self.save_draft();
        Ok(())
    }

    /// Read the current field state into an [`ExpenseDraft`]. Included
    /// members with an empty share field serialize as a 0 share; empty
    /// contribution fields are omitted. No validation is applied.
    pub fn serialize(&self) -> ExpenseDraft {
        let mut shares = Vec::new();
        let mut contributors = Vec::new();
        let mut split_among = Vec::new();

        for row in &self.rows {
            if row.included {
                split_among.push(row.member.id);
                shares.push(ShareEntry {
                    user_id: row.member.id,
                    share_amount: row.share.unwrap_or(0.0),
                });
            }
            if let Some(contribution) = row.contribution {
                if contribution > 0.0 {
                    contributors.push(ContributionEntry {
                        user_id: row.member.id,
                        amount_paid: contribution,
                    });
                }
            }
        }

        ExpenseDraft {
            group_id: Some(self.group_id),
            title: self.title.clone(),
            amount: self.amount,
            paid_by: self.paid_by,
            shares,
            contributors,
            split_among,
        }
    }

    /// Hydrate the composer from a stored draft. Entries referencing
    /// members no longer in the group are dropped; a zero share reads back
    /// as an empty field, mirroring `serialize`.
    pub fn restore(&mut self, draft: &ExpenseDraft) {
        self.title = draft.title.clone();
        self.amount = draft.amount;
        self.paid_by = draft
            .paid_by
            .filter(|id| self.rows.iter().any(|r| r.member.id == *id));

        for row in &mut self.rows {
            let share = draft
                .shares
                .iter()
                .find(|s| s.user_id == row.member.id)
                .map(|s| s.share_amount);
            // Older drafts may carry only the included-member list.
            row.included = share.is_some() || draft.split_among.contains(&row.member.id);
            row.share = share.filter(|v| *v != 0.0);
            row.contribution = draft
                .contributors
                .iter()
                .find(|c| c.user_id == row.member.id)
                .map(|c| c.amount_paid)
                .filter(|v| *v > 0.0);
        }
    }

    /// Validate the current state and create the expense on the backend.
    ///
    /// At most one submission may be outstanding; further attempts return
    /// [`SubmitError::InFlight`] until the current one completes. On
    /// success the draft slot is cleared and the created expense is
    /// returned; on failure no local state is mutated, so the attempt is
    /// retryable.
    pub async fn submit(&mut self, api: &dyn SplitApi) -> Result<ExpenseReadModel, SubmitError> {
        if self.in_flight {
            return Err(SubmitError::InFlight);
        }

        let draft = self.serialize();
        validate(&draft)?;

        let payload = NewExpense {
            title: draft.title,
            amount: draft.amount.unwrap_or_default(),
            paid_by: draft.paid_by,
            shares: draft.shares,
            contributors: draft.contributors,
        };

        // The flag must come back down even if this future is dropped
        // mid-request (the request is cancelled with it), so it is held by
        // a guard rather than reset on the success path only.
        struct FlagDown<'a>(&'a mut bool);
        impl Drop for FlagDown<'_> {
            fn drop(&mut self) {
                *self.0 = false;
            }
        }

        self.in_flight = true;
        let group_id = self.group_id;
        let result = {
            let _in_flight = FlagDown(&mut self.in_flight);
            api.create_expense(group_id, &payload).await
        };

        match result {
            Ok(created) => {
                debug!("expense {} created, clearing draft", created.id);
                self.drafts.clear();
                Ok(created)
            }
            Err(e) => Err(SubmitError::Api(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BalanceSnapshot;
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use std::future::Future;
    use std::pin::pin;
    use std::task::{Context, Poll, Waker};

    fn member(id: i64, name: &str) -> Member {
        Member {
            id,
            name: name.into(),
            email: String::new(),
        }
    }

    fn composer() -> ExpenseComposer<SqliteStore> {
        ExpenseComposer::new(
            3,
            vec![member(1, "Asha"), member(2, "Bala"), member(3, "Chandra")],
            DraftStore::new(SqliteStore::open(":memory:").unwrap()),
        )
    }

    #[test]
    fn split_evenly_without_remainder() {
        let shares = split_evenly(300.0, &[1, 2, 3]).unwrap();
        let amounts: Vec<f64> = shares.iter().map(|s| s.share_amount).collect();
        assert_eq!(amounts, vec![100.0, 100.0, 100.0]);
    }

    #[test]
    fn split_evenly_last_member_absorbs_remainder() {
        let shares = split_evenly(100.0, &[1, 2, 3]).unwrap();
        let amounts: Vec<f64> = shares.iter().map(|s| s.share_amount).collect();
        assert_eq!(amounts, vec![33.33, 33.33, 33.34]);
        let total: f64 = amounts.iter().sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn split_evenly_rejects_bad_input() {
        assert_eq!(
            split_evenly(0.0, &[1]),
            Err(ValidationError::InvalidAmount)
        );
        assert_eq!(
            split_evenly(f64::NAN, &[1]),
            Err(ValidationError::InvalidAmount)
        );
        assert_eq!(split_evenly(10.0, &[]), Err(ValidationError::NoMembers));
    }

    #[test]
    fn toggle_off_clears_share_and_contribution() {
        let mut c = composer();
        c.toggle_member(1, true);
        c.set_share(1, Some(40.0));
        c.set_contribution(1, Some(40.0));
        c.toggle_member(1, false);
        let row = &c.rows()[0];
        assert!(!row.included);
        assert_eq!(row.share, None);
        assert_eq!(row.contribution, None);
    }

    #[test]
    fn share_edits_for_excluded_members_are_ignored() {
        let mut c = composer();
        c.set_share(1, Some(40.0));
        assert_eq!(c.rows()[0].share, None);
    }

    #[test]
    fn serialize_reads_empty_shares_as_zero() {
        let mut c = composer();
        c.set_title("Dinner");
        c.set_amount(Some(100.0));
        c.toggle_member(1, true);
        c.toggle_member(2, true);
        c.set_share(1, Some(60.0));

        let draft = c.serialize();
        assert_eq!(draft.split_among, vec![1, 2]);
        assert_eq!(draft.shares[0].share_amount, 60.0);
        assert_eq!(draft.shares[1].share_amount, 0.0);
        assert!(draft.contributors.is_empty());
    }

    #[test]
    fn every_edit_saves_a_draft_snapshot() {
        let mut c = composer();
        c.set_title("Trip");
        c.toggle_member(2, true);
        let saved = c.drafts().load().expect("draft saved on edit");
        assert_eq!(saved.title, "Trip");
        assert_eq!(saved.split_among, vec![2]);
    }

    #[test]
    fn restore_round_trips_composer_state() {
        let mut c = composer();
        c.set_title("Hotel");
        c.set_amount(Some(90.0));
        c.set_paid_by(Some(2));
        c.toggle_member(1, true);
        c.toggle_member(3, true);
        c.set_share(1, Some(45.0));
        c.set_share(3, Some(45.0));
        c.set_contribution(2, Some(90.0));
        let draft = c.serialize();

        let mut restored = composer();
        restored.restore(&draft);
        assert_eq!(restored.serialize(), draft);
    }

    #[test]
    fn restore_drops_unknown_members() {
        let mut c = composer();
        let mut draft = c.serialize();
        draft.paid_by = Some(99);
        draft.shares = vec![ShareEntry {
            user_id: 99,
            share_amount: 10.0,
        }];
        draft.split_among = vec![99];
        c.restore(&draft);
        assert!(c.rows().iter().all(|r| !r.included));
        assert_eq!(c.serialize().paid_by, None);
    }

    /// Fake API whose create_expense never resolves, for exercising the
    /// single-in-flight guard.
    struct StalledApi;

    #[async_trait]
    impl SplitApi for StalledApi {
        async fn create_expense(
            &self,
            _group_id: i64,
            _expense: &NewExpense,
        ) -> Result<ExpenseReadModel, ApiError> {
            std::future::pending().await
        }

        async fn group_balances(&self, _group_id: i64) -> Result<BalanceSnapshot, ApiError> {
            std::future::pending().await
        }

        async fn group_expenses(
            &self,
            _group_id: i64,
        ) -> Result<Vec<ExpenseReadModel>, ApiError> {
            std::future::pending().await
        }
    }

    fn fill_valid(c: &mut ExpenseComposer<SqliteStore>) {
        c.set_title("Dinner");
        c.set_amount(Some(100.0));
        c.set_paid_by(Some(1));
        c.toggle_member(1, true);
        c.toggle_member(2, true);
        c.set_share(1, Some(50.0));
        c.set_share(2, Some(50.0));
    }

    #[tokio::test]
    async fn submit_validates_before_any_network_call() {
        let mut c = composer();
        c.set_title("Dinner");
        // amount missing: must fail locally, so the stalled API is never hit
        match c.submit(&StalledApi).await {
            Err(SubmitError::Invalid(ValidationError::Incomplete)) => {}
            other => panic!("expected local validation failure, got {other:?}"),
        }
        assert!(!c.is_submitting());
    }

    /// Fake API that accepts every create_expense call.
    struct AcceptingApi;

    #[async_trait]
    impl SplitApi for AcceptingApi {
        async fn create_expense(
            &self,
            _group_id: i64,
            expense: &NewExpense,
        ) -> Result<ExpenseReadModel, ApiError> {
            Ok(ExpenseReadModel {
                id: 42,
                title: expense.title.clone(),
                amount: expense.amount,
                paid_by: expense.paid_by,
                paid_by_name: None,
                date_added: String::new(),
                shares: Vec::new(),
                contributions: Vec::new(),
            })
        }

        async fn group_balances(&self, _group_id: i64) -> Result<BalanceSnapshot, ApiError> {
            std::future::pending().await
        }

        async fn group_expenses(
            &self,
            _group_id: i64,
        ) -> Result<Vec<ExpenseReadModel>, ApiError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn second_submit_while_one_is_outstanding_is_rejected() {
        let mut c = composer();
        fill_valid(&mut c);

        // Park a submission mid-request and leak it, so the request stays
        // outstanding (dropping the future would cancel it).
        let api = StalledApi;
        let mut fut = Box::pin(c.submit(&api));
        let mut cx = Context::from_waker(Waker::noop());
        assert!(matches!(fut.as_mut().poll(&mut cx), Poll::Pending));
        std::mem::forget(fut);

        assert!(c.is_submitting());
        match c.submit(&api).await {
            Err(SubmitError::InFlight) => {}
            other => panic!("expected in-flight rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_submit_can_be_retried() {
        let mut c = composer();
        fill_valid(&mut c);

        // Poll a submission into its request, then drop it: the request is
        // cancelled, so nothing is outstanding afterwards.
        let api = StalledApi;
        {
            let fut = c.submit(&api);
            let mut fut = pin!(fut);
            let mut cx = Context::from_waker(Waker::noop());
            assert!(matches!(fut.as_mut().poll(&mut cx), Poll::Pending));
        }

        assert!(!c.is_submitting());
        let created = c
            .submit(&AcceptingApi)
            .await
            .expect("retry after a cancelled submission must go through");
        assert_eq!(created.id, 42);
        assert!(!c.is_submitting());
    }
}
