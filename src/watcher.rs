// BalanceWatcher: detects, without server push, when someone records a
// payment, by polling the balance snapshot and expense list and diffing
// against the previous observation.
//
// The watcher spawns one tokio task that ticks on a fixed interval. Each
// tick fetches both read models concurrently, normalizes them into a
// comparison snapshot, and compares its canonical JSON string to the
// previous one. Unchanged ticks are side-effect-free. On change, a
// notification is emitted for every (expense, member) pair whose paid
// amount strictly increased, followed by a refresh event carrying the new
// data. Fetch failures skip the tick; the loop itself never stops on error.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::SplitApi;
use crate::model::{round2, BalanceEntry, BalanceSnapshot, ExpenseReadModel, SettlementEntry};

/// Default poll cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A payment increase observed between two consecutive successful polls.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentObserved {
    pub expense_id: i64,
    pub expense_title: String,
    /// Display name of the expense's payer (the recipient of the payment).
    pub payer_name: String,
    pub debtor_user_id: i64,
    /// Display name of the member who paid, resolved from the balance list.
    pub debtor_name: String,
    /// The paid-amount delta, rounded to cents.
    pub amount: f64,
}

impl PaymentObserved {
    /// Human-readable notification line, e.g.
    /// `Bala paid Asha ₹20.00 for 'Dinner'`.
    pub fn message(&self) -> String {
        format!(
            "{} paid {} ₹{:.2} for '{}'",
            self.debtor_name, self.payer_name, self.amount, self.expense_title
        )
    }
}

/// Events emitted by the watcher to the presentation layer.
#[derive(Debug, Clone)]
pub enum WatcherEvent {
    /// Someone recorded a payment since the previous observation. One event
    /// per (expense, member) increase; a tick may emit zero or many.
    PaymentObserved(PaymentObserved),
    /// The observed state changed; balances, settlements and expenses
    /// should be re-rendered. Emitted on every changed tick, including the
    /// baseline-establishing first one.
    Refresh {
        balances: BalanceSnapshot,
        expenses: Vec<ExpenseReadModel>,
    },
}

// ---------------------------------------------------------------------------
// Snapshot diffing
// ---------------------------------------------------------------------------

/// Per-expense slice of the comparison snapshot: identifying fields plus
/// the member → paid-amount map.
#[derive(Debug, Clone, Serialize)]
struct ExpensePaidState {
    title: String,
    paid_by_name: Option<String>,
    paid: BTreeMap<i64, f64>,
}

/// Structurally normalized observation used for change detection. Balances
/// are sorted by user id and the expense map is keyed by expense id, so
/// incidental ordering differences in backend responses never read as a
/// change.
#[derive(Debug, Clone, Serialize)]
struct ComparisonSnapshot {
    balances: Vec<BalanceEntry>,
    settlements: Vec<SettlementEntry>,
    expenses: BTreeMap<i64, ExpensePaidState>,
}

impl ComparisonSnapshot {
    fn build(balances: &BalanceSnapshot, expenses: &[ExpenseReadModel]) -> Self {
        let mut sorted_balances = balances.balances.clone();
        sorted_balances.sort_by_key(|b| b.user_id);

        let expenses = expenses
            .iter()
            .map(|e| {
                let paid = e
                    .shares
                    .iter()
                    .map(|s| (s.user_id, s.paid_amount))
                    .collect();
                (
                    e.id,
                    ExpensePaidState {
                        title: e.title.clone(),
                        paid_by_name: e.paid_by_name.clone(),
                        paid,
                    },
                )
            })
            .collect();

        Self {
            balances: sorted_balances,
            settlements: balances.settlements.clone(),
            expenses,
        }
    }
}

/// Outcome of feeding one observation to the differ.
#[derive(Debug)]
pub enum TickOutcome {
    /// Nothing changed since the previous observation.
    Unchanged,
    /// The observation differs from the previous one (or is the first).
    /// `payments` holds one entry per detected paid-amount increase; it is
    /// always empty on the baseline-establishing first observation.
    Changed { payments: Vec<PaymentObserved> },
}

/// Holds the single previous observation and computes the structural diff
/// against each new one. Synchronous and free of I/O, so the diff rules are
/// unit-testable without timers or a backend.
#[derive(Default)]
pub struct SnapshotDiffer {
    prev: Option<(String, ComparisonSnapshot)>,
}

impl SnapshotDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare a fresh observation against the stored one. On change, the
    /// stored snapshot is replaced; on an unchanged observation nothing is
    /// mutated.
    pub fn observe(
        &mut self,
        balances: &BalanceSnapshot,
        expenses: &[ExpenseReadModel],
    ) -> anyhow::Result<TickOutcome> {
        let snapshot = ComparisonSnapshot::build(balances, expenses);
        let canonical = serde_json::to_string(&snapshot)?;

        if let Some((prev_canonical, _)) = &self.prev {
            if *prev_canonical == canonical {
                return Ok(TickOutcome::Unchanged);
            }
        }

        let payments = match &self.prev {
            Some((_, prev)) => diff_payments(prev, &snapshot),
            // First observation only establishes the baseline.
            None => Vec::new(),
        };

        self.prev = Some((canonical, snapshot));
        Ok(TickOutcome::Changed { payments })
    }
}

/// One [`PaymentObserved`] per (expense, member) pair present in both
/// snapshots whose paid amount strictly increased. Decreases and pairs
/// absent from either side produce nothing.
fn diff_payments(prev: &ComparisonSnapshot, curr: &ComparisonSnapshot) -> Vec<PaymentObserved> {
    let mut payments = Vec::new();

    for (expense_id, curr_exp) in &curr.expenses {
        let Some(prev_exp) = prev.expenses.get(expense_id) else {
            continue;
        };
        for (user_id, curr_paid) in &curr_exp.paid {
            let Some(prev_paid) = prev_exp.paid.get(user_id) else {
                continue;
            };
            if curr_paid > prev_paid {
                let debtor_name = curr
                    .balances
                    .iter()
                    .find(|b| b.user_id == *user_id)
                    .map(|b| b.name.clone())
                    .unwrap_or_else(|| "User".to_string());
                payments.push(PaymentObserved {
                    expense_id: *expense_id,
                    expense_title: curr_exp.title.clone(),
                    payer_name: curr_exp
                        .paid_by_name
                        .clone()
                        .unwrap_or_else(|| "Payer".to_string()),
                    debtor_user_id: *user_id,
                    debtor_name,
                    amount: round2(curr_paid - prev_paid),
                });
            }
        }
    }

    payments
}

// ---------------------------------------------------------------------------
// BalanceWatcher
// ---------------------------------------------------------------------------

/// Owns the polling loop for one group view. Two states: idle (no task)
/// and polling (one task). `start` while polling is a no-op so duplicate
/// timers can never race on the shared previous-snapshot state.
pub struct BalanceWatcher {
    group_id: i64,
    api: Arc<dyn SplitApi>,
    events: mpsc::Sender<WatcherEvent>,
    handle: Option<JoinHandle<()>>,
}

impl BalanceWatcher {
    pub fn new(group_id: i64, api: Arc<dyn SplitApi>, events: mpsc::Sender<WatcherEvent>) -> Self {
        Self {
            group_id,
            api,
            events,
            handle: None,
        }
    }

    pub fn is_polling(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Begin polling every `interval`. Ignored (with a warning) if already
    /// polling.
    pub fn start(&mut self, interval: Duration) {
        if self.is_polling() {
            warn!("balance watcher already polling; ignoring start");
            return;
        }

        let group_id = self.group_id;
        let api = Arc::clone(&self.api);
        let events = self.events.clone();
        info!("starting balance polling every {interval:?}");

        self.handle = Some(tokio::spawn(async move {
            let mut differ = SnapshotDiffer::new();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval() fires immediately; consume that so the first poll
            // happens one full interval after start, like the original view.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !poll_once(group_id, api.as_ref(), &mut differ, &events).await {
                    debug!("watcher event receiver dropped; stopping poll loop");
                    return;
                }
            }
        }));
    }

    /// Stop polling. Aborting the task cancels any scheduled-but-unfired
    /// tick, so no tick runs after this returns. No-op when idle.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("balance polling stopped");
        }
    }
}

impl Drop for BalanceWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Execute one poll tick. Returns `false` when the event receiver is gone
/// and the loop should end.
async fn poll_once(
    group_id: i64,
    api: &dyn SplitApi,
    differ: &mut SnapshotDiffer,
    events: &mpsc::Sender<WatcherEvent>,
) -> bool {
    let (balances, expenses) =
        tokio::join!(api.group_balances(group_id), api.group_expenses(group_id));

    let (balances, expenses) = match (balances, expenses) {
        (Ok(balances), Ok(expenses)) => (balances, expenses),
        (Err(e), _) | (_, Err(e)) => {
            // Transient failures must never stop the loop or reach the UI.
            debug!("balance poll skipped: {e}");
            return true;
        }
    };

    match differ.observe(&balances, &expenses) {
        Ok(TickOutcome::Unchanged) => true,
        Ok(TickOutcome::Changed { payments }) => {
            for payment in payments {
                debug!("payment observed: {}", payment.message());
                if events
                    .send(WatcherEvent::PaymentObserved(payment))
                    .await
                    .is_err()
                {
                    return false;
                }
            }
            events
                .send(WatcherEvent::Refresh { balances, expenses })
                .await
                .is_ok()
        }
        Err(e) => {
            warn!("failed to build comparison snapshot: {e:#}");
            true
        }
    }
}
