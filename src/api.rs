// HTTP client for the SplitIt backend REST API.
//
// The backend is a black box to this crate: it stores groups, members and
// expenses, and computes authoritative balances and settlement plans. This
// module only knows the request/response shapes. Failure responses carry a
// JSON body of the form `{"error": "<code>"}`; the code is surfaced as an
// opaque string.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::{BalanceSnapshot, ExpenseReadModel, Member, NewExpense};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    /// The request reached the backend but was rejected. `code` is the
    /// backend's error identifier (e.g. `group_not_found`), passed through
    /// verbatim.
    #[error("backend rejected the request ({status}): {code}")]
    Backend { status: u16, code: String },

    /// The request never produced a backend response (connection failure,
    /// timeout, malformed body).
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Shape of backend failure bodies.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

// ---------------------------------------------------------------------------
// SplitApi seam
// ---------------------------------------------------------------------------

/// The backend operations the core flows depend on. The composer submits
/// through `create_expense`; the balance watcher polls the two read
/// endpoints. Kept as a trait so those flows are testable with scripted
/// fakes instead of a live server.
#[async_trait]
pub trait SplitApi: Send + Sync {
    async fn create_expense(
        &self,
        group_id: i64,
        expense: &NewExpense,
    ) -> Result<ExpenseReadModel, ApiError>;

    async fn group_balances(&self, group_id: i64) -> Result<BalanceSnapshot, ApiError>;

    async fn group_expenses(&self, group_id: i64) -> Result<Vec<ExpenseReadModel>, ApiError>;
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

/// Typed reqwest client for the group/expense/balance endpoints.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct PaymentBody {
    user_id: i64,
    amount: f64,
}

#[derive(Debug, Serialize)]
struct MarkPaidBody {
    /// Omitted entirely (not sent as null) when settling the full pending
    /// balance, matching what the backend expects.
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<f64>,
}

impl ApiClient {
    /// Create a client for the API rooted at `base_url`
    /// (e.g. `http://localhost:5000/api`).
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Map a non-success response to [`ApiError::Backend`], extracting the
    /// backend's error code when the body is parseable.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let code = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.error)
            .unwrap_or_else(|_| "request_failed".to_string());
        debug!("backend error {status}: {code}");
        Err(ApiError::Backend {
            status: status.as_u16(),
            code,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.http.get(self.url(path)).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// List the members of a group.
    pub async fn group_members(&self, group_id: i64) -> Result<Vec<Member>, ApiError> {
        self.get_json(&format!("/groups/{group_id}/members")).await
    }

    /// Record a new expense. Returns the created expense as the backend
    /// sees it.
    pub async fn create_expense(
        &self,
        group_id: i64,
        expense: &NewExpense,
    ) -> Result<ExpenseReadModel, ApiError> {
        let response = self
            .http
            .post(self.url(&format!("/groups/{group_id}/expenses")))
            .json(expense)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Delete an expense. Only the payer is allowed to; the backend enforces
    /// that and answers with an error code otherwise.
    pub async fn delete_expense(&self, group_id: i64, expense_id: i64) -> Result<(), ApiError> {
        let response = self
            .http
            .delete(self.url(&format!("/groups/{group_id}/expenses/{expense_id}")))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Record a partial or full payment by `user_id` against their share of
    /// an expense.
    pub async fn record_expense_payment(
        &self,
        group_id: i64,
        expense_id: i64,
        user_id: i64,
        amount: f64,
    ) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.url(&format!(
                "/groups/{group_id}/expenses/{expense_id}/payments"
            )))
            .json(&PaymentBody { user_id, amount })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Mark a member's group balance as paid. With `amount: None` the
    /// backend settles the full pending balance.
    pub async fn mark_balance_paid(
        &self,
        group_id: i64,
        user_id: i64,
        amount: Option<f64>,
    ) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.url(&format!("/groups/{group_id}/balances/{user_id}/mark-paid")))
            .json(&MarkPaidBody { amount })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Fetch net balances and the settlement plan for a group.
    pub async fn group_balances(&self, group_id: i64) -> Result<BalanceSnapshot, ApiError> {
        self.get_json(&format!("/groups/{group_id}/balances")).await
    }

    /// List all expenses recorded in a group.
    pub async fn group_expenses(&self, group_id: i64) -> Result<Vec<ExpenseReadModel>, ApiError> {
        self.get_json(&format!("/groups/{group_id}/expenses")).await
    }
}

#[async_trait]
impl SplitApi for ApiClient {
    async fn create_expense(
        &self,
        group_id: i64,
        expense: &NewExpense,
    ) -> Result<ExpenseReadModel, ApiError> {
        ApiClient::create_expense(self, group_id, expense).await
    }

    async fn group_balances(&self, group_id: i64) -> Result<BalanceSnapshot, ApiError> {
        ApiClient::group_balances(self, group_id).await
    }

    async fn group_expenses(&self, group_id: i64) -> Result<Vec<ExpenseReadModel>, ApiError> {
        ApiClient::group_expenses(self, group_id).await
    }
}
