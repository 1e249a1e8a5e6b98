//! Runs an ordered list of dependent writes as one atomic unit.
//!
//! `Open → (StepExecuting → StepCommittedLocally)* → CommittedAll | RolledBack`.
//! A failing step, a firing abort predicate or a failing commit all end in `RolledBack`
//! and surface as a single `TransactionAborted`. Nothing is retried.

use crate::error::AppError;
use crate::model::Record;
use crate::query::{self, Query};
use crate::store::{Backend, Executor};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutput {
    Created(Value),
    Affected(u64),
}

impl StepOutput {
    /// Field of a created record, if this step created one.
    pub fn created_field(&self, field: &str) -> Option<&Value> {
        match self {
            StepOutput::Created(row) => row.get(field),
            StepOutput::Affected(_) => None,
        }
    }
}

#[async_trait]
pub trait Step: Send + Sync {
    fn describe(&self) -> String;

    async fn apply(&self, exec: &mut dyn Executor) -> Result<StepOutput, AppError>;
}

pub struct CreateStep<R>(pub R);

#[async_trait]
impl<R: Record> Step for CreateStep<R> {
    fn describe(&self) -> String {
        format!("create {} '{}'", R::schema().table_name, self.0.name())
    }

    async fn apply(&self, exec: &mut dyn Executor) -> Result<StepOutput, AppError> {
        let created = query::create(exec, &self.0).await?;
        Ok(StepOutput::Created(serde_json::to_value(created)?))
    }
}

pub struct UpdateStep<R> {
    pub query: Query<R>,
    pub field: String,
    pub value: Value,
}

#[async_trait]
impl<R: Record> Step for UpdateStep<R> {
    fn describe(&self) -> String {
        format!("update {}.{}", R::schema().table_name, self.field)
    }

    async fn apply(&self, exec: &mut dyn Executor) -> Result<StepOutput, AppError> {
        let n = self.query.update(exec, &self.field, self.value.clone()).await?;
        Ok(StepOutput::Affected(n))
    }
}

pub struct DeleteStep<R>(pub Query<R>);

#[async_trait]
impl<R: Record> Step for DeleteStep<R> {
    fn describe(&self) -> String {
        format!("delete from {}", R::schema().table_name)
    }

    async fn apply(&self, exec: &mut dyn Executor) -> Result<StepOutput, AppError> {
        Ok(StepOutput::Affected(self.0.delete(exec).await?))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Open,
    StepExecuting(usize),
    StepCommittedLocally(usize),
    CommittedAll,
    RolledBack,
}

#[derive(Debug, Serialize)]
pub struct TxReport {
    pub outputs: Vec<StepOutput>,
    pub state: TxState,
}

type AbortPredicate = Box<dyn Fn(usize, &StepOutput) -> Option<String> + Send + Sync>;

pub struct TransactionCoordinator<'a> {
    backend: &'a dyn Backend,
    steps: Vec<Box<dyn Step>>,
    abort_when: Option<AbortPredicate>,
    state: TxState,
}

impl<'a> TransactionCoordinator<'a> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        TransactionCoordinator {
            backend,
            steps: Vec::new(),
            abort_when: None,
            state: TxState::Open,
        }
    }

    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Checked after every step with its 0-based index; `Some(reason)` aborts the transaction.
    pub fn abort_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(usize, &StepOutput) -> Option<String> + Send + Sync + 'static,
    {
        self.abort_when = Some(Box::new(predicate));
        self
    }

    fn transition(&mut self, next: TxState) {
        tracing::debug!(from = ?self.state, to = ?next, "transaction state");
        self.state = next;
    }

    pub async fn execute(mut self) -> Result<TxReport, AppError> {
        let steps = std::mem::take(&mut self.steps);
        let mut tx = self.backend.begin().await?;
        let mut outputs = Vec::with_capacity(steps.len());

        for (i, step) in steps.iter().enumerate() {
            self.transition(TxState::StepExecuting(i));
            let output = match step.apply(tx.executor()).await {
                Ok(output) => output,
                Err(e) => {
                    tracing::info!(step = i, what = %step.describe(), error = %e, "transaction step failed");
                    return Err(self.roll_back(tx, i, e.to_string()).await);
                }
            };
            self.transition(TxState::StepCommittedLocally(i));
            if let Some(reason) = self.abort_when.as_ref().and_then(|p| p(i, &output)) {
                tracing::info!(step = i, what = %step.describe(), reason = %reason, "transaction aborted");
                return Err(self.roll_back(tx, i, reason).await);
            }
            outputs.push(output);
        }

        if let Err(e) = tx.commit().await {
            self.transition(TxState::RolledBack);
            return Err(AppError::TransactionAborted {
                step: steps.len(),
                reason: format!("commit failed: {}", e),
            });
        }
        self.transition(TxState::CommittedAll);
        tracing::info!(steps = steps.len(), "transaction committed");
        Ok(TxReport {
            outputs,
            state: self.state,
        })
    }

    async fn roll_back(&mut self, mut tx: Box<dyn crate::store::Transaction>, step: usize, reason: String) -> AppError {
        if let Err(e) = tx.rollback().await {
            // Dropping the handle still discards the transaction's writes.
            tracing::warn!(error = %e, "explicit rollback failed");
        }
        self.transition(TxState::RolledBack);
        AppError::TransactionAborted { step, reason }
    }
}
