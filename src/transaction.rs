//! # Transaction Scope
//!
//! Multi-step configuration changes run inside a transaction so that either
//! every step takes effect or none does. Work that must only happen once the
//! change is durable, such as publishing a new merged configuration, is
//! registered as a [`TransactionSynchronization`] and runs after commit.
//!
//! ## Boundaries
//!
//! The scope is tracked by an explicit [`TransactionContext`] threaded
//! through bodies as `&mut`. It holds a stack of boundaries of two kinds:
//!
//! - **Transactions**, opened by [`TransactionTemplate::execute`]. A nested
//!   `execute` joins the outermost open transaction; callbacks fire only when
//!   that outermost transaction completes.
//! - **Surroundings**, opened by
//!   [`TransactionTemplate::transaction_surrounding`]. A surrounding outside
//!   any transaction allows exactly one top-level transaction and hands it
//!   the callbacks registered before it started. Callbacks registered in a
//!   surrounding that never runs a transaction are dropped when it closes.
//!
//! ## Rollback
//!
//! A body returning `Err` rolls back. A failing nested body marks the whole
//! transaction rollback-only; if the outer body then succeeds the commit is
//! refused with [`Error::UnexpectedRollback`]. A `before_commit` failure also
//! rolls back. After-commit callbacks never run for a rolled-back
//! transaction; after-completion callbacks run either way.

use std::fmt;

use log::{debug, trace};

use crate::error::{Error, Result};

/// How a transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Committed,
    RolledBack,
}

/// Callbacks attached to a transaction. All methods default to doing nothing.
pub trait TransactionSynchronization {
    /// Runs before commit, after the body succeeded. An error rolls back.
    fn before_commit(&mut self, _ctx: &TransactionContext) -> Result<()> {
        Ok(())
    }

    /// Runs once the transaction committed.
    fn after_commit(&mut self, _ctx: &TransactionContext) {}

    /// Runs after commit or rollback.
    fn after_completion(&mut self, _ctx: &TransactionContext, _status: CompletionStatus) {}
}

struct AfterCommit<F>(Option<F>);

impl<F: FnOnce(&TransactionContext)> TransactionSynchronization for AfterCommit<F> {
    fn after_commit(&mut self, ctx: &TransactionContext) {
        if let Some(callback) = self.0.take() {
            callback(ctx);
        }
    }
}

struct BeforeCommit<F>(Option<F>);

impl<F: FnOnce(&TransactionContext) -> Result<()>> TransactionSynchronization for BeforeCommit<F> {
    fn before_commit(&mut self, ctx: &TransactionContext) -> Result<()> {
        match self.0.take() {
            Some(callback) => callback(ctx),
            None => Ok(()),
        }
    }
}

type Synchronizations = Vec<Box<dyn TransactionSynchronization>>;

enum Boundary {
    Surrounding {
        pending: Synchronizations,
        transaction_started: bool,
    },
    Transaction {
        synchronizations: Synchronizations,
        rollback_only: bool,
    },
}

/// Per-worker transaction state.
#[derive(Default)]
pub struct TransactionContext {
    boundaries: Vec<Boundary>,
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<&str> = self
            .boundaries
            .iter()
            .map(|b| match b {
                Boundary::Surrounding { .. } => "surrounding",
                Boundary::Transaction { .. } => "transaction",
            })
            .collect();
        f.debug_struct("TransactionContext")
            .field("boundaries", &kinds)
            .finish()
    }
}

impl TransactionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a transaction body runs, false in commit callbacks.
    pub fn is_transaction_body_executing(&self) -> bool {
        self.boundaries
            .iter()
            .any(|b| matches!(b, Boundary::Transaction { .. }))
    }

    /// Whether a transaction surrounding is open.
    pub fn is_in_surrounding(&self) -> bool {
        self.boundaries
            .iter()
            .any(|b| matches!(b, Boundary::Surrounding { .. }))
    }

    /// Attach callbacks to the outermost open transaction, or to the
    /// innermost surrounding when no transaction is open.
    pub fn register_synchronization(
        &mut self,
        synchronization: Box<dyn TransactionSynchronization>,
    ) -> Result<()> {
        let outermost_transaction = self
            .boundaries
            .iter_mut()
            .find(|b| matches!(b, Boundary::Transaction { .. }));
        if let Some(Boundary::Transaction {
            synchronizations, ..
        }) = outermost_transaction
        {
            synchronizations.push(synchronization);
            return Ok(());
        }
        match self.boundaries.last_mut() {
            Some(Boundary::Surrounding { pending, .. }) => {
                pending.push(synchronization);
                Ok(())
            }
            _ => Err(Error::SynchronizationNotActive),
        }
    }

    /// Run `callback` once the current transaction commits.
    pub fn after_commit<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnOnce(&TransactionContext) + 'static,
    {
        self.register_synchronization(Box::new(AfterCommit(Some(callback))))
    }

    /// Run `callback` just before the current transaction commits.
    pub fn before_commit<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnOnce(&TransactionContext) -> Result<()> + 'static,
    {
        self.register_synchronization(Box::new(BeforeCommit(Some(callback))))
    }

    /// Force the open transaction to roll back.
    pub fn set_rollback_only(&mut self) -> Result<()> {
        match self
            .boundaries
            .iter_mut()
            .find(|b| matches!(b, Boundary::Transaction { .. }))
        {
            Some(Boundary::Transaction { rollback_only, .. }) => {
                *rollback_only = true;
                Ok(())
            }
            _ => Err(Error::SynchronizationNotActive),
        }
    }

    pub fn is_rollback_only(&self) -> bool {
        self.boundaries
            .iter()
            .any(|b| matches!(b, Boundary::Transaction { rollback_only: true, .. }))
    }

    /// Claim the innermost surrounding for a new top-level transaction and
    /// take the callbacks registered so far.
    fn claim_surrounding(&mut self) -> Result<Synchronizations> {
        let innermost = self
            .boundaries
            .iter_mut()
            .rev()
            .find(|b| matches!(b, Boundary::Surrounding { .. }));
        match innermost {
            Some(Boundary::Surrounding {
                pending,
                transaction_started,
            }) => {
                if *transaction_started {
                    return Err(Error::MultipleTransactionsNotPermitted);
                }
                *transaction_started = true;
                Ok(std::mem::take(pending))
            }
            _ => Ok(Vec::new()),
        }
    }

    fn pop_transaction(&mut self) -> (Synchronizations, bool) {
        while let Some(boundary) = self.boundaries.pop() {
            if let Boundary::Transaction {
                synchronizations,
                rollback_only,
            } = boundary
            {
                return (synchronizations, rollback_only);
            }
        }
        (Vec::new(), false)
    }

    fn pop_surrounding(&mut self) {
        while let Some(boundary) = self.boundaries.pop() {
            if let Boundary::Surrounding { pending, .. } = boundary {
                if !pending.is_empty() {
                    trace!(
                        "Discarding {} callbacks registered outside a transaction",
                        pending.len()
                    );
                }
                return;
            }
        }
    }
}

/// Runs bodies inside transactions.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransactionTemplate;

impl TransactionTemplate {
    pub fn new() -> Self {
        Self
    }

    /// Run `body` in a transaction: commit on `Ok`, roll back on `Err`.
    pub fn execute<T, F>(&self, ctx: &mut TransactionContext, body: F) -> Result<T>
    where
        F: FnOnce(&mut TransactionContext) -> Result<T>,
    {
        self.execute_with_exception_handling(ctx, body)
    }

    /// Like [`execute`](Self::execute), preserving the body's own error type.
    pub fn execute_with_exception_handling<T, E, F>(
        &self,
        ctx: &mut TransactionContext,
        body: F,
    ) -> std::result::Result<T, E>
    where
        E: From<Error>,
        F: FnOnce(&mut TransactionContext) -> std::result::Result<T, E>,
    {
        if ctx.is_transaction_body_executing() {
            let result = body(ctx);
            if result.is_err() {
                ctx.set_rollback_only().map_err(E::from)?;
            }
            return result;
        }

        let inherited = ctx.claim_surrounding().map_err(E::from)?;
        ctx.boundaries.push(Boundary::Transaction {
            synchronizations: inherited,
            rollback_only: false,
        });
        let result = body(ctx);
        let (mut synchronizations, rollback_only) = ctx.pop_transaction();

        let value = match result {
            Ok(_) if rollback_only => {
                Self::complete(ctx, &mut synchronizations, CompletionStatus::RolledBack);
                return Err(E::from(Error::UnexpectedRollback));
            }
            Ok(value) => value,
            Err(e) => {
                Self::complete(ctx, &mut synchronizations, CompletionStatus::RolledBack);
                return Err(e);
            }
        };

        for synchronization in synchronizations.iter_mut() {
            if let Err(e) = synchronization.before_commit(ctx) {
                debug!("Rolling back: before-commit callback failed: {}", e);
                Self::complete(ctx, &mut synchronizations, CompletionStatus::RolledBack);
                return Err(E::from(e));
            }
        }
        for synchronization in synchronizations.iter_mut() {
            synchronization.after_commit(ctx);
        }
        Self::complete(ctx, &mut synchronizations, CompletionStatus::Committed);
        Ok(value)
    }

    /// Run `block` as a transaction surrounding.
    ///
    /// Outside a transaction, at most one top-level transaction may run in
    /// the block; a second fails with
    /// [`Error::MultipleTransactionsNotPermitted`].
    pub fn transaction_surrounding<T, E, F>(
        &self,
        ctx: &mut TransactionContext,
        block: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut TransactionContext) -> std::result::Result<T, E>,
    {
        ctx.boundaries.push(Boundary::Surrounding {
            pending: Vec::new(),
            transaction_started: false,
        });
        let result = block(ctx);
        ctx.pop_surrounding();
        result
    }

    fn complete(
        ctx: &TransactionContext,
        synchronizations: &mut Synchronizations,
        status: CompletionStatus,
    ) {
        trace!(
            "Transaction {:?} with {} callbacks",
            status,
            synchronizations.len()
        );
        for synchronization in synchronizations.iter_mut() {
            synchronization.after_completion(ctx, status);
        }
    }
}
