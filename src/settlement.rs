use sqlx::PgPool;
use uuid::Uuid;

use crate::chain::ObservedTx;
use crate::db::deposits::{self, DepositRepository, DepositRequest, DepositStatus};
use crate::db::ledger::{self, EntryDirection, EntryStatus, EntryType, LedgerRepository, NewLedgerEntry};
use crate::db::wallets::{self, BalanceDelta};
use crate::error::ApiResult;
use crate::money::Currency;

/// Which kind of address an observed payment arrived on. Dedicated addresses
/// scope the match to one user and count toward the lifetime-deposited totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositScope {
    Shared,
    Dedicated(Uuid),
}

impl DepositScope {
    fn user(&self) -> Option<Uuid> {
        match self {
            DepositScope::Shared => None,
            DepositScope::Dedicated(user_id) => Some(*user_id),
        }
    }

    fn is_dedicated(&self) -> bool {
        matches!(self, DepositScope::Dedicated(_))
    }

    fn label(&self) -> &'static str {
        match self {
            DepositScope::Shared => "shared",
            DepositScope::Dedicated(_) => "individual",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Payment does not correspond to any open deposit request.
    Unmatched,
    /// The transaction was handled by an earlier scan; nothing to do.
    AlreadyProcessed,
    /// Matched with zero confirmations: visible to the user, not yet credited.
    Received(Uuid),
    /// Matched (or upgraded) with at least one confirmation: balance credited.
    Confirmed(Uuid),
}

/// Target states for a freshly matched payment given its confirmation count.
pub fn settlement_status(confirmations: u32) -> (DepositStatus, EntryStatus) {
    if confirmations >= 1 {
        (DepositStatus::Confirmed, EntryStatus::Completed)
    } else {
        (DepositStatus::Received, EntryStatus::Pending)
    }
}

/// Matches observed chain payments against open deposit requests and settles
/// the custodial ledger. Safe to invoke on every observer tick: the tx-hash
/// dedup plus status-guarded transitions make each payment credit exactly once.
pub struct SettlementEngine {
    pool: PgPool,
    deposits: DepositRepository,
    ledger: LedgerRepository,
}

impl SettlementEngine {
    pub fn new(pool: PgPool) -> Self {
        Self {
            deposits: DepositRepository::new(pool.clone()),
            ledger: LedgerRepository::new(pool.clone()),
            pool,
        }
    }

    pub async fn process(
        &self,
        currency: Currency,
        scope: DepositScope,
        observed: &ObservedTx,
    ) -> ApiResult<SettlementOutcome> {
        // A request already carrying this hash means an earlier scan matched it.
        // The only remaining work is the received -> confirmed upgrade.
        if let Some(request) = self.deposits.find_by_tx_hash(&observed.hash).await? {
            if request.status == DepositStatus::Received && observed.confirmations >= 1 {
                return self.upgrade(request, scope, observed).await;
            }
            return Ok(SettlementOutcome::AlreadyProcessed);
        }

        if let Some(user_id) = scope.user() {
            if self.ledger.deposit_entry_exists(&observed.hash, user_id).await? {
                return Ok(SettlementOutcome::AlreadyProcessed);
            }
        }

        self.claim(currency, scope, observed).await
    }

    /// Claim the oldest matching open request and settle it, all in one
    /// database transaction.
    async fn claim(
        &self,
        currency: Currency,
        scope: DepositScope,
        observed: &ObservedTx,
    ) -> ApiResult<SettlementOutcome> {
        let mut tx = self.pool.begin().await?;

        let Some(request) =
            deposits::lock_candidate(&mut tx, currency, scope.user(), observed.amount).await?
        else {
            tx.rollback().await?;
            return Ok(SettlementOutcome::Unmatched);
        };

        let confirmations = observed.confirmations as i32;
        let (request_status, entry_status) = settlement_status(observed.confirmations);

        deposits::mark_matched(&mut tx, request.id, request_status, &observed.hash, confirmations)
            .await?;

        ledger::insert(
            &mut *tx,
            &NewLedgerEntry {
                user_id: request.user_id,
                entry_type: EntryType::Deposit,
                direction: EntryDirection::Incoming,
                amount_eur: request.requested_eur,
                amount_crypto: observed.amount,
                currency,
                tx_hash: Some(observed.hash.clone()),
                confirmations,
                status: entry_status,
                description: Some(format!(
                    "{} deposit ({} address)",
                    currency.coin_name(),
                    scope.label()
                )),
                from_username: None,
                related_order_id: None,
            },
        )
        .await?;

        if observed.confirmations >= 1 {
            wallets::ensure(&mut *tx, request.user_id).await?;
            wallets::apply(
                &mut *tx,
                request.user_id,
                &BalanceDelta::deposit_credit(
                    currency,
                    request.requested_eur,
                    observed.amount,
                    scope.is_dedicated(),
                ),
            )
            .await?;
            tx.commit().await?;
            tracing::info!(
                "credited {} EUR ({} {currency}) to user {} for tx {}",
                request.requested_eur,
                observed.amount,
                request.user_id,
                observed.hash
            );
            Ok(SettlementOutcome::Confirmed(request.id))
        } else {
            tx.commit().await?;
            tracing::info!(
                "deposit request {} received tx {} awaiting confirmation",
                request.id,
                observed.hash
            );
            Ok(SettlementOutcome::Received(request.id))
        }
    }

    /// A request matched on an earlier scan with zero confirmations; its
    /// transaction is now buried. Credit exactly once, guarded on the
    /// received -> confirmed transition.
    async fn upgrade(
        &self,
        request: DepositRequest,
        scope: DepositScope,
        observed: &ObservedTx,
    ) -> ApiResult<SettlementOutcome> {
        let confirmations = observed.confirmations as i32;
        let mut tx = self.pool.begin().await?;

        if !deposits::confirm_received(&mut tx, request.id, confirmations).await? {
            // another invocation won the upgrade
            tx.rollback().await?;
            return Ok(SettlementOutcome::AlreadyProcessed);
        }

        ledger::complete_deposit_entry(&mut *tx, &observed.hash, request.user_id, confirmations)
            .await?;

        wallets::ensure(&mut *tx, request.user_id).await?;
        wallets::apply(
            &mut *tx,
            request.user_id,
            &BalanceDelta::deposit_credit(
                request.currency,
                request.requested_eur,
                observed.amount,
                scope.is_dedicated(),
            ),
        )
        .await?;

        tx.commit().await?;
        tracing::info!(
            "confirmed deposit request {}: credited {} EUR to user {}",
            request.id,
            request.requested_eur,
            request.user_id
        );
        Ok(SettlementOutcome::Confirmed(request.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_confirmations_is_visible_but_uncredited() {
        let (request_status, entry_status) = settlement_status(0);
        assert_eq!(request_status, DepositStatus::Received);
        assert_eq!(entry_status, EntryStatus::Pending);
    }

    #[test]
    fn one_confirmation_settles() {
        let (request_status, entry_status) = settlement_status(1);
        assert_eq!(request_status, DepositStatus::Confirmed);
        assert_eq!(entry_status, EntryStatus::Completed);

        let (request_status, entry_status) = settlement_status(6);
        assert_eq!(request_status, DepositStatus::Confirmed);
        assert_eq!(entry_status, EntryStatus::Completed);
    }

    #[test]
    fn scope_user_and_labels() {
        let user = Uuid::new_v4();
        assert_eq!(DepositScope::Shared.user(), None);
        assert_eq!(DepositScope::Dedicated(user).user(), Some(user));
        assert!(!DepositScope::Shared.is_dedicated());
        assert_eq!(DepositScope::Shared.label(), "shared");
        assert_eq!(DepositScope::Dedicated(user).label(), "individual");
    }
}
