//! Envelopes, transactions and merchant hints.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::{
    new_id, optional_text, positive_amount, required_text, CommandOutcome, CommandProcessor,
    Recorded,
};
use crate::db::repo;
use crate::error::{Error, Result};
use crate::ledger::{EventType, NewEvent};
use crate::projection::merchant_hints;
use crate::types::{
    merchant_key, Envelope, EnvelopeSource, Flow, MerchantHint, Transaction, TransactionSource,
};

/// Arguments for [`CommandProcessor::log_transaction`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub amount_minor: i64,
    pub flow: Flow,
    pub merchant: Option<String>,
    pub category: Option<String>,
    /// Explicit envelope; when absent a merchant hint may supply one
    pub envelope_id: Option<String>,
    /// Defaults to the command time
    pub occurred_at: Option<DateTime<Utc>>,
    pub source: TransactionSource,
    pub recurring_id: Option<String>,
}

impl NewTransaction {
    /// A manual outflow of `amount_minor`.
    pub fn outflow(amount_minor: i64) -> Self {
        Self {
            amount_minor,
            flow: Flow::Outflow,
            merchant: None,
            category: None,
            envelope_id: None,
            occurred_at: None,
            source: TransactionSource::Manual,
            recurring_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VoidRecord {
    voided_at: DateTime<Utc>,
}

pub(crate) fn require_envelope(conn: &Connection, id: &str) -> Result<Envelope> {
    repo::get_envelope(conn, id)?.ok_or_else(|| Error::not_found("envelope", id))
}

fn hint_event(
    merchant: &str,
    envelope_id: &str,
    at: DateTime<Utc>,
) -> Result<(MerchantHint, NewEvent)> {
    let hint = MerchantHint {
        merchant_key: merchant_key(merchant),
        merchant: merchant.to_string(),
        envelope_id: envelope_id.to_string(),
        set_at: at,
    };
    let event = NewEvent::new(EventType::MerchantHintSet, &hint.merchant_key, &hint)?;
    Ok((hint, event))
}

impl CommandProcessor {
    pub fn create_envelope(&self, key: &str, name: &str) -> Result<CommandOutcome<Envelope>> {
        self.execute(key, "create_envelope", |scope| {
            let envelope = Envelope {
                id: new_id(),
                name: required_text("envelope name", name)?,
                created_at: scope.now,
            };
            repo::insert_envelope(scope.conn, &envelope)?;

            let event = NewEvent::new(EventType::EnvelopeCreated, &envelope.id, &envelope)?;
            Ok(Recorded::new(envelope, event))
        })
    }

    /// Logs a transaction.
    ///
    /// Without an explicit envelope, a hint for the merchant fills it in
    /// (`envelope_source = hint`). With both a merchant and an explicit
    /// envelope, the pairing is recorded as a new hint.
    pub fn log_transaction(
        &self,
        key: &str,
        args: NewTransaction,
    ) -> Result<CommandOutcome<Transaction>> {
        self.execute(key, "log_transaction", |scope| {
            let amount_minor = positive_amount(args.amount_minor)?;
            let merchant = optional_text(args.merchant.as_deref());

            let (envelope_id, envelope_source) = match &args.envelope_id {
                Some(id) => {
                    require_envelope(scope.conn, id)?;
                    (Some(id.clone()), EnvelopeSource::Explicit)
                }
                None => {
                    let mut hinted = None;
                    if let Some(m) = &merchant {
                        if let Some(hint) = merchant_hints::lookup(scope.conn, m)? {
                            // A hint pointing at a missing envelope is ignored
                            if repo::get_envelope(scope.conn, &hint.envelope_id)?.is_some() {
                                hinted = Some(hint.envelope_id);
                            }
                        }
                    }
                    match hinted {
                        Some(id) => (Some(id), EnvelopeSource::Hint),
                        None => (None, EnvelopeSource::None),
                    }
                }
            };

            let txn = Transaction {
                id: new_id(),
                amount_minor,
                flow: args.flow,
                merchant: merchant.clone(),
                category: optional_text(args.category.as_deref()),
                envelope_id,
                envelope_source,
                occurred_at: args.occurred_at.unwrap_or(scope.now),
                source: args.source,
                recurring_id: args.recurring_id.clone(),
                voided_at: None,
                created_at: scope.now,
            };
            repo::insert_transaction(scope.conn, &txn)?;

            let event = NewEvent::new(EventType::TransactionLogged, &txn.id, &txn)?;
            let mut recorded = Recorded::new(txn.clone(), event);

            if let (Some(m), EnvelopeSource::Explicit, Some(env)) =
                (&merchant, txn.envelope_source, &txn.envelope_id)
            {
                let (_, hint) = hint_event(m, env, scope.now)?;
                recorded = recorded.with_secondary("merchant_hint", hint);
            }

            Ok(recorded)
        })
    }

    /// Voids a transaction. Voided is terminal.
    pub fn void_transaction(
        &self,
        key: &str,
        transaction_id: &str,
    ) -> Result<CommandOutcome<Transaction>> {
        self.execute(key, "void_transaction", |scope| {
            let mut txn = repo::get_transaction(scope.conn, transaction_id)?
                .ok_or_else(|| Error::not_found("transaction", transaction_id))?;
            if txn.is_voided() {
                return Err(Error::InvalidTransition {
                    entity: "transaction",
                    id: txn.id,
                    from: "voided".to_string(),
                    to: "voided".to_string(),
                });
            }

            repo::mark_transaction_voided(scope.conn, &txn.id, scope.now)?;
            txn.voided_at = Some(scope.now);

            let record = VoidRecord {
                voided_at: scope.now,
            };
            let event = NewEvent::new(EventType::TransactionVoided, &txn.id, &record)?;
            Ok(Recorded::new(txn, event))
        })
    }

    /// Points a merchant at an envelope for future transactions.
    pub fn set_merchant_hint(
        &self,
        key: &str,
        merchant: &str,
        envelope_id: &str,
    ) -> Result<CommandOutcome<MerchantHint>> {
        self.execute(key, "set_merchant_hint", |scope| {
            let merchant = required_text("merchant", merchant)?;
            require_envelope(scope.conn, envelope_id)?;

            let (hint, event) = hint_event(&merchant, envelope_id, scope.now)?;
            Ok(Recorded::new(hint, event))
        })
    }
}
