use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{Aggregate, AggregateRoot, DomainError, Event, Money, UserId};

use crate::contact::ContactInfo;

stockledger_core::typed_id!(
    /// Customer identifier.
    CustomerId
);

/// Why a customer's outstanding balance moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceChangeReason {
    InvoiceIssued,
    PaymentRecorded,
    InvoiceReversed,
    PaymentOverride,
    Reconciliation,
}

/// Persisted shape of a customer row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub id: CustomerId,
    pub name: String,
    pub contact: ContactInfo,
    pub outstanding_balance: Money,
    pub version: u64,
}

/// Aggregate root: Customer.
///
/// `outstanding_balance` is a cache of SUM(total - paid) over the customer's
/// unpaid invoices. It is moved by deltas from the invoice and payment paths
/// and can be rebuilt by the reconciliation job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    id: CustomerId,
    name: String,
    contact: ContactInfo,
    outstanding_balance: Money,
    version: u64,
    created: bool,
}

impl Customer {
    /// Create an empty, not-yet-registered aggregate instance.
    pub fn empty(id: CustomerId) -> Self {
        Self {
            id,
            name: String::new(),
            contact: ContactInfo::default(),
            outstanding_balance: Money::ZERO,
            version: 0,
            created: false,
        }
    }

    pub fn from_snapshot(s: CustomerSnapshot) -> Self {
        Self {
            id: s.id,
            name: s.name,
            contact: s.contact,
            outstanding_balance: s.outstanding_balance,
            version: s.version,
            created: true,
        }
    }

    pub fn snapshot(&self) -> CustomerSnapshot {
        CustomerSnapshot {
            id: self.id,
            name: self.name.clone(),
            contact: self.contact.clone(),
            outstanding_balance: self.outstanding_balance,
            version: self.version,
        }
    }

    pub fn id_typed(&self) -> CustomerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contact(&self) -> &ContactInfo {
        &self.contact
    }

    pub fn outstanding_balance(&self) -> Money {
        self.outstanding_balance
    }
}

impl AggregateRoot for Customer {
    type Id = CustomerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterCustomer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterCustomer {
    pub customer_id: CustomerId,
    pub name: String,
    pub contact: ContactInfo,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustOutstandingBalance.
///
/// A zero delta is accepted and emits nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustOutstandingBalance {
    pub customer_id: CustomerId,
    pub delta: Money,
    pub reason: BalanceChangeReason,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerCommand {
    RegisterCustomer(RegisterCustomer),
    AdjustOutstandingBalance(AdjustOutstandingBalance),
}

/// Event: CustomerRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRegistered {
    pub customer_id: CustomerId,
    pub name: String,
    pub contact: ContactInfo,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BalanceAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAdjusted {
    pub customer_id: CustomerId,
    pub delta: Money,
    pub previous_balance: Money,
    pub new_balance: Money,
    pub reason: BalanceChangeReason,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerEvent {
    CustomerRegistered(CustomerRegistered),
    BalanceAdjusted(BalanceAdjusted),
}

impl Event for CustomerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CustomerEvent::CustomerRegistered(_) => "parties.customer.registered",
            CustomerEvent::BalanceAdjusted(_) => "parties.customer.balance_adjusted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CustomerEvent::CustomerRegistered(e) => e.occurred_at,
            CustomerEvent::BalanceAdjusted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Customer {
    type Command = CustomerCommand;
    type Event = CustomerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CustomerEvent::CustomerRegistered(e) => {
                self.id = e.customer_id;
                self.name = e.name.clone();
                self.contact = e.contact.clone();
                self.outstanding_balance = Money::ZERO;
                self.created = true;
            }
            CustomerEvent::BalanceAdjusted(e) => {
                self.outstanding_balance = e.new_balance;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CustomerCommand::RegisterCustomer(cmd) => self.handle_register(cmd),
            CustomerCommand::AdjustOutstandingBalance(cmd) => self.handle_adjust(cmd),
        }
    }
}

impl Customer {
    fn handle_register(&self, cmd: &RegisterCustomer) -> Result<Vec<CustomerEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("customer already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        Ok(vec![CustomerEvent::CustomerRegistered(CustomerRegistered {
            customer_id: cmd.customer_id,
            name: cmd.name.trim().to_string(),
            contact: cmd.contact.normalized(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(
        &self,
        cmd: &AdjustOutstandingBalance,
    ) -> Result<Vec<CustomerEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("Customer {}", cmd.customer_id)));
        }
        if self.id != cmd.customer_id {
            return Err(DomainError::invariant("customer_id mismatch"));
        }
        if cmd.delta.is_zero() {
            return Ok(Vec::new());
        }
        let new_balance = self
            .outstanding_balance
            .checked_add(cmd.delta)
            .ok_or_else(|| DomainError::validation("outstanding balance overflows"))?;

        Ok(vec![CustomerEvent::BalanceAdjusted(BalanceAdjusted {
            customer_id: cmd.customer_id,
            delta: cmd.delta,
            previous_balance: self.outstanding_balance,
            new_balance,
            reason: cmd.reason,
            occurred_at: cmd.occurred_at,
        })])
    }
}
