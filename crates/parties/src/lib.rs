//! Parties context: the customers invoices are billed to and the vendors
//! purchases are ordered from.
//!
//! Pure domain logic only; the engine persists these through the ledger store.

pub mod contact;
pub mod customer;
pub mod vendor;

pub use contact::ContactInfo;
pub use customer::{
    AdjustOutstandingBalance, BalanceAdjusted, BalanceChangeReason, Customer, CustomerCommand,
    CustomerEvent, CustomerId, CustomerRegistered, CustomerSnapshot, RegisterCustomer,
};
pub use vendor::{RegisterVendor, Vendor, VendorId, VendorRegistered};
