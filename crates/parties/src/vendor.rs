use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, Event, UserId};

use crate::contact::ContactInfo;

stockledger_core::typed_id!(
    /// Vendor identifier.
    VendorId
);

/// A supplier that purchases are ordered from.
///
/// Vendors carry no derived state, so they are plain records rather than
/// aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vendor {
    pub id: VendorId,
    pub name: String,
    pub contact: ContactInfo,
    pub active: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterVendor {
    pub vendor_id: VendorId,
    pub name: String,
    pub contact: ContactInfo,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VendorRegistered. Carries the new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorRegistered {
    pub vendor: Vendor,
}

impl Event for VendorRegistered {
    fn event_type(&self) -> &'static str {
        "parties.vendor.registered"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.vendor.created_at
    }
}

impl Vendor {
    pub fn register(cmd: &RegisterVendor) -> Result<VendorRegistered, DomainError> {
        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("vendor name cannot be empty"));
        }
        let vendor = Self {
            id: cmd.vendor_id,
            name: name.to_string(),
            contact: cmd.contact.normalized(),
            active: true,
            created_by: cmd.actor,
            created_at: cmd.occurred_at,
        };
        Ok(VendorRegistered { vendor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_requires_a_name() {
        let cmd = RegisterVendor {
            vendor_id: VendorId::generate(),
            name: "   ".to_string(),
            contact: ContactInfo::default(),
            actor: UserId::new(),
            occurred_at: Utc::now(),
        };
        assert!(Vendor::register(&cmd).unwrap_err().is_validation());

        let registered = Vendor::register(&RegisterVendor {
            name: "Northwind".to_string(),
            ..cmd
        })
        .unwrap();
        assert_eq!(registered.event_type(), "parties.vendor.registered");
        let vendor = registered.vendor;
        assert!(vendor.active);
        assert_eq!(vendor.name, "Northwind");
    }
}
