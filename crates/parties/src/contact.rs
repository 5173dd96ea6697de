use serde::{Deserialize, Serialize};

/// Contact information for a customer or vendor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

impl ContactInfo {
    /// Blank strings are treated as absent.
    pub fn normalized(&self) -> Self {
        fn clean(v: &Option<String>) -> Option<String> {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        }
        Self {
            email: clean(&self.email),
            phone: clean(&self.phone),
            address: clean(&self.address),
        }
    }
}
