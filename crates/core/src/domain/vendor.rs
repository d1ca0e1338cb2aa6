use serde::{Deserialize, Serialize};

pub const PLACEHOLDER_VENDOR_PHONE: &str = "555-0000";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vendor {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub contact_person: Option<String>,
    pub address: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorField {
    Email,
    Phone,
}

/// A vendor contact value the engine synthesized because the record had none.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorRepair {
    pub field: VendorField,
    pub value: String,
}

impl Vendor {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn has_name(&self) -> bool {
        !self.name.trim().is_empty()
    }

    pub fn email(&self) -> Option<&str> {
        non_blank(self.email.as_deref())
    }

    pub fn phone(&self) -> Option<&str> {
        non_blank(self.phone.as_deref())
    }

    /// `sales@<name with everything outside [a-z0-9] stripped>.com`
    ///
    /// A name with no ASCII letters or digits leaves the slug empty and yields `sales@.com`.
    /// The address is a recorded placeholder, not a deliverable one, so it is kept as is.
    pub fn synthesized_email(&self) -> String {
        let slug: String = self
            .name
            .to_lowercase()
            .chars()
            .filter(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit())
            .collect();
        format!("sales@{slug}.com")
    }

    /// Fills in missing email/phone with deterministic defaults and reports what changed.
    pub fn repair_contact(&mut self) -> Vec<VendorRepair> {
        let mut repairs = Vec::new();

        if self.email().is_none() {
            let value = self.synthesized_email();
            self.email = Some(value.clone());
            repairs.push(VendorRepair { field: VendorField::Email, value });
        }

        if self.phone().is_none() {
            let value = PLACEHOLDER_VENDOR_PHONE.to_string();
            self.phone = Some(value.clone());
            repairs.push(VendorRepair { field: VendorField::Phone, value });
        }

        repairs
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
