use std::collections::HashMap;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crm::CrmRecord;
use crate::session::model::{parse_count, parse_datetime};

/// The five credit pools a contact can hold.
///
/// `as_str` spellings are recorded verbatim in `token_used` on bookings so a
/// refund always reverses the exact pool that was spent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreditField {
    Sj,
    Cs,
    Sjmini,
    MockDiscussion,
    Shared,
}

impl CreditField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sj => "sj",
            Self::Cs => "cs",
            Self::Sjmini => "sjmini",
            Self::MockDiscussion => "mock_discussion",
            Self::Shared => "shared",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sj" => Some(Self::Sj),
            "cs" => Some(Self::Cs),
            "sjmini" => Some(Self::Sjmini),
            "mock_discussion" => Some(Self::MockDiscussion),
            "shared" => Some(Self::Shared),
            _ => None,
        }
    }

    /// CRM property (and fast-store column) carrying this pool.
    pub fn crm_property(&self) -> &'static str {
        match self {
            Self::Sj => "sj_credits",
            Self::Cs => "cs_credits",
            Self::Sjmini => "sjmini_credits",
            Self::MockDiscussion => "mock_discussion_credits",
            Self::Shared => "shared_credits",
        }
    }
}

/// Non-negative credit balances. `u32` makes invariant 2 (no pool below
/// zero) hold by construction; writes additionally cap at 9999.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditBalance {
    pub sj: u32,
    pub cs: u32,
    pub sjmini: u32,
    pub mock_discussion: u32,
    pub shared: u32,
}

impl CreditBalance {
    pub fn get(&self, field: CreditField) -> u32 {
        match field {
            CreditField::Sj => self.sj,
            CreditField::Cs => self.cs,
            CreditField::Sjmini => self.sjmini,
            CreditField::MockDiscussion => self.mock_discussion,
            CreditField::Shared => self.shared,
        }
    }

    pub fn set(&mut self, field: CreditField, value: u32) {
        let slot = match field {
            CreditField::Sj => &mut self.sj,
            CreditField::Cs => &mut self.cs,
            CreditField::Sjmini => &mut self.sjmini,
            CreditField::MockDiscussion => &mut self.mock_discussion,
            CreditField::Shared => &mut self.shared,
        };
        *slot = value;
    }
}

/// A student as the engine sees them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contact {
    pub uuid: Uuid,
    pub hubspot_id: String,
    pub student_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub credits: CreditBalance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl Contact {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn from_crm(record: &CrmRecord, uuid: Uuid) -> anyhow::Result<Self> {
        const KNOWN: &[&str] = &[
            "student_id",
            "email",
            "firstname",
            "lastname",
            "sj_credits",
            "cs_credits",
            "sjmini_credits",
            "mock_discussion_credits",
            "shared_credits",
            "createdate",
            "hs_lastmodifieddate",
        ];

        let student_id = record
            .prop("student_id")
            .ok_or_else(|| anyhow!("contact {}: missing student_id", record.id))?
            .to_string();
        if !is_valid_student_id(&student_id) {
            return Err(anyhow!("contact {}: malformed student_id", record.id));
        }

        let credit = |name: &str| -> anyhow::Result<u32> {
            record.prop(name).map_or(Ok(0), parse_count)
        };

        let extra = record
            .properties
            .iter()
            .filter(|(k, _)| !KNOWN.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            uuid,
            hubspot_id: record.id.clone(),
            student_id,
            email: record.prop("email").unwrap_or_default().to_lowercase(),
            first_name: record.prop("firstname").unwrap_or_default().to_string(),
            last_name: record.prop("lastname").unwrap_or_default().to_string(),
            credits: CreditBalance {
                sj: credit("sj_credits")?,
                cs: credit("cs_credits")?,
                sjmini: credit("sjmini_credits")?,
                mock_discussion: credit("mock_discussion_credits")?,
                shared: credit("shared_credits")?,
            },
            created_at: record
                .prop("createdate")
                .map(parse_datetime)
                .transpose()?
                .unwrap_or_else(Utc::now),
            updated_at: record
                .prop("hs_lastmodifieddate")
                .map(parse_datetime)
                .transpose()?
                .unwrap_or_else(Utc::now),
            extra,
        })
    }
}

/// `student_id` contract: uppercase alphanumeric, non-empty.
pub fn is_valid_student_id(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn student_id_contract() {
        assert!(is_valid_student_id("AB12"));
        assert!(!is_valid_student_id(""));
        assert!(!is_valid_student_id("ab12"));
        assert!(!is_valid_student_id("AB-12"));
    }

    #[test]
    fn balance_get_set_round_trip() {
        let mut b = CreditBalance::default();
        b.set(CreditField::Shared, 3);
        assert_eq!(b.get(CreditField::Shared), 3);
        assert_eq!(b.get(CreditField::Sj), 0);
    }

    #[test]
    fn token_used_spellings_round_trip() {
        for f in [
            CreditField::Sj,
            CreditField::Cs,
            CreditField::Sjmini,
            CreditField::MockDiscussion,
            CreditField::Shared,
        ] {
            assert_eq!(CreditField::parse(f.as_str()), Some(f));
        }
    }

    #[test]
    fn from_crm_lowercases_email_and_defaults_credits() {
        let record = CrmRecord {
            id: "201".into(),
            properties: HashMap::from([
                ("student_id".to_string(), "XY99".to_string()),
                ("email".to_string(), "Jane.Doe@Example.COM".to_string()),
                ("firstname".to_string(), "Jane".to_string()),
                ("lastname".to_string(), "Doe".to_string()),
                ("sj_credits".to_string(), "2".to_string()),
            ]),
        };

        let c = Contact::from_crm(&record, Uuid::new_v4()).unwrap();
        assert_eq!(c.email, "jane.doe@example.com");
        assert_eq!(c.credits.sj, 2);
        assert_eq!(c.credits.shared, 0);
        assert_eq!(c.full_name(), "Jane Doe");
    }
}
