use std::collections::HashMap;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contact::model::CreditField;
use crate::crm::CrmRecord;
use crate::error::{EngineError, Warning};
use crate::session::model::{
    MockType, parse_date, parse_datetime, parse_time,
};

/// Booking lifecycle. The CRM stores `"Active"`, `"Cancelled"`, and
/// `"Completed"` as strings; `Cancelled` and `Completed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Active,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Cancelled => "Cancelled",
            Self::Completed => "Completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Active" => Some(Self::Active),
            "Cancelled" => Some(Self::Cancelled),
            "Completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }
}

/// A held seat. The fast store keys bookings on the local `uuid`: a booking
/// may exist locally before (or without) its CRM counterpart, so the CRM id
/// is a nullable secondary identifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Booking {
    pub uuid: Uuid,
    pub hubspot_id: Option<String>,
    pub booking_id: String,
    /// CRM id of the owning session.
    pub associated_session: String,
    /// CRM id of the owning contact.
    pub associated_contact: String,
    pub student_id: String,
    pub name: String,
    pub email: String,
    pub mock_type: MockType,
    pub exam_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: BookingStatus,
    pub attendance: Option<String>,
    pub attending_location: Option<String>,
    pub dominant_hand: Option<bool>,
    pub token_used: Option<CreditField>,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl Booking {
    /// Properties written at CRM create time. Session-derived properties
    /// (mock type, date, times, location) are calculated by the CRM from the
    /// association and are intentionally absent.
    pub fn to_crm_create_properties(&self) -> HashMap<String, String> {
        let mut props = self.extra.clone();
        props.insert("booking_id".into(), self.booking_id.clone());
        props.insert("name".into(), self.name.clone());
        props.insert("email".into(), self.email.clone());
        props.insert("student_id".into(), self.student_id.clone());
        props.insert("is_active".into(), self.status.as_str().into());
        props.insert("idempotency_key".into(), self.idempotency_key.clone());
        if let Some(field) = self.token_used {
            props.insert("token_used".into(), field.as_str().into());
        }
        if let Some(hand) = self.dominant_hand {
            props.insert("dominant_hand".into(), hand.to_string());
        }
        if let Some(loc) = &self.attending_location {
            props.insert("attending_location".into(), loc.clone());
        }
        props
    }

    /// Rebuilds a booking from its CRM record (backfill path). The
    /// session-derived properties are read back from the CRM's calculated
    /// values.
    pub fn from_crm(
        record: &CrmRecord,
        uuid: Uuid,
        associated_session: String,
        associated_contact: String,
    ) -> anyhow::Result<Self> {
        const KNOWN: &[&str] = &[
            "booking_id",
            "name",
            "email",
            "student_id",
            "is_active",
            "token_used",
            "idempotency_key",
            "dominant_hand",
            "attending_location",
            "attendance",
            "mock_type",
            "exam_date",
            "start_time",
            "end_time",
            "createdate",
            "hs_lastmodifieddate",
        ];

        let status = record
            .prop("is_active")
            .and_then(BookingStatus::parse)
            .ok_or_else(|| anyhow!("booking {}: bad is_active", record.id))?;

        let mock_type = record
            .prop("mock_type")
            .and_then(MockType::parse)
            .ok_or_else(|| anyhow!("booking {}: bad mock_type", record.id))?;

        let extra = record
            .properties
            .iter()
            .filter(|(k, _)| !KNOWN.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            uuid,
            hubspot_id: Some(record.id.clone()),
            booking_id: record.prop("booking_id").unwrap_or_default().to_string(),
            associated_session,
            associated_contact,
            student_id: record.prop("student_id").unwrap_or_default().to_string(),
            name: record.prop("name").unwrap_or_default().to_string(),
            email: record.prop("email").unwrap_or_default().to_lowercase(),
            mock_type,
            exam_date: parse_date(
                record
                    .prop("exam_date")
                    .ok_or_else(|| anyhow!("booking {}: missing exam_date", record.id))?,
            )?,
            start_time: parse_time(record.prop("start_time").unwrap_or("00:00"))?,
            end_time: parse_time(record.prop("end_time").unwrap_or("00:00"))?,
            status,
            attendance: record.prop("attendance").map(str::to_string),
            attending_location: record.prop("attending_location").map(str::to_string),
            dominant_hand: record.prop("dominant_hand").map(|v| v == "true"),
            token_used: record.prop("token_used").and_then(CreditField::parse),
            idempotency_key: record
                .prop("idempotency_key")
                .unwrap_or_default()
                .to_string(),
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

/* =========================
Commands
========================= */

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Student,
    Admin,
}

/// Validated create command, as handed over by the host.
#[derive(Clone, Debug)]
pub struct CreateBooking {
    pub contact_id: String,
    pub session_id: String,
    pub student_id: String,
    pub name: String,
    pub email: String,
    pub mock_type: MockType,
    pub exam_date: NaiveDate,
    pub dominant_hand: Option<bool>,
    pub attending_location: Option<String>,
    pub idempotency_key: Option<String>,
}

impl CreateBooking {
    /// Per-type required fields: dominant hand for Clinical Skills,
    /// attending location for SJ and Mini-mock.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.mock_type.requires_dominant_hand() && self.dominant_hand.is_none() {
            return Err(EngineError::Validation(
                "dominant_hand is required for Clinical Skills bookings".into(),
            ));
        }
        if self.mock_type.requires_attending_location()
            && self
                .attending_location
                .as_deref()
                .is_none_or(|l| l.trim().is_empty())
        {
            return Err(EngineError::Validation(format!(
                "attending_location is required for {} bookings",
                self.mock_type.as_str()
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct CancelBooking {
    /// Local uuid or CRM id; resolved by cascading lookup.
    pub identifier: String,
    pub actor: Actor,
    pub reason: Option<String>,
    pub refund_tokens: bool,
}

#[derive(Clone, Debug)]
pub struct RebookBooking {
    pub identifier: String,
    pub new_session_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingFilter {
    All,
    Upcoming,
    Past,
}

impl BookingFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Upcoming => "upcoming",
            Self::Past => "past",
        }
    }
}

/* =========================
Outcomes
========================= */

#[derive(Clone, Debug, Serialize)]
pub struct CreateOutcome {
    pub booking: Booking,
    /// Remaining balance of the pool that was (or would be) debited.
    pub specific_after: u32,
    pub shared_after: u32,
    pub idempotency_key: String,
    pub idempotent_request: bool,
    pub warnings: Vec<Warning>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CancelOutcome {
    pub booking: Booking,
    /// True when the booking was already terminal and nothing moved.
    pub already_terminal: bool,
    pub warnings: Vec<Warning>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RebookOutcome {
    pub booking: Booking,
    pub warnings: Vec<Warning>,
}

/// Transport-agnostic outcome record: `{success, code?, data?, warnings?}`.
#[derive(Clone, Debug, Serialize)]
pub struct Outcome<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

impl<T> Outcome<T> {
    pub fn ok(data: T, warnings: Vec<Warning>) -> Self {
        Self {
            success: true,
            code: None,
            data: Some(data),
            warnings,
        }
    }

    pub fn err(e: &EngineError) -> Self {
        Self {
            success: false,
            code: Some(e.code()),
            data: None,
            warnings: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_cmd(mock_type: MockType) -> CreateBooking {
        CreateBooking {
            contact_id: "201".into(),
            session_id: "301".into(),
            student_id: "AB12".into(),
            name: "Jane Doe".into(),
            email: "jane@example.com".into(),
            mock_type,
            exam_date: NaiveDate::from_ymd_opt(2026, 9, 12).unwrap(),
            dominant_hand: None,
            attending_location: None,
            idempotency_key: None,
        }
    }

    #[test]
    fn status_round_trips_and_terminality() {
        for s in ["Active", "Cancelled", "Completed"] {
            assert_eq!(BookingStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(!BookingStatus::Active.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
        assert!(BookingStatus::Completed.is_terminal());
    }

    #[test]
    fn clinical_skills_requires_dominant_hand() {
        let mut cmd = create_cmd(MockType::ClinicalSkills);
        assert!(cmd.validate().is_err());
        cmd.dominant_hand = Some(true);
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn sj_and_mini_mock_require_attending_location() {
        for mt in [MockType::SituationalJudgment, MockType::MiniMock] {
            let mut cmd = create_cmd(mt);
            assert!(cmd.validate().is_err());
            cmd.attending_location = Some("  ".into());
            assert!(cmd.validate().is_err());
            cmd.attending_location = Some("London".into());
            assert!(cmd.validate().is_ok());
        }
    }

    #[test]
    fn mock_discussion_needs_no_extras() {
        assert!(create_cmd(MockType::MockDiscussion).validate().is_ok());
    }

    #[test]
    fn outcome_records_carry_codes_and_warnings() {
        let ok: Outcome<u8> = Outcome::ok(7, vec![Warning::counter_fallback("slow path")]);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], 7);
        assert_eq!(json["warnings"][0]["code"], "COUNTER_FALLBACK");

        let err: Outcome<u8> = Outcome::err(&EngineError::ExamFull("s1".into()));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "EXAM_FULL");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn crm_create_properties_omit_calculated_fields() {
        let cmd = create_cmd(MockType::MockDiscussion);
        let booking = Booking {
            uuid: Uuid::new_v4(),
            hubspot_id: None,
            booking_id: "Mock Discussion-Jane Doe - September 12, 2026".into(),
            associated_session: cmd.session_id.clone(),
            associated_contact: cmd.contact_id.clone(),
            student_id: cmd.student_id.clone(),
            name: cmd.name.clone(),
            email: cmd.email.clone(),
            mock_type: cmd.mock_type,
            exam_date: cmd.exam_date,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            status: BookingStatus::Active,
            attendance: None,
            attending_location: None,
            dominant_hand: None,
            token_used: Some(CreditField::MockDiscussion),
            idempotency_key: "idem_x".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            extra: HashMap::new(),
        };

        let props = booking.to_crm_create_properties();
        assert_eq!(props.get("is_active").map(String::as_str), Some("Active"));
        assert_eq!(
            props.get("token_used").map(String::as_str),
            Some("mock_discussion")
        );
        assert!(!props.contains_key("mock_type"));
        assert!(!props.contains_key("exam_date"));
        assert!(!props.contains_key("start_time"));
    }
}
