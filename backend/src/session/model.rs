use std::collections::HashMap;

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crm::CrmRecord;

/// The four bookable mock examination types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MockType {
    SituationalJudgment,
    ClinicalSkills,
    MiniMock,
    MockDiscussion,
}

impl MockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SituationalJudgment => "Situational Judgment",
            Self::ClinicalSkills => "Clinical Skills",
            Self::MiniMock => "Mini-mock",
            Self::MockDiscussion => "Mock Discussion",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Situational Judgment" => Some(Self::SituationalJudgment),
            "Clinical Skills" => Some(Self::ClinicalSkills),
            "Mini-mock" => Some(Self::MiniMock),
            "Mock Discussion" => Some(Self::MockDiscussion),
            _ => None,
        }
    }

    /// Clinical Skills bookings must record the candidate's dominant hand.
    pub fn requires_dominant_hand(&self) -> bool {
        matches!(self, Self::ClinicalSkills)
    }

    /// SJ and Mini-mock bookings must record an attending location.
    pub fn requires_attending_location(&self) -> bool {
        matches!(self, Self::SituationalJudgment | Self::MiniMock)
    }
}

/// Session activation tri-state. The CRM stores this as the strings
/// `"true"`, `"false"`, and `"scheduled"`; those spellings are the single
/// source of truth for state names across both stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationState {
    Active,
    Inactive,
    Scheduled,
}

impl ActivationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "true",
            Self::Inactive => "false",
            Self::Scheduled => "scheduled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "true" => Some(Self::Active),
            "false" => Some(Self::Inactive),
            "scheduled" => Some(Self::Scheduled),
            _ => None,
        }
    }

    /// Permitted transitions:
    /// `scheduled → true`, `true ↔ false`, `scheduled → false`, and
    /// `true → scheduled` only when a future activation datetime accompanies
    /// the change.
    pub fn can_transition(self, to: Self, has_future_activation: bool) -> bool {
        use ActivationState::*;
        match (self, to) {
            (a, b) if a == b => true,
            (Scheduled, Active) => true,
            (Scheduled, Inactive) => true,
            (Active, Inactive) => true,
            (Inactive, Active) => true,
            (Active, Scheduled) => has_future_activation,
            _ => false,
        }
    }
}

/// A scheduled occurrence of a mock examination at a location.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub uuid: Uuid,
    pub hubspot_id: String,
    pub mock_type: MockType,
    pub exam_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub location: String,
    pub capacity: u32,
    pub total_bookings: u32,
    pub activation: ActivationState,
    pub scheduled_activation_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Unknown CRM properties, round-tripped untouched.
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl Session {
    pub fn is_bookable(&self) -> bool {
        self.activation == ActivationState::Active
    }

    pub fn remaining_capacity(&self) -> u32 {
        self.capacity.saturating_sub(self.total_bookings)
    }

    /// Maps this session onto the CRM property bag, `extra` included.
    pub fn to_crm_properties(&self) -> HashMap<String, String> {
        let mut props = self.extra.clone();
        props.insert("mock_type".into(), self.mock_type.as_str().into());
        props.insert(
            "exam_date".into(),
            self.exam_date.format("%Y-%m-%d").to_string(),
        );
        props.insert(
            "start_time".into(),
            self.start_time.format("%H:%M").to_string(),
        );
        props.insert("end_time".into(), self.end_time.format("%H:%M").to_string());
        props.insert("location".into(), self.location.clone());
        props.insert("capacity".into(), self.capacity.to_string());
        props.insert("total_bookings".into(), self.total_bookings.to_string());
        props.insert("is_active".into(), self.activation.as_str().into());
        if let Some(at) = self.scheduled_activation_at {
            props.insert("scheduled_activation_datetime".into(), at.to_rfc3339());
        }
        props
    }

    /// Builds a session from a CRM record, normalizing the CRM's stringly
    /// quirks. Unknown properties land in `extra`.
    pub fn from_crm(record: &CrmRecord, uuid: Uuid) -> anyhow::Result<Self> {
        const KNOWN: &[&str] = &[
            "mock_type",
            "exam_date",
            "start_time",
            "end_time",
            "location",
            "capacity",
            "total_bookings",
            "is_active",
            "scheduled_activation_datetime",
            "createdate",
            "hs_lastmodifieddate",
        ];

        let mock_type = record
            .prop("mock_type")
            .and_then(MockType::parse)
            .ok_or_else(|| anyhow!("session {}: bad mock_type", record.id))?;

        let exam_date = parse_date(
            record
                .prop("exam_date")
                .ok_or_else(|| anyhow!("session {}: missing exam_date", record.id))?,
        )?;

        let activation = record
            .prop("is_active")
            .and_then(ActivationState::parse)
            .ok_or_else(|| anyhow!("session {}: bad is_active", record.id))?;

        let extra = record
            .properties
            .iter()
            .filter(|(k, _)| !KNOWN.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            uuid,
            hubspot_id: record.id.clone(),
            mock_type,
            exam_date,
            start_time: parse_time(record.prop("start_time").unwrap_or("00:00"))?,
            end_time: parse_time(record.prop("end_time").unwrap_or("00:00"))?,
            location: record.prop("location").unwrap_or_default().to_string(),
            capacity: parse_count(record.prop("capacity").unwrap_or("0"))?,
            total_bookings: parse_count(record.prop("total_bookings").unwrap_or("0"))?,
            activation,
            scheduled_activation_at: record
                .prop("scheduled_activation_datetime")
                .map(parse_datetime)
                .transpose()?,
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

/// Admin input for creating (or cloning into) a session.
#[derive(Clone, Debug)]
pub struct SessionDraft {
    pub mock_type: MockType,
    pub exam_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub location: String,
    pub capacity: u32,
    pub activation: ActivationState,
    pub scheduled_activation_at: Option<DateTime<Utc>>,
}

impl SessionDraft {
    /// Creation-time validation: time-range sanity, capacity bounds, and the
    /// scheduled-activation pairing rule.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), String> {
        if self.end_time <= self.start_time {
            return Err(format!(
                "end_time {} must be after start_time {}",
                self.end_time.format("%H:%M"),
                self.start_time.format("%H:%M")
            ));
        }
        if !(1..=100).contains(&self.capacity) {
            return Err(format!("capacity {} outside [1,100]", self.capacity));
        }
        match (self.activation, self.scheduled_activation_at) {
            (ActivationState::Scheduled, None) => {
                Err("scheduled sessions require scheduled_activation_datetime".into())
            }
            (ActivationState::Scheduled, Some(at)) if at < now => {
                Err(format!("scheduled_activation_datetime {at} is in the past"))
            }
            _ => Ok(()),
        }
    }
}

/* =========================
Filters
========================= */

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    ExamDate,
    StartTime,
    Capacity,
    TotalBookings,
    Location,
    MockType,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

impl SortBy {
    /// Whitelisted fast-store column for ORDER BY.
    pub fn column(&self) -> &'static str {
        match self {
            Self::ExamDate => "exam_date",
            Self::StartTime => "start_time",
            Self::Capacity => "capacity",
            Self::TotalBookings => "total_bookings",
            Self::Location => "location",
            Self::MockType => "mock_type",
            Self::IsActive => "is_active",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    All,
    Active,
    Inactive,
    Scheduled,
}

impl StatusFilter {
    pub fn as_activation(&self) -> Option<ActivationState> {
        match self {
            Self::All => None,
            Self::Active => Some(ActivationState::Active),
            Self::Inactive => Some(ActivationState::Inactive),
            Self::Scheduled => Some(ActivationState::Scheduled),
        }
    }
}

/// Enumerated session search options.
#[derive(Clone, Debug, Serialize)]
pub struct SessionFilters {
    pub page: u32,
    pub limit: u32,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    pub filter_location: Option<String>,
    pub filter_mock_type: Option<MockType>,
    pub filter_status: StatusFilter,
    pub filter_date_from: Option<NaiveDate>,
    pub filter_date_to: Option<NaiveDate>,
}

impl Default for SessionFilters {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            sort_by: SortBy::ExamDate,
            sort_order: SortOrder::Asc,
            filter_location: None,
            filter_mock_type: None,
            filter_status: StatusFilter::All,
            filter_date_from: None,
            filter_date_to: None,
        }
    }
}

impl SessionFilters {
    /// Clamp paging inputs to their contract (limit ≤ 100, page ≥ 1).
    pub fn normalized(mut self) -> Self {
        self.limit = self.limit.clamp(1, 100);
        self.page = self.page.max(1);
        self
    }

    /// Stable serialization used to derive listing cache keys.
    pub fn cache_fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/* =========================
CRM value normalization
========================= */

pub fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("bad date: {s}"))
}

pub fn parse_time(s: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .with_context(|| format!("bad time: {s}"))
}

pub fn parse_datetime(s: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("bad datetime: {s}"))
}

pub fn parse_count(s: &str) -> anyhow::Result<u32> {
    let n: i64 = s.parse().with_context(|| format!("bad integer: {s}"))?;
    if !(0..=i64::from(u32::MAX)).contains(&n) {
        return Err(anyhow!("integer out of range: {n}"));
    }
    Ok(n as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(activation: ActivationState, at: Option<DateTime<Utc>>) -> SessionDraft {
        SessionDraft {
            mock_type: MockType::SituationalJudgment,
            exam_date: NaiveDate::from_ymd_opt(2026, 9, 12).unwrap(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            location: "London".into(),
            capacity: 30,
            activation,
            scheduled_activation_at: at,
        }
    }

    #[test]
    fn activation_round_trips_crm_strings() {
        for s in ["true", "false", "scheduled"] {
            assert_eq!(ActivationState::parse(s).unwrap().as_str(), s);
        }
        assert_eq!(ActivationState::parse("Active"), None);
    }

    #[test]
    fn transition_rules() {
        use ActivationState::*;
        assert!(Scheduled.can_transition(Active, false));
        assert!(Scheduled.can_transition(Inactive, false));
        assert!(Active.can_transition(Inactive, false));
        assert!(Inactive.can_transition(Active, false));
        assert!(!Active.can_transition(Scheduled, false));
        assert!(Active.can_transition(Scheduled, true));
        assert!(!Inactive.can_transition(Scheduled, true));
    }

    #[test]
    fn draft_validation_rejects_inverted_times() {
        let mut d = draft(ActivationState::Active, None);
        d.end_time = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        assert!(d.validate(Utc::now()).is_err());
    }

    #[test]
    fn draft_validation_rejects_capacity_out_of_bounds() {
        let mut d = draft(ActivationState::Active, None);
        d.capacity = 0;
        assert!(d.validate(Utc::now()).is_err());
        d.capacity = 101;
        assert!(d.validate(Utc::now()).is_err());
        d.capacity = 100;
        assert!(d.validate(Utc::now()).is_ok());
    }

    #[test]
    fn scheduled_draft_requires_future_datetime() {
        let now = Utc::now();
        assert!(draft(ActivationState::Scheduled, None).validate(now).is_err());
        assert!(
            draft(
                ActivationState::Scheduled,
                Some(now - chrono::Duration::hours(1))
            )
            .validate(now)
            .is_err()
        );
        assert!(
            draft(
                ActivationState::Scheduled,
                Some(now + chrono::Duration::hours(1))
            )
            .validate(now)
            .is_ok()
        );
    }

    #[test]
    fn from_crm_normalizes_and_keeps_extras() {
        let record = CrmRecord {
            id: "301".into(),
            properties: std::collections::HashMap::from([
                ("mock_type".to_string(), "Clinical Skills".to_string()),
                ("exam_date".to_string(), "2026-09-12".to_string()),
                ("start_time".to_string(), "09:00".to_string()),
                ("end_time".to_string(), "12:30".to_string()),
                ("location".to_string(), "Manchester".to_string()),
                ("capacity".to_string(), "24".to_string()),
                ("total_bookings".to_string(), "3".to_string()),
                ("is_active".to_string(), "true".to_string()),
                ("internal_note".to_string(), "room B".to_string()),
            ]),
        };

        let s = Session::from_crm(&record, Uuid::new_v4()).unwrap();
        assert_eq!(s.capacity, 24);
        assert_eq!(s.remaining_capacity(), 21);
        assert!(s.is_bookable());
        assert_eq!(
            s.extra.get("internal_note").map(String::as_str),
            Some("room B")
        );

        let props = s.to_crm_properties();
        assert_eq!(props.get("is_active").map(String::as_str), Some("true"));
        assert_eq!(props.get("internal_note").map(String::as_str), Some("room B"));
    }

    #[test]
    fn filters_normalize_paging() {
        let f = SessionFilters {
            page: 0,
            limit: 500,
            ..SessionFilters::default()
        }
        .normalized();
        assert_eq!(f.page, 1);
        assert_eq!(f.limit, 100);
    }
}
