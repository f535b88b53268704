use std::collections::HashMap;

/// CRM object types handled by the engine, keyed by their opaque type ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Contact,
    MockExam,
    Booking,
}

impl ObjectType {
    /// Opaque object-type id used in CRM API paths.
    pub fn type_id(&self) -> &'static str {
        match self {
            Self::Contact => "0-1",
            Self::MockExam => "2-41226496",
            Self::Booking => "2-41226497",
        }
    }
}

/// A CRM object as the wire sees it: an id plus a string property bag.
/// Typed models map in and out of this at the boundary and round-trip
/// unknown properties through their `extra` side channel.
#[derive(Clone, Debug, Default)]
pub struct CrmRecord {
    pub id: String,
    pub properties: HashMap<String, String>,
}

impl CrmRecord {
    pub fn prop(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Lte,
    Gte,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "EQ",
            Self::Neq => "NEQ",
            Self::Lte => "LTE",
            Self::Gte => "GTE",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SearchFilter {
    pub property: String,
    pub op: FilterOp,
    pub value: String,
}

impl SearchFilter {
    pub fn eq(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn lte(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            op: FilterOp::Lte,
            value: value.into(),
        }
    }

    pub fn matches(&self, record: &CrmRecord) -> bool {
        let Some(actual) = record.prop(&self.property) else {
            return self.op == FilterOp::Neq;
        };

        // ISO dates and zero-padded numerics compare correctly as strings.
        match self.op {
            FilterOp::Eq => actual == self.value,
            FilterOp::Neq => actual != self.value,
            FilterOp::Lte => actual <= self.value.as_str(),
            FilterOp::Gte => actual >= self.value.as_str(),
        }
    }
}
