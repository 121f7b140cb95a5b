use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Owner-scoped job identifier
///
/// The owner is the tenant (user) the job belongs to; the inner id is unique
/// across all owners. Both parts are immutable once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobId {
    pub owner_id: i64,
    pub id: Uuid,
}

impl JobId {
    /// Generate a new job ID for the given owner
    pub fn new(owner_id: i64) -> Self {
        Self {
            owner_id,
            id: Uuid::new_v4(),
        }
    }

    /// Create a job ID from its parts
    pub fn from_parts(owner_id: i64, id: Uuid) -> Self {
        Self { owner_id, id }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner_id, self.id)
    }
}

impl FromStr for JobId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (owner, id) = s
            .split_once(':')
            .ok_or_else(|| format!("Invalid job id: {}", s))?;
        let owner_id = owner
            .parse::<i64>()
            .map_err(|e| format!("Invalid job owner '{}': {}", owner, e))?;
        let id = Uuid::parse_str(id).map_err(|e| format!("Invalid job uuid '{}': {}", id, e))?;
        Ok(Self { owner_id, id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_parses_back() {
        let id = JobId::new(42);
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_missing_owner() {
        assert!("not-a-job-id".parse::<JobId>().is_err());
        assert!("abc:00000000-0000-0000-0000-000000000000".parse::<JobId>().is_err());
    }
}
