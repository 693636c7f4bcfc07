use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of work abandoned for manual inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: i32,
    /// Name of the unit of work.
    pub operation: String,
    pub correlation_id: String,
    /// The unit's original input.
    pub payload: serde_json::Value,
    /// The final error payload.
    pub error: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
