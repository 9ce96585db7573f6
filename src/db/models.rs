use serde::{Deserialize, Serialize};

/// One row of the dedup table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessedRecord {
    #[serde(rename = "paperId")]
    pub paper_id: String,
    /// ISO-8601 local timestamp of the first successful processing
    #[serde(rename = "processedDate")]
    pub processed_date: String,
}
