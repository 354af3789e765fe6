//! Fiscal information reported by the terminal

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registered fiscal totals and counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalRecord {
    /// Fiscal serial number of the terminal
    #[serde(rename = "serialNo")]
    pub serial_number: String,

    /// Number of the last Z report
    #[serde(rename = "zNo")]
    pub z_number: u32,

    /// Receipt counter since the last Z report
    #[serde(rename = "receiptNo")]
    pub receipt_number: u32,

    #[serde(rename = "totalAmount")]
    pub total_amount: i64,

    #[serde(rename = "totalTax")]
    pub total_tax: i64,

    /// Terminal clock at the time of the query
    #[serde(rename = "deviceTime", default, skip_serializing_if = "Option::is_none")]
    pub device_time: Option<DateTime<Utc>>,
}

impl fmt::Display for FiscalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Fiscal[SN: {}, Z: {}, receipt: {}, total: {}]",
            self.serial_number, self.z_number, self.receipt_number, self.total_amount
        )
    }
}
