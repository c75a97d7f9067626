use std::fmt;

/// Machine state as reported by the gateway's status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrinterStatus {
    /// A job is running from the SD card.
    Printing,
    Paused,
    /// Idle and ready; after a job this means the job has finished.
    Operational,
    Unknown(String),
}

impl PrinterStatus {
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "printing from sd" | "printing" => PrinterStatus::Printing,
            "paused" | "pausing" => PrinterStatus::Paused,
            "operational" => PrinterStatus::Operational,
            _ => PrinterStatus::Unknown(raw.trim().to_string()),
        }
    }

    pub fn is_printing(&self) -> bool {
        matches!(self, PrinterStatus::Printing)
    }
}

impl From<&str> for PrinterStatus {
    fn from(raw: &str) -> Self {
        Self::from_raw(raw)
    }
}

impl fmt::Display for PrinterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrinterStatus::Printing => write!(f, "printing"),
            PrinterStatus::Paused => write!(f, "paused"),
            PrinterStatus::Operational => write!(f, "operational"),
            PrinterStatus::Unknown(raw) => write!(f, "unknown ({raw})"),
        }
    }
}
