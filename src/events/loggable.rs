use serde::{Deserialize, Serialize};

/// Severity levels for audit rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Policy and identity destruction; never trimmed
    Critical,
    #[default]
    Important,
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }
}

/// Entities whose changes are written to the audit trail.
pub trait Loggable: Serialize + Send + Sync {
    /// Prefix of event names, e.g. "grant" in "grant.created"
    fn entity_type() -> &'static str;

    fn subject_id(&self) -> String;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deleted" | "locked_out" => Severity::Critical,
            _ => self.severity(),
        }
    }
}
