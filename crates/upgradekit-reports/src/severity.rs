use std::fmt;

/// Severity of a system status entry. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Notice,
    Info,
    Ok,
    Warning,
    Error,
}

impl Severity {
    /// Numeric value as stored in the registry.
    pub const fn as_i64(self) -> i64 {
        match self {
            Severity::Notice => -2,
            Severity::Info => -1,
            Severity::Ok => 0,
            Severity::Warning => 1,
            Severity::Error => 2,
        }
    }

    pub const fn from_i64(value: i64) -> Option<Self> {
        match value {
            -2 => Some(Severity::Notice),
            -1 => Some(Severity::Info),
            0 => Some(Severity::Ok),
            1 => Some(Severity::Warning),
            2 => Some(Severity::Error),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Severity::Notice => "notice",
            Severity::Info => "info",
            Severity::Ok => "ok",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
