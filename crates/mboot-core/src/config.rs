//! Per-invocation configuration

/// Diagnostic verbosity requested by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DebugLevel {
    /// Concise one-line error reports
    #[default]
    Off,
    /// Informational logging and full error reports
    Info,
    /// Debug logging and full error reports
    Debug,
}

impl DebugLevel {
    /// Map the numeric `--debug` value (0, 1, 2); larger values saturate
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Self::Off,
            1 => Self::Info,
            _ => Self::Debug,
        }
    }

    /// Whether error reports should include full diagnostic detail
    pub fn is_verbose(self) -> bool {
        self > Self::Off
    }
}

/// Configuration passed to a [`Transfer`](crate::transfer::Transfer) at
/// construction
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Device name filter (case-insensitive substring), `None` matches all
    pub target: Option<String>,
    /// Diagnostic verbosity
    pub debug: DebugLevel,
}

impl Config {
    /// Create a configuration with a target filter
    pub fn with_target(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_level() {
        assert_eq!(DebugLevel::from_level(0), DebugLevel::Off);
        assert_eq!(DebugLevel::from_level(1), DebugLevel::Info);
        assert_eq!(DebugLevel::from_level(2), DebugLevel::Debug);
        assert_eq!(DebugLevel::from_level(9), DebugLevel::Debug);
        assert!(!DebugLevel::Off.is_verbose());
        assert!(DebugLevel::Info.is_verbose());
    }
}
