use std::fmt;
use std::str::FromStr;

/// What to do when a backing store (cache or rate-limit counters) errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log the failure and carry on as if the store were empty.
    #[default]
    Open,
    /// Surface the failure to the caller.
    Closed,
}

impl FailurePolicy {
    pub fn from_fail_open(fail_open: bool) -> Self {
        if fail_open { Self::Open } else { Self::Closed }
    }

    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" | "fail_open" => Ok(Self::Open),
            "closed" | "fail_closed" => Ok(Self::Closed),
            other => Err(format!("unknown failure policy `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_spellings() {
        assert_eq!("open".parse(), Ok(FailurePolicy::Open));
        assert_eq!("Fail_Closed".parse(), Ok(FailurePolicy::Closed));
        assert!("sometimes".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn bool_flag_maps_to_policy() {
        assert!(FailurePolicy::from_fail_open(true).is_open());
        assert!(!FailurePolicy::from_fail_open(false).is_open());
    }
}
