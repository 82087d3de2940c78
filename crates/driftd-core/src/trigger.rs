//! Scan trigger sources and their pre-emption priority.

use serde::{Deserialize, Serialize};

/// What caused a scan to start. Order matters: variants are declared
/// low-to-high priority and `Trigger::priority` returns that rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Scheduled,
    Manual,
    Webhook,
    Api,
}

impl Trigger {
    /// Total order used for pre-emption decisions: higher wins.
    pub fn priority(&self) -> u8 {
        match self {
            Trigger::Scheduled => 0,
            Trigger::Manual => 1,
            Trigger::Webhook => 2,
            Trigger::Api => 3,
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Scheduled => write!(f, "scheduled"),
            Trigger::Manual => write!(f, "manual"),
            Trigger::Webhook => write!(f, "webhook"),
            Trigger::Api => write!(f, "api"),
        }
    }
}

impl std::str::FromStr for Trigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Trigger::Scheduled),
            "manual" => Ok(Trigger::Manual),
            "webhook" => Ok(Trigger::Webhook),
            "api" => Ok(Trigger::Api),
            _ => Err(format!("unknown trigger: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_is_strictly_ordered() {
        assert!(Trigger::Scheduled.priority() < Trigger::Manual.priority());
        assert!(Trigger::Manual.priority() < Trigger::Webhook.priority());
        assert!(Trigger::Webhook.priority() < Trigger::Api.priority());
    }
}
