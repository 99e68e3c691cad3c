use serde::{Deserialize, Serialize};

/// Whether the device has a usable network path, and over which medium.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    #[default]
    Unreachable,
    Cellular,
    Wifi,
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        !matches!(self, Reachability::Unreachable)
    }

    pub fn is_wifi(&self) -> bool {
        matches!(self, Reachability::Wifi)
    }
}

/// Decides whether network-dependent work may run now. A `false` answer
/// means the caller marks the check as missed so the next reachability
/// change retries it.
pub struct NetworkGate;

impl NetworkGate {
    pub fn should_proceed(reachability: Reachability, allow_cellular: bool) -> bool {
        reachability.is_reachable() && (allow_cellular || reachability.is_wifi())
    }
}
