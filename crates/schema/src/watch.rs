//! Watch subscriptions and native amount helpers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;
const SOL_DECIMALS: usize = 9;

/// Which transfers a watch is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WatchDirection {
    Incoming,
    Outgoing,
    #[default]
    Both,
}

/// Direction of an observed transfer relative to the watched address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Incoming,
    Outgoing,
}

impl WatchDirection {
    pub fn matches(self, direction: TransferDirection) -> bool {
        match self {
            WatchDirection::Both => true,
            WatchDirection::Incoming => direction == TransferDirection::Incoming,
            WatchDirection::Outgoing => direction == TransferDirection::Outgoing,
        }
    }
}

impl FromStr for WatchDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "incoming" | "in" => Ok(WatchDirection::Incoming),
            "outgoing" | "out" => Ok(WatchDirection::Outgoing),
            "both" | "all" => Ok(WatchDirection::Both),
            other => Err(format!("invalid direction '{other}', use incoming|outgoing|both")),
        }
    }
}

impl fmt::Display for WatchDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchDirection::Incoming => write!(f, "incoming"),
            WatchDirection::Outgoing => write!(f, "outgoing"),
            WatchDirection::Both => write!(f, "both"),
        }
    }
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::Incoming => write!(f, "incoming"),
            TransferDirection::Outgoing => write!(f, "outgoing"),
        }
    }
}

/// Identity of a watch across all owners.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchKey {
    pub owner_id: String,
    pub watch_id: u64,
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_id, self.watch_id)
    }
}

/// One monitored account subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Subscriber identifier (chat id for Telegram delivery)
    pub owner_id: String,

    /// Unique within the owner's set, never reused
    pub watch_id: u64,

    /// Friendly name chosen by the owner
    #[serde(default)]
    pub label: String,

    /// Watched account (base58)
    pub address: String,

    /// Lower bound in lamports (inclusive)
    #[serde(default)]
    pub min_amount: Option<u64>,

    /// Upper bound in lamports (inclusive)
    #[serde(default)]
    pub max_amount: Option<u64>,

    #[serde(default)]
    pub direction: WatchDirection,

    #[serde(default = "default_active")]
    pub active: bool,

    /// Creation time (Unix seconds)
    #[serde(default)]
    pub created_at: i64,
}

fn default_active() -> bool {
    true
}

impl WatchConfig {
    pub fn key(&self) -> WatchKey {
        WatchKey {
            owner_id: self.owner_id.clone(),
            watch_id: self.watch_id,
        }
    }

    /// Checks the amount bounds against the process-wide floor.
    pub fn validate(&self, floor: u64) -> Result<(), WatchConfigError> {
        match self.min_amount {
            Some(min) if min < floor => {
                return Err(WatchConfigError::MinBelowFloor { min, floor });
            }
            _ => {}
        }

        if let Some(max) = self.max_amount {
            let lower = self.min_amount.unwrap_or(floor);
            if max <= lower {
                return Err(WatchConfigError::MaxNotAboveMin { max, min: lower });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchConfigError {
    MinBelowFloor { min: u64, floor: u64 },
    MaxNotAboveMin { max: u64, min: u64 },
}

impl fmt::Display for WatchConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchConfigError::MinBelowFloor { min, floor } => write!(
                f,
                "minimum {} SOL is below the global floor of {} SOL",
                format_sol(*min),
                format_sol(*floor)
            ),
            WatchConfigError::MaxNotAboveMin { max, min } => write!(
                f,
                "maximum {} SOL must be greater than the minimum {} SOL",
                format_sol(*max),
                format_sol(*min)
            ),
        }
    }
}

impl std::error::Error for WatchConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    Empty,
    Invalid(String),
    TooPrecise(String),
    Overflow(String),
}

impl fmt::Display for AmountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmountError::Empty => write!(f, "empty amount"),
            AmountError::Invalid(s) => write!(f, "invalid SOL amount '{s}'"),
            AmountError::TooPrecise(s) => write!(f, "'{s}' has more than 9 decimal places"),
            AmountError::Overflow(s) => write!(f, "'{s}' does not fit in lamports"),
        }
    }
}

impl std::error::Error for AmountError {}

/// Parses a decimal SOL amount ("1.5", "0.000001", "3") into lamports without floating point.
pub fn parse_sol_amount(input: &str) -> Result<u64, AmountError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(AmountError::Empty);
    }

    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
    let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && frac.is_empty()) || !all_digits(whole) || !all_digits(frac) {
        return Err(AmountError::Invalid(s.to_string()));
    }
    if frac.len() > SOL_DECIMALS {
        return Err(AmountError::TooPrecise(s.to_string()));
    }

    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| AmountError::Overflow(s.to_string()))?
    };
    let frac: u64 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<width$}", width = SOL_DECIMALS)
            .parse()
            .map_err(|_| AmountError::Invalid(s.to_string()))?
    };

    whole
        .checked_mul(LAMPORTS_PER_SOL)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(|| AmountError::Overflow(s.to_string()))
}

/// Renders lamports as SOL with trailing zeros trimmed.
pub fn format_sol(lamports: u64) -> String {
    let whole = lamports / LAMPORTS_PER_SOL;
    let frac = lamports % LAMPORTS_PER_SOL;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:09}");
    format!("{whole}.{}", frac.trim_end_matches('0'))
}
