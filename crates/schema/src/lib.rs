pub mod alt_resolver;
pub mod filter;
pub mod transfer;
pub mod tx_record;
pub mod watch;

pub use alt_resolver::resolve_full_account_keys;

// Monitoring pipeline types
pub use filter::{FilterDecision, SuppressReason, evaluate};
pub use transfer::{AnalyzerParams, TransferEvent, analyze_transfer, find_counterparty};
pub use tx_record::{SolBalanceDelta, TxRecord};

// Watch model
pub use watch::{
    AmountError, LAMPORTS_PER_SOL, TransferDirection, WatchConfig, WatchConfigError,
    WatchDirection, WatchKey, format_sol, parse_sol_amount,
};
