//! Internal event taxonomy
//!
//! Every chain callback is translated into one `InternalEvent` before it
//! reaches the bus. The taxonomy is a closed tagged enum; consumers match on
//! the variant rather than downcasting. Integer token/base quantities are
//! serialized as decimal strings so 64-bit precision survives JSON
//! boundaries; percentages and scores stay floats.

pub mod bus;
pub mod ingestion;

use serde::{Deserialize, Serialize};

pub use bus::{EventBus, EventHandler};

/// Serialize u64 quantities as decimal strings across JSON boundaries.
pub mod u64_string {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<u64>().map_err(serde::de::Error::custom)
    }
}

/// An event ingested from the chain or emitted by the node itself
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalEvent {
    /// Opaque event id
    pub id: String,
    /// Chain slot the event was observed at
    pub slot: u64,
    /// Milliseconds since epoch
    pub timestamp_ms: i64,
    /// Transaction signature, possibly empty for synthetic events
    #[serde(default)]
    pub signature: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Event payload, discriminated by `type`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    #[serde(rename_all = "camelCase")]
    WalletTransaction {
        wallet_address: String,
        #[serde(with = "u64_string")]
        amount_base: u64,
    },
    #[serde(rename_all = "camelCase")]
    TokenTransfer {
        mint_address: String,
        from_address: String,
        to_address: String,
        #[serde(with = "u64_string")]
        amount_tokens: u64,
    },
    #[serde(rename_all = "camelCase")]
    TokenBalanceChange {
        mint_address: String,
        wallet_address: String,
        #[serde(with = "u64_string")]
        previous_balance: u64,
        #[serde(with = "u64_string")]
        new_balance: u64,
    },
    #[serde(rename_all = "camelCase")]
    LpAdd {
        mint_address: String,
        pool_address: String,
        #[serde(with = "u64_string")]
        liquidity_amount: u64,
    },
    #[serde(rename_all = "camelCase")]
    LpRemove {
        mint_address: String,
        pool_address: String,
        /// Share of pool liquidity removed, as a percentage
        liquidity_amount: f64,
    },
    #[serde(rename_all = "camelCase")]
    DevWalletSell {
        mint_address: String,
        dev_wallet: String,
        #[serde(with = "u64_string")]
        amount_tokens: u64,
        percentage_of_holdings: f64,
    },
    #[serde(rename_all = "camelCase")]
    DevWalletTransfer {
        mint_address: String,
        dev_wallet: String,
        to_address: String,
        #[serde(with = "u64_string")]
        amount_tokens: u64,
    },
    #[serde(rename_all = "camelCase")]
    SupplyChange {
        mint_address: String,
        #[serde(with = "u64_string")]
        previous_supply: u64,
        #[serde(with = "u64_string")]
        new_supply: u64,
        change_percentage: f64,
    },
    #[serde(rename_all = "camelCase")]
    PositionOpened {
        position_id: String,
        mint_address: String,
        wallet_id: String,
        entry_amount_base: f64,
    },
    #[serde(rename_all = "camelCase")]
    PositionClosed {
        position_id: String,
        mint_address: String,
    },
}

impl InternalEvent {
    /// The mint this event concerns, when the variant carries one.
    pub fn mint_address(&self) -> Option<&str> {
        match &self.kind {
            EventKind::WalletTransaction { .. } => None,
            EventKind::TokenTransfer { mint_address, .. }
            | EventKind::TokenBalanceChange { mint_address, .. }
            | EventKind::LpAdd { mint_address, .. }
            | EventKind::LpRemove { mint_address, .. }
            | EventKind::DevWalletSell { mint_address, .. }
            | EventKind::DevWalletTransfer { mint_address, .. }
            | EventKind::SupplyChange { mint_address, .. }
            | EventKind::PositionOpened { mint_address, .. }
            | EventKind::PositionClosed { mint_address, .. } => Some(mint_address),
        }
    }

    /// Short tag for logging and the event log table.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            EventKind::WalletTransaction { .. } => "wallet_transaction",
            EventKind::TokenTransfer { .. } => "token_transfer",
            EventKind::TokenBalanceChange { .. } => "token_balance_change",
            EventKind::LpAdd { .. } => "lp_add",
            EventKind::LpRemove { .. } => "lp_remove",
            EventKind::DevWalletSell { .. } => "dev_wallet_sell",
            EventKind::DevWalletTransfer { .. } => "dev_wallet_transfer",
            EventKind::SupplyChange { .. } => "supply_change",
            EventKind::PositionOpened { .. } => "position_opened",
            EventKind::PositionClosed { .. } => "position_closed",
        }
    }
}

#[cfg(test)]
pub(crate) fn test_event(kind: EventKind) -> InternalEvent {
    InternalEvent {
        id: uuid::Uuid::new_v4().to_string(),
        slot: 1,
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
        signature: String::new(),
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_quantities_serialize_as_decimal_strings() {
        let event = test_event(EventKind::DevWalletSell {
            mint_address: "mint".to_string(),
            dev_wallet: "dev".to_string(),
            amount_tokens: u64::MAX,
            percentage_of_holdings: 12.5,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["amountTokens"], "18446744073709551615");
        assert_eq!(json["percentageOfHoldings"], 12.5);
        assert_eq!(json["type"], "devWalletSell");

        let back: InternalEvent = serde_json::from_value(json).unwrap();
        match back.kind {
            EventKind::DevWalletSell { amount_tokens, .. } => {
                assert_eq!(amount_tokens, u64::MAX)
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn mint_address_present_on_token_events_only() {
        let sell = test_event(EventKind::DevWalletSell {
            mint_address: "m1".to_string(),
            dev_wallet: "dev".to_string(),
            amount_tokens: 1,
            percentage_of_holdings: 1.0,
        });
        assert_eq!(sell.mint_address(), Some("m1"));

        let tx = test_event(EventKind::WalletTransaction {
            wallet_address: "w".to_string(),
            amount_base: 1,
        });
        assert_eq!(tx.mint_address(), None);
    }
}
