use rust_decimal::Decimal;
use std::fmt;

pub use fuels::types::Address;

/// One of the two mutually exclusive outcomes of the market.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Side {
    Yes,
    No,
}

impl Side {
    /// Encoding expected by the contract's `place_bet(side: bool)` entry point.
    pub fn as_contract_flag(self) -> bool {
        matches!(self, Side::Yes)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Yes => write!(f, "YES"),
            Side::No => write!(f, "NO"),
        }
    }
}

/// Market-wide figures in display units.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MarketStats {
    pub yes_volume: Decimal,
    pub no_volume: Decimal,
    pub yes_percentage: u8,
    pub no_percentage: u8,
}

impl MarketStats {
    pub fn total_volume(&self) -> Decimal {
        self.yes_volume + self.no_volume
    }

    pub fn percentage(&self, side: Side) -> u8 {
        match side {
            Side::Yes => self.yes_percentage,
            Side::No => self.no_percentage,
        }
    }
}

/// Stakes held by one account on each side.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UserPosition {
    pub account: Address,
    pub yes_stake: Decimal,
    pub no_stake: Decimal,
}

impl UserPosition {
    pub fn stake(&self, side: Side) -> Decimal {
        match side {
            Side::Yes => self.yes_stake,
            Side::No => self.no_stake,
        }
    }

    pub fn total(&self) -> Decimal {
        self.yes_stake + self.no_stake
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BetIntent {
    pub side: Side,
    pub stake: Decimal,
}

/// Proof that a bet transaction was included.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransactionReceipt {
    pub tx_id: Option<String>,
    pub side: Side,
    pub stake: Decimal,
    pub base_units: u64,
}

/// `0x1234…abcd` form used in notifications and the wallet panel.
pub fn short_address(address: &Address) -> String {
    let full = format!("{address}");
    let hex = full.trim_start_matches("0x");
    if hex.len() <= 10 {
        return format!("0x{hex}");
    }
    format!("0x{}…{}", &hex[..6], &hex[hex.len() - 4..])
}
