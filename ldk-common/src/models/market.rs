//! Market position shared between the admin desk and market research

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{Error, Result};

/// Where our asking price sits relative to the comp median
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketPosition {
    BelowMarket,
    Competitive,
    AboveMarket,
    /// No usable comparables
    Unknown,
}

impl MarketPosition {
    pub const ALL: [MarketPosition; 4] = [
        MarketPosition::BelowMarket,
        MarketPosition::Competitive,
        MarketPosition::AboveMarket,
        MarketPosition::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketPosition::BelowMarket => "below_market",
            MarketPosition::Competitive => "competitive",
            MarketPosition::AboveMarket => "above_market",
            MarketPosition::Unknown => "unknown",
        }
    }
}

impl FromStr for MarketPosition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "below_market" => Ok(MarketPosition::BelowMarket),
            "competitive" => Ok(MarketPosition::Competitive),
            "above_market" => Ok(MarketPosition::AboveMarket),
            "unknown" => Ok(MarketPosition::Unknown),
            other => Err(Error::InvalidInput(format!("Unknown market position: {}", other))),
        }
    }
}
