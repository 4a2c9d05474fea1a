//! Instrument metadata and market-class classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use super::ParseError;
use crate::limit::LimitRules;

/// Listing board of an instrument. Each class carries its own daily price cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketClass {
    /// Shanghai/Shenzhen main board (60xxxx, 00xxxx).
    Main,
    /// Growth enterprise board (30xxxx).
    Growth,
    /// Science and technology board (68xxxx).
    Tech,
    /// Regional exchange (4xxxxx, 8xxxxx, 92xxxx).
    Regional,
}

impl MarketClass {
    /// Classify an instrument from its code prefix. Unknown prefixes fall back to main.
    pub fn from_code(code: &str) -> Self {
        if code.starts_with("60") || code.starts_with("00") {
            MarketClass::Main
        } else if code.starts_with("30") {
            MarketClass::Growth
        } else if code.starts_with("68") {
            MarketClass::Tech
        } else if code.starts_with("92") || code.starts_with('8') || code.starts_with('4') {
            MarketClass::Regional
        } else {
            MarketClass::Main
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketClass::Main => "main",
            MarketClass::Growth => "growth",
            MarketClass::Tech => "tech",
            MarketClass::Regional => "regional",
        }
    }
}

impl fmt::Display for MarketClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketClass {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(MarketClass::Main),
            "growth" => Ok(MarketClass::Growth),
            "tech" => Ok(MarketClass::Tech),
            "regional" => Ok(MarketClass::Regional),
            other => Err(ParseError::UnknownMarketClass(other.to_string())),
        }
    }
}

/// Special-treatment detection from the display name.
pub fn is_special_treatment(name: &str) -> bool {
    name.contains("ST") || name.chars().take(2).any(|c| c == 'S')
}

/// An exchange-listed instrument with its resolved daily limit ratio.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instrument {
    pub code: String,
    pub name: String,
    pub market_class: MarketClass,
    pub limit_ratio: f64,
    pub special_treatment: bool,
}

impl Instrument {
    /// Build an instrument from code and name, resolving class, ST flag and ratio.
    pub fn classify(code: impl Into<String>, name: impl Into<String>, rules: &LimitRules) -> Self {
        let code = code.into();
        let name = name.into();
        let market_class = MarketClass::from_code(&code);
        let special_treatment = is_special_treatment(&name);
        let limit_ratio = rules.ratio_for(market_class, special_treatment);
        Self {
            code,
            name,
            market_class,
            limit_ratio,
            special_treatment,
        }
    }
}
