//! Static tables consumed by the pipeline: abbreviation expansion,
//! symbol aliases and per-symbol expected price bands.
//!
//! All three can be overridden from the config file; the defaults below
//! cover the symbols and jargon the pipeline is normally fed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Inclusive expected price band for a symbol. Out-of-band prices produce
/// warnings, never hard failures (broker feeds differ).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceBand {
    pub min: f64,
    pub max: f64,
}

impl PriceBand {
    pub fn contains(&self, price: f64) -> bool {
        price >= self.min && price <= self.max
    }
}

/// Trading-jargon abbreviations expanded by the normalizer (word-boundary
/// matched so numbers are never touched)
pub fn default_abbreviations() -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert("SL".to_string(), "STOP LOSS".to_string());
    m.insert("TP".to_string(), "TAKE PROFIT".to_string());
    m.insert("BE".to_string(), "BREAKEVEN".to_string());
    m.insert("ENT".to_string(), "ENTRY".to_string());
    m.insert("LMT".to_string(), "LIMIT".to_string());
    m.insert("MKT".to_string(), "MARKET".to_string());
    m
}

/// Common symbol aliases mapped to canonical tickers
pub fn default_symbol_aliases() -> HashMap<String, String> {
    let mut m = HashMap::new();
    m.insert("GOLD".to_string(), "XAUUSD".to_string());
    m.insert("XAU".to_string(), "XAUUSD".to_string());
    m.insert("SILVER".to_string(), "XAGUSD".to_string());
    m.insert("XAG".to_string(), "XAGUSD".to_string());
    m.insert("OIL".to_string(), "USOIL".to_string());
    m.insert("WTI".to_string(), "USOIL".to_string());
    m.insert("BITCOIN".to_string(), "BTCUSD".to_string());
    m.insert("BTC".to_string(), "BTCUSD".to_string());
    m.insert("ETHEREUM".to_string(), "ETHUSD".to_string());
    m.insert("ETH".to_string(), "ETHUSD".to_string());
    m.insert("DOW".to_string(), "US30".to_string());
    m.insert("NASDAQ".to_string(), "NAS100".to_string());
    m.insert("SPX".to_string(), "US500".to_string());
    m
}

/// Expected price bands for the canonical symbols
pub fn default_price_bands() -> HashMap<String, PriceBand> {
    let mut m = HashMap::new();
    m.insert("EURUSD".to_string(), PriceBand { min: 0.8, max: 1.6 });
    m.insert("GBPUSD".to_string(), PriceBand { min: 1.0, max: 1.8 });
    m.insert("USDJPY".to_string(), PriceBand { min: 80.0, max: 200.0 });
    m.insert("XAUUSD".to_string(), PriceBand { min: 1000.0, max: 5000.0 });
    m.insert("XAGUSD".to_string(), PriceBand { min: 10.0, max: 100.0 });
    m.insert("USOIL".to_string(), PriceBand { min: 20.0, max: 200.0 });
    m.insert(
        "BTCUSD".to_string(),
        PriceBand {
            min: 5000.0,
            max: 500000.0,
        },
    );
    m.insert(
        "ETHUSD".to_string(),
        PriceBand {
            min: 100.0,
            max: 50000.0,
        },
    );
    m.insert(
        "US30".to_string(),
        PriceBand {
            min: 20000.0,
            max: 60000.0,
        },
    );
    m.insert(
        "NAS100".to_string(),
        PriceBand {
            min: 8000.0,
            max: 40000.0,
        },
    );
    m.insert(
        "US500".to_string(),
        PriceBand {
            min: 2000.0,
            max: 10000.0,
        },
    );
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_contains() {
        let band = PriceBand { min: 0.8, max: 1.6 };
        assert!(band.contains(1.0850));
        assert!(!band.contains(2.5));
    }

    #[test]
    fn test_gold_alias() {
        let aliases = default_symbol_aliases();
        assert_eq!(aliases.get("GOLD").map(String::as_str), Some("XAUUSD"));
    }
}
