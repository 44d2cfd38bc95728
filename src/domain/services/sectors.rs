use once_cell::sync::Lazy;
use std::collections::HashMap;

pub const UNKNOWN_SECTOR: &str = "Other";

static SECTORS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for symbol in [
        "AAPL", "MSFT", "GOOGL", "GOOG", "NVDA", "META", "AMD", "INTC", "CRM", "ORCL", "ADBE",
        "AVGO", "CSCO", "QCOM", "TXN", "IBM",
    ] {
        map.insert(symbol, "Technology");
    }
    for symbol in ["AMZN", "TSLA", "HD", "MCD", "NKE", "SBUX", "LOW", "TGT", "BKNG"] {
        map.insert(symbol, "Consumer Discretionary");
    }
    for symbol in ["JPM", "BAC", "WFC", "GS", "MS", "C", "V", "MA", "AXP", "BRK.B", "SCHW"] {
        map.insert(symbol, "Financials");
    }
    for symbol in ["JNJ", "UNH", "PFE", "MRK", "ABBV", "LLY", "TMO", "ABT", "BMY", "AMGN"] {
        map.insert(symbol, "Health Care");
    }
    for symbol in ["XOM", "CVX", "COP", "SLB", "EOG", "OXY"] {
        map.insert(symbol, "Energy");
    }
    for symbol in ["PG", "KO", "PEP", "WMT", "COST", "PM", "MDLZ"] {
        map.insert(symbol, "Consumer Staples");
    }
    for symbol in ["NFLX", "DIS", "CMCSA", "T", "VZ", "TMUS"] {
        map.insert(symbol, "Communication Services");
    }
    for symbol in ["BA", "CAT", "GE", "HON", "UPS", "LMT", "RTX", "DE"] {
        map.insert(symbol, "Industrials");
    }
    for symbol in ["NEE", "DUK", "SO", "D"] {
        map.insert(symbol, "Utilities");
    }
    for symbol in ["LIN", "APD", "SHW", "FCX"] {
        map.insert(symbol, "Materials");
    }
    for symbol in ["AMT", "PLD", "CCI", "SPG"] {
        map.insert(symbol, "Real Estate");
    }
    map
});

/// Sector of a symbol, `"Other"` when unknown
pub fn sector_for(symbol: &str) -> &'static str {
    SECTORS.get(symbol).copied().unwrap_or(UNKNOWN_SECTOR)
}
