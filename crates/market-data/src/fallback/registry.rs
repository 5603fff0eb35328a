//! Well-known symbols the synthetic generator anchors on.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// A synthetic stock record with a price anchor and fundamentals.
#[derive(Clone, Debug, PartialEq)]
pub struct FallbackStock {
    pub symbol: String,
    pub name: String,
    pub sector: String,
    pub industry: String,
    pub exchange: String,
    pub base_price: Decimal,
    pub eps: f64,
    pub pe_ratio: f64,
    pub base_volume: u64,
    pub shares_outstanding: u64,
}

struct Seed {
    symbol: &'static str,
    name: &'static str,
    sector: &'static str,
    industry: &'static str,
    exchange: &'static str,
    base_price: Decimal,
    eps: f64,
    base_volume: u64,
    shares_outstanding: u64,
}

const SEEDS: &[Seed] = &[
    Seed {
        symbol: "AAPL",
        name: "Apple Inc.",
        sector: "Technology",
        industry: "Consumer Electronics",
        exchange: "NASDAQ",
        base_price: Decimal::from_parts(15025, 0, 0, false, 2),
        eps: 6.13,
        base_volume: 55_000_000,
        shares_outstanding: 15_550_000_000,
    },
    Seed {
        symbol: "GOOGL",
        name: "Alphabet Inc.",
        sector: "Communication Services",
        industry: "Internet Content & Information",
        exchange: "NASDAQ",
        base_price: Decimal::from_parts(280050, 0, 0, false, 2),
        eps: 112.20,
        base_volume: 1_500_000,
        shares_outstanding: 660_000_000,
    },
    Seed {
        symbol: "MSFT",
        name: "Microsoft Corporation",
        sector: "Technology",
        industry: "Software - Infrastructure",
        exchange: "NASDAQ",
        base_price: Decimal::from_parts(30075, 0, 0, false, 2),
        eps: 9.65,
        base_volume: 25_000_000,
        shares_outstanding: 7_430_000_000,
    },
    Seed {
        symbol: "TSLA",
        name: "Tesla, Inc.",
        sector: "Consumer Cyclical",
        industry: "Auto Manufacturers",
        exchange: "NASDAQ",
        base_price: Decimal::from_parts(80090, 0, 0, false, 2),
        eps: 4.90,
        base_volume: 20_000_000,
        shares_outstanding: 1_000_000_000,
    },
    Seed {
        symbol: "AMZN",
        name: "Amazon.com, Inc.",
        sector: "Consumer Cyclical",
        industry: "Internet Retail",
        exchange: "NASDAQ",
        base_price: Decimal::from_parts(330000, 0, 0, false, 2),
        eps: 41.80,
        base_volume: 3_500_000,
        shares_outstanding: 510_000_000,
    },
    Seed {
        symbol: "NVDA",
        name: "NVIDIA Corporation",
        sector: "Technology",
        industry: "Semiconductors",
        exchange: "NASDAQ",
        base_price: Decimal::from_parts(45000, 0, 0, false, 2),
        eps: 4.14,
        base_volume: 40_000_000,
        shares_outstanding: 2_470_000_000,
    },
    Seed {
        symbol: "META",
        name: "Meta Platforms, Inc.",
        sector: "Communication Services",
        industry: "Internet Content & Information",
        exchange: "NASDAQ",
        base_price: Decimal::from_parts(32000, 0, 0, false, 2),
        eps: 13.77,
        base_volume: 18_000_000,
        shares_outstanding: 2_570_000_000,
    },
    Seed {
        symbol: "JPM",
        name: "JPMorgan Chase & Co.",
        sector: "Financial Services",
        industry: "Banks - Diversified",
        exchange: "NYSE",
        base_price: Decimal::from_parts(15500, 0, 0, false, 2),
        eps: 15.92,
        base_volume: 9_000_000,
        shares_outstanding: 2_900_000_000,
    },
    Seed {
        symbol: "V",
        name: "Visa Inc.",
        sector: "Financial Services",
        industry: "Credit Services",
        exchange: "NYSE",
        base_price: Decimal::from_parts(24500, 0, 0, false, 2),
        eps: 8.28,
        base_volume: 6_000_000,
        shares_outstanding: 2_050_000_000,
    },
    Seed {
        symbol: "JNJ",
        name: "Johnson & Johnson",
        sector: "Healthcare",
        industry: "Drug Manufacturers - General",
        exchange: "NYSE",
        base_price: Decimal::from_parts(16000, 0, 0, false, 2),
        eps: 6.73,
        base_volume: 7_000_000,
        shares_outstanding: 2_600_000_000,
    },
];

/// Symbols with curated records, in display order.
pub fn known_symbols() -> impl Iterator<Item = &'static str> {
    SEEDS.iter().map(|s| s.symbol)
}

/// The curated record for `symbol`, or a stable synthetic one.
pub fn lookup(symbol: &str) -> FallbackStock {
    let symbol = symbol.trim().to_uppercase();
    match SEEDS.iter().find(|s| s.symbol == symbol) {
        Some(seed) => FallbackStock {
            symbol,
            name: seed.name.to_string(),
            sector: seed.sector.to_string(),
            industry: seed.industry.to_string(),
            exchange: seed.exchange.to_string(),
            base_price: seed.base_price,
            eps: seed.eps,
            pe_ratio: pe_ratio(seed.base_price, seed.eps),
            base_volume: seed.base_volume,
            shares_outstanding: seed.shares_outstanding,
        },
        None => synthesize(symbol),
    }
}

fn pe_ratio(price: Decimal, eps: f64) -> f64 {
    let price = price.to_f64().unwrap_or(0.0);
    if eps > 0.0 {
        (price / eps * 100.0).round() / 100.0
    } else {
        0.0
    }
}

/// Stable record for an unknown ticker, derived from its md5 digest so the
/// same symbol always anchors at the same price.
fn synthesize(symbol: String) -> FallbackStock {
    let digest = md5::compute(symbol.as_bytes());
    let word = |i: usize| u32::from_be_bytes([digest[i], digest[i + 1], digest[i + 2], digest[i + 3]]);

    // 20.00 ..= 499.99
    let base_price = Decimal::new(2_000 + i64::from(word(0) % 48_000), 2);
    // P/E between 10 and 40
    let pe = 10.0 + f64::from(word(4) % 3_000) / 100.0;
    let price = base_price.to_f64().unwrap_or(100.0);
    let eps = (price / pe * 100.0).round() / 100.0;

    FallbackStock {
        name: format!("{} Corporation", symbol),
        symbol,
        sector: "Unknown".to_string(),
        industry: "Unknown".to_string(),
        exchange: "NASDAQ".to_string(),
        base_price,
        eps,
        pe_ratio: pe_ratio(base_price, eps),
        base_volume: 500_000 + u64::from(word(8) % 9_500_000),
        shares_outstanding: 50_000_000 + u64::from(word(12) % 950_000_000),
    }
}
