use std::collections::BTreeSet;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};
use log::{info, warn};
use regex::Regex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Advertised to clients as how often to poll; unrelated to the cache TTL.
pub const REFRESH_PERIOD_SECS: u64 = 1800;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

pub const DEFAULT_ADDITIONAL_PAIRS: [&str; 9] = [
    "1000PEPE/USDT",
    "XAI/USDT",
    "FET/USDT",
    "WIF/USDT",
    "1000SATS/USDT",
    "FRONT/USDT",
    "ZEC/USDT",
    "SOL/USDT",
    "TRU/USDT",
];

const SPOT_EXCHANGE_INFO: &str = "https://api.binance.com/api/v3/exchangeInfo";
const FUTURES_EXCHANGE_INFO: &str = "https://fapi.binance.com/fapi/v1/exchangeInfo";

#[derive(Error, Debug)]
pub enum PairlistError {
    #[error("market metadata request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned {status} for {url}")]
    Status { status: u16, url: String },
    #[error("failed to encode pair list: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A market in unified notation: `BASE/QUOTE` for spot,
/// `BASE/QUOTE:SETTLE[-EXPIRY]` for contracts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Market {
    pub symbol: String,
    pub active: bool,
}

impl Market {
    pub fn new(symbol: impl Into<String>, active: bool) -> Self {
        Market { symbol: symbol.into(), active }
    }
}

pub trait MarketSource: Send + Sync {
    fn spot_markets(&self) -> Result<Vec<Market>, PairlistError>;
    fn futures_markets(&self) -> Result<Vec<Market>, PairlistError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairsResponse {
    pub pairs: Vec<String>,
    pub refresh_period: u64,
}

pub fn active_spot_pairs(markets: &[Market]) -> BTreeSet<String> {
    markets
        .iter()
        .filter(|m| m.active && m.symbol.ends_with("/USDT"))
        .map(|m| m.symbol.clone())
        .collect()
}

fn leading_digits() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+").unwrap())
}

/// `1000PEPE/USDT:USDT` becomes `PEPE/USDT` unless `1000PEPE/USDT` itself
/// trades on spot.
pub fn normalize_futures_pair(pair: &str, spot_pairs: &BTreeSet<String>) -> String {
    let base = pair.split(':').next().unwrap_or(pair);
    if spot_pairs.contains(base) {
        return base.to_string();
    }
    leading_digits().replace(base, "").into_owned()
}

pub fn active_futures_pairs(markets: &[Market], spot_pairs: &BTreeSet<String>) -> BTreeSet<String> {
    markets
        .iter()
        .filter(|m| m.active && m.symbol.ends_with(":USDT"))
        .map(|m| normalize_futures_pair(&m.symbol, spot_pairs))
        .collect()
}

/// Spot USDT pairs with no perpetual counterpart, plus the always-included
/// extras, sorted.
pub fn spot_pairs_not_in_futures(
    source: &dyn MarketSource,
    additional: &BTreeSet<String>,
) -> Result<Vec<String>, PairlistError> {
    let spot = active_spot_pairs(&source.spot_markets()?);
    let futures = active_futures_pairs(&source.futures_markets()?, &spot);

    let pairs: BTreeSet<String> = spot.difference(&futures).cloned().chain(additional.iter().cloned()).collect();
    Ok(pairs.into_iter().collect())
}

struct CachedBody {
    body: String,
    stored_at: Instant,
}

/// Serialized pair list kept for `ttl`. Cached bodies are handed back
/// byte for byte.
pub struct PairCache {
    source: Box<dyn MarketSource>,
    additional: BTreeSet<String>,
    ttl: Duration,
    slot: Mutex<Option<CachedBody>>,
}

impl PairCache {
    pub fn new(source: Box<dyn MarketSource>, additional: BTreeSet<String>, ttl: Duration) -> Self {
        PairCache {
            source,
            additional,
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub fn with_defaults(source: Box<dyn MarketSource>) -> Self {
        let additional = DEFAULT_ADDITIONAL_PAIRS.iter().map(|s| s.to_string()).collect();
        PairCache::new(source, additional, DEFAULT_CACHE_TTL)
    }

    /// Cached body if still fresh, otherwise a new one from upstream.
    pub fn get(&self) -> Result<String, PairlistError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = slot.as_ref() {
            if cached.stored_at.elapsed() < self.ttl {
                return Ok(cached.body.clone());
            }
        }
        let body = self.fetch_body()?;
        *slot = Some(CachedBody { body: body.clone(), stored_at: Instant::now() });
        Ok(body)
    }

    /// Drops whatever is cached and stores a freshly computed body.
    pub fn refresh(&self) -> Result<String, PairlistError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
        info!("Pair cache cleared.");
        let body = self.fetch_body()?;
        *slot = Some(CachedBody { body: body.clone(), stored_at: Instant::now() });
        Ok(body)
    }

    fn fetch_body(&self) -> Result<String, PairlistError> {
        let pairs = spot_pairs_not_in_futures(self.source.as_ref(), &self.additional)?;
        info!("Computed {} spot pairs without futures.", pairs.len());
        let response = PairsResponse { pairs, refresh_period: REFRESH_PERIOD_SECS };
        Ok(serde_json::to_string(&response)?)
    }
}

#[derive(Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
    #[serde(default)]
    margin_asset: Option<String>,
    #[serde(default)]
    contract_type: Option<String>,
}

fn spot_market(info: &SymbolInfo) -> Market {
    Market::new(format!("{}/{}", info.base_asset, info.quote_asset), info.status == "TRADING")
}

/// Perpetuals read `BASE/QUOTE:SETTLE`; dated contracts append the expiry
/// from the exchange symbol (`BTCUSDT_250328` -> `-250328`).
fn futures_market(info: &SymbolInfo) -> Market {
    let settle = info.margin_asset.as_deref().unwrap_or(&info.quote_asset);
    let mut symbol = format!("{}/{}:{}", info.base_asset, info.quote_asset, settle);
    let perpetual = matches!(info.contract_type.as_deref(), None | Some("") | Some("PERPETUAL"));
    if !perpetual {
        if let Some((_, expiry)) = info.symbol.split_once('_') {
            symbol.push('-');
            symbol.push_str(expiry);
        }
    }
    Market::new(symbol, info.status == "TRADING")
}

/// Spot and USDT-margined futures market metadata from the exchange's
/// public REST API.
pub struct BinanceMarkets {
    client: Client,
    spot_url: String,
    futures_url: String,
}

impl BinanceMarkets {
    pub fn new() -> Result<Self, PairlistError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(BinanceMarkets {
            client,
            spot_url: SPOT_EXCHANGE_INFO.to_string(),
            futures_url: FUTURES_EXCHANGE_INFO.to_string(),
        })
    }

    fn exchange_info(&self, url: &str) -> Result<ExchangeInfo, PairlistError> {
        let resp = self.client.get(url).send()?;
        if !resp.status().is_success() {
            warn!("Market metadata request failed with status: {}", resp.status());
            return Err(PairlistError::Status { status: resp.status().as_u16(), url: url.to_string() });
        }
        Ok(resp.json()?)
    }
}

impl MarketSource for BinanceMarkets {
    fn spot_markets(&self) -> Result<Vec<Market>, PairlistError> {
        let info = self.exchange_info(&self.spot_url)?;
        Ok(info.symbols.iter().map(spot_market).collect())
    }

    fn futures_markets(&self) -> Result<Vec<Market>, PairlistError> {
        let info = self.exchange_info(&self.futures_url)?;
        Ok(info.symbols.iter().map(futures_market).collect())
    }
}


#[cfg(test)]
mod tests {
    use super::fake::CountingSource;
    use super::*;
    use std::sync::atomic::Ordering;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalization_strips_numeric_prefix_only_when_needed() {
        let spot = set(&["1000SATS/USDT", "PEPE/USDT"]);
        assert_eq!(normalize_futures_pair("1000PEPE/USDT:USDT", &spot), "PEPE/USDT");
        assert_eq!(normalize_futures_pair("1000SATS/USDT:USDT", &spot), "1000SATS/USDT");
        assert_eq!(normalize_futures_pair("BTC/USDT:USDT", &spot), "BTC/USDT");
    }

    #[test]
    fn pairs_exclude_perpetuals_and_include_extras() {
        let (source, _) = CountingSource::sample();
        let pairs = spot_pairs_not_in_futures(&source, &set(&["SOL/USDT", "BTC/USDT"])).unwrap();

        // NEWCOIN only has a dated contract, PEPE matches 1000PEPE after normalization.
        assert_eq!(pairs, vec!["BTC/USDT", "NEWCOIN/USDT", "SOL/USDT"]);
    }

    #[test]
    fn cache_serves_identical_body_within_ttl() {
        let (source, fetches) = CountingSource::sample();
        let cache = PairCache::new(Box::new(source), set(&["XAI/USDT"]), Duration::from_secs(60));

        let first = cache.get().unwrap();
        let second = cache.get().unwrap();

        assert_eq!(first, second);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        let parsed: PairsResponse = serde_json::from_str(&first).unwrap();
        assert_eq!(parsed.refresh_period, 1800);
        assert_eq!(parsed.pairs, vec!["NEWCOIN/USDT", "XAI/USDT"]);
    }

    #[test]
    fn expired_entry_is_refetched() {
        let (source, fetches) = CountingSource::sample();
        let cache = PairCache::new(Box::new(source), BTreeSet::new(), Duration::ZERO);

        cache.get().unwrap();
        cache.get().unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn refresh_recomputes_and_feeds_the_next_get() {
        let (source, fetches) = CountingSource::sample();
        let cache = PairCache::with_defaults(Box::new(source));

        cache.get().unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        let refreshed = cache.refresh().unwrap();
        let served = cache.get().unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        assert_eq!(refreshed, served);
    }

    #[test]
    fn exchange_symbols_map_to_unified_notation() {
        let raw = r#"{"symbols": [
            {"symbol": "BTCUSDT", "status": "TRADING", "baseAsset": "BTC", "quoteAsset": "USDT",
             "marginAsset": "USDT", "contractType": "PERPETUAL"},
            {"symbol": "BTCUSDT_250328", "status": "TRADING", "baseAsset": "BTC", "quoteAsset": "USDT",
             "marginAsset": "USDT", "contractType": "CURRENT_QUARTER"},
            {"symbol": "LUNAUSDT", "status": "SETTLING", "baseAsset": "LUNA", "quoteAsset": "USDT",
             "marginAsset": "USDT", "contractType": "PERPETUAL"}
        ]}"#;
        let info: ExchangeInfo = serde_json::from_str(raw).unwrap();
        let futures: Vec<Market> = info.symbols.iter().map(futures_market).collect();
        assert_eq!(
            futures,
            vec![
                Market::new("BTC/USDT:USDT", true),
                Market::new("BTC/USDT:USDT-250328", true),
                Market::new("LUNA/USDT:USDT", false),
            ]
        );
        assert_eq!(spot_market(&info.symbols[0]), Market::new("BTC/USDT", true));
    }
}
