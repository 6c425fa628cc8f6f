//! Normalized market event model shared by the recorder and the replay path.
//!
//! Raw feed payloads are persisted as-received (`serde_json::Value` lines).
//! They are decoded exactly once, at replay ingestion, into [`EventPayload`]
//! so the rest of the pipeline never touches untyped maps.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The three feed streams the system records and replays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    #[serde(rename = "aggTrade")]
    AggTrade,
    #[serde(rename = "depth")]
    Depth,
    #[serde(rename = "bookTicker")]
    BookTicker,
}

impl StreamKind {
    pub const ALL: [StreamKind; 3] =
        [StreamKind::AggTrade, StreamKind::Depth, StreamKind::BookTicker];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::AggTrade => "aggTrade",
            StreamKind::Depth => "depth",
            StreamKind::BookTicker => "bookTicker",
        }
    }

    /// Partition file name for this stream within a day directory.
    pub fn file_name(&self) -> String {
        format!("{}.jsonl.gz", self.as_str())
    }

    /// Combined-stream subscription name, e.g. `btcusdt@depth@100ms`.
    pub fn subscription(&self, symbol: &str, depth_speed: &str) -> String {
        let lower = symbol.to_lowercase();
        match self {
            StreamKind::Depth => format!("{lower}@depth@{depth_speed}"),
            other => format!("{lower}@{}", other.as_str()),
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aggTrade" => Ok(StreamKind::AggTrade),
            "depth" | "depthUpdate" => Ok(StreamKind::Depth),
            "bookTicker" => Ok(StreamKind::BookTicker),
            _ => Err(()),
        }
    }
}

/// Infer the stream kind from a combined-stream name like `btcusdt@depth@100ms`.
pub fn infer_stream(stream_name: &str) -> Option<StreamKind> {
    let suffix = stream_name.split_once('@')?.1;
    let kind = suffix.split('@').next()?;
    kind.parse().ok()
}

/// Normalize a raw exchange timestamp to microseconds.
///
/// The feed may send seconds, milliseconds or microseconds depending on the
/// endpoint and the `timeUnit` parameter; the magnitude disambiguates.
pub fn normalize_timestamp_us(raw: i64) -> i64 {
    if raw <= 0 {
        0
    } else if raw > 100_000_000_000_000 {
        raw
    } else if raw > 100_000_000_000 {
        raw * 1_000
    } else {
        raw * 1_000_000
    }
}

fn json_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    }
}

fn json_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Extract the event timestamp (microseconds) from a raw payload.
///
/// Prefers the trade time `T`, falls back to the event time `E`. Returns
/// `None` when the payload carries no usable timestamp.
pub fn event_timestamp_us(payload: &Value) -> Option<i64> {
    for key in ["T", "E"] {
        if let Some(raw) = payload.get(key).and_then(json_i64) {
            let ts = normalize_timestamp_us(raw);
            if ts > 0 {
                return Some(ts);
            }
        }
    }
    None
}

/// One decoded payload, keyed by stream.
#[derive(Clone, Debug, PartialEq)]
pub enum EventPayload {
    Trade {
        price: f64,
        qty: f64,
    },
    Quote {
        bid: f64,
        ask: f64,
        bid_qty: f64,
        ask_qty: f64,
    },
    /// Order-book delta: `(price, qty)` levels, qty 0 deletes the level.
    Depth {
        bids: Vec<(Decimal, f64)>,
        asks: Vec<(Decimal, f64)>,
    },
}

impl EventPayload {
    /// Decode a raw feed payload for the given stream. Returns `None` for
    /// payloads that do not carry the expected fields (data-quality skip).
    pub fn decode(stream: StreamKind, raw: &Value) -> Option<EventPayload> {
        match stream {
            StreamKind::AggTrade => {
                let price = raw.get("p").and_then(json_f64)?;
                let qty = raw.get("q").and_then(json_f64).unwrap_or(0.0);
                if price <= 0.0 {
                    return None;
                }
                Some(EventPayload::Trade { price, qty })
            }
            StreamKind::BookTicker => {
                let bid = raw.get("b").and_then(json_f64)?;
                let ask = raw.get("a").and_then(json_f64)?;
                if bid <= 0.0 || ask <= 0.0 {
                    return None;
                }
                let bid_qty = raw.get("B").and_then(json_f64).unwrap_or(0.0);
                let ask_qty = raw.get("A").and_then(json_f64).unwrap_or(0.0);
                Some(EventPayload::Quote { bid, ask, bid_qty, ask_qty })
            }
            StreamKind::Depth => {
                let bids = decode_levels(raw.get("b"));
                let asks = decode_levels(raw.get("a"));
                if bids.is_empty() && asks.is_empty() {
                    return None;
                }
                Some(EventPayload::Depth { bids, asks })
            }
        }
    }
}

fn decode_levels(raw: Option<&Value>) -> Vec<(Decimal, f64)> {
    let Some(Value::Array(levels)) = raw else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(levels.len());
    for level in levels {
        let Some(pair) = level.as_array() else { continue };
        let price = pair
            .first()
            .and_then(|p| p.as_str())
            .and_then(|p| Decimal::from_str(p).ok());
        let qty = pair.get(1).and_then(json_f64);
        if let (Some(price), Some(qty)) = (price, qty) {
            out.push((price, qty));
        }
    }
    out
}

/// One event as yielded by the replay engine: decoded, timestamped, ordered.
#[derive(Clone, Debug)]
pub struct ReplayEvent {
    pub symbol: String,
    pub stream: StreamKind,
    pub timestamp_us: i64,
    pub payload: EventPayload,
}
