//! Exchange symbol filters: lot size and minimum notional.
//!
//! Reference data with an explicit owner and refresh lifecycle. The simulator
//! consults it read-only; nothing in the pipeline mutates a filter after it
//! is built. Quantity math runs in `Decimal` so step flooring is exact.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Clone, Debug, Default)]
pub struct SymbolFilters {
    pub min_qty: Option<Decimal>,
    pub max_qty: Option<Decimal>,
    pub step_size: Option<Decimal>,
    pub min_notional: Option<Decimal>,
}

impl SymbolFilters {
    /// Floor a requested quantity to the lot-size grid within
    /// `[min_qty, max_qty]`. `None` means the order must be rejected.
    pub fn adjust_qty(&self, quantity: f64) -> Option<f64> {
        let mut qty = Decimal::from_f64(quantity)?;
        if let Some(step) = self.step_size.filter(|s| !s.is_zero()) {
            qty = (qty / step).floor() * step;
        }
        if let Some(min_qty) = self.min_qty {
            if qty < min_qty {
                return None;
            }
        }
        if let Some(max_qty) = self.max_qty {
            if qty > max_qty {
                qty = max_qty;
            }
        }
        if qty <= Decimal::ZERO {
            return None;
        }
        qty.to_f64()
    }

    /// True when `price * quantity` clears the minimum notional (or none is
    /// configured).
    pub fn validate_notional(&self, price: f64, quantity: f64) -> bool {
        let Some(min_notional) = self.min_notional else {
            return true;
        };
        match (Decimal::from_f64(price), Decimal::from_f64(quantity)) {
            (Some(price), Some(qty)) => price * qty >= min_notional,
            _ => false,
        }
    }
}

/// Per-symbol filter table built from the exchange's `exchangeInfo` payload.
#[derive(Clone, Debug, Default)]
pub struct ExchangeFilters {
    by_symbol: HashMap<String, SymbolFilters>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl ExchangeFilters {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_exchange_info(info: &Value) -> Self {
        let mut by_symbol = HashMap::new();
        let symbols = info.get("symbols").and_then(|s| s.as_array());
        for entry in symbols.into_iter().flatten() {
            let Some(symbol) = entry.get("symbol").and_then(|s| s.as_str()) else {
                continue;
            };
            let mut filters = SymbolFilters::default();
            let filter_list = entry.get("filters").and_then(|f| f.as_array());
            for filter in filter_list.into_iter().flatten() {
                match filter.get("filterType").and_then(|t| t.as_str()) {
                    Some("LOT_SIZE") => {
                        filters.min_qty = decimal_field(filter, "minQty");
                        filters.max_qty = decimal_field(filter, "maxQty");
                        filters.step_size = decimal_field(filter, "stepSize");
                    }
                    // Spot exchangeInfo renamed MIN_NOTIONAL to NOTIONAL.
                    Some("MIN_NOTIONAL") | Some("NOTIONAL") => {
                        filters.min_notional = decimal_field(filter, "minNotional");
                    }
                    _ => {}
                }
            }
            by_symbol.insert(symbol.to_string(), filters);
        }
        Self {
            by_symbol,
            refreshed_at: Some(Utc::now()),
        }
    }

    /// Fetch and parse the exchange info from the REST endpoint.
    pub async fn fetch(client: &reqwest::Client, base_url: &str) -> Result<Self, reqwest::Error> {
        let url = format!("{}/api/v3/exchangeInfo", base_url.trim_end_matches('/'));
        debug!(%url, "fetching exchange filters");
        let info: Value = client.get(&url).send().await?.error_for_status()?.json().await?;
        let table = Self::from_exchange_info(&info);
        info!(symbols = table.len(), "loaded exchange filters");
        Ok(table)
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolFilters> {
        self.by_symbol.get(symbol)
    }

    pub fn insert(&mut self, symbol: impl Into<String>, filters: SymbolFilters) {
        self.by_symbol.insert(symbol.into(), filters);
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }
}

fn decimal_field(filter: &Value, key: &str) -> Option<Decimal> {
    filter
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(|v| Decimal::from_str(v).ok())
}
