//! Display formatting for the denormalized watchlist fields.

use watchlist_core::{MetricFields, QuoteFields};

fn non_zero(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v != 0.0)
}

/// `$187.44`
pub fn format_price(price: f64) -> String {
    format!("${:.2}", price)
}

/// `+$1.25` / `-$0.40`; a zero or missing change has no display value.
pub fn format_change(change: Option<f64>) -> Option<String> {
    let change = non_zero(change)?;
    if change > 0.0 {
        Some(format!("+${:.2}", change))
    } else {
        Some(format!("-${:.2}", change.abs()))
    }
}

/// Provider reports market capitalization in millions of USD; shown in billions.
pub fn format_market_cap(market_cap_millions: Option<f64>) -> Option<String> {
    non_zero(market_cap_millions).map(|m| format!("${:.2}B", m / 1_000.0))
}

pub fn format_pe_ratio(pe: Option<f64>) -> Option<String> {
    non_zero(pe).map(|pe| format!("{:.2}", pe))
}

/// Build quote fields from the raw `c`, `d` and `dp` values.
pub fn quote_fields(current: f64, change: Option<f64>, change_percent: Option<f64>) -> QuoteFields {
    QuoteFields {
        current_price: current,
        change_percent: change_percent.filter(|v| v.is_finite()).unwrap_or(0.0),
        price_formatted: format_price(current),
        change_formatted: format_change(change),
    }
}

pub fn metric_fields(market_cap_millions: Option<f64>, pe: Option<f64>) -> MetricFields {
    MetricFields {
        market_cap: format_market_cap(market_cap_millions),
        pe_ratio: format_pe_ratio(pe),
    }
}
