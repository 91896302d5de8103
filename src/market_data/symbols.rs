//! Symbol normalization and listing checks, grounded on
//! `examples/original_source/tradingbot-backend/services/symbols.py`
//! (`SymbolService.get_symbols` loads a cached list, `t`-prefixes v2 form)
//! and spec §9's Open Question on TEST-pair aliasing, resolved here in
//! favor of the canonical colon form.

use crate::errors::CoreError;
use std::collections::HashSet;

/// Normalizes both `tTESTBTC:TESTUSD` and `tTESTBTCUSD` TEST-pair
/// conventions to the canonical colon form, and validates against the
/// listed-symbols set loaded at startup (fed by an out-of-scope symbol
/// documentation scraper; this component only reads the resulting set).
pub struct SymbolResolver {
    listed: HashSet<String>,
}

impl SymbolResolver {
    pub fn new(listed_symbols: impl IntoIterator<Item = String>) -> Self {
        Self {
            listed: listed_symbols.into_iter().map(|s| s.to_ascii_uppercase()).collect(),
        }
    }

    /// Accepts both TEST-pair spellings and emits the canonical colon form;
    /// non-TEST symbols pass through uppercased and `t`-prefixed if missing.
    pub fn resolve(&self, input: &str) -> Result<String, CoreError> {
        let upper = input.trim().to_ascii_uppercase();
        let (prefix, body) = if let Some(rest) = upper.strip_prefix('T') {
            ("t", rest.to_string())
        } else {
            ("t", upper.clone())
        };

        let canonical_body = if body.contains(':') {
            body
        } else if let Some(alias) = Self::split_test_pair_without_colon(&body) {
            alias
        } else {
            body
        };

        let canonical = format!("{}{}", prefix, canonical_body);

        if self.listed.is_empty() || self.is_listed(&canonical) {
            Ok(canonical)
        } else {
            Err(CoreError::UnknownSymbol(input.to_string()))
        }
    }

    fn is_listed(&self, canonical: &str) -> bool {
        let without_prefix = canonical.strip_prefix('t').unwrap_or(canonical);
        self.listed.contains(canonical)
            || self.listed.contains(without_prefix)
            || self.listed.contains(&without_prefix.replace(':', ""))
    }

    /// Known quote currencies, longest first so e.g. `USDT` is preferred
    /// over the `USD` it contains as a substring.
    const QUOTE_CURRENCIES: &'static [&'static str] =
        &["USDT", "USTF0", "UST", "EUT", "GBP", "JPY", "USD", "EUR", "BTC", "ETH"];

    /// `TESTBTCUSD` (no colon, a single TEST marker on the base leg,
    /// base and quote concatenated) -> `TESTBTC:TESTUSD`. The quote leg
    /// gets its own `TEST` marker in the canonical form even though the
    /// concatenated input only carries one.
    fn split_test_pair_without_colon(body: &str) -> Option<String> {
        let rest = body.strip_prefix("TEST")?;

        let mut quote: Option<&str> = None;
        for candidate in Self::QUOTE_CURRENCIES.iter().copied() {
            if rest.len() > candidate.len() && rest.ends_with(candidate) {
                quote = Some(candidate);
                break;
            }
        }
        let quote = quote.or_else(|| (rest.len() > 3).then(|| &rest[rest.len() - 3..]))?;

        let base = &rest[..rest.len() - quote.len()];
        if base.is_empty() {
            return None;
        }
        Some(format!("TEST{}:TEST{}", base, quote))
    }

    pub fn suggest_test_alias(&self, symbol: &str) -> Option<String> {
        let upper = symbol.trim_start_matches('t').to_ascii_uppercase();
        if upper.starts_with("TEST") {
            return None;
        }
        let candidate = format!("TEST{}:TESTUSD", upper.trim_end_matches("USD"));
        if self.listed.is_empty() || self.listed.contains(&candidate) {
            Some(format!("t{}", candidate))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> SymbolResolver {
        SymbolResolver::new(vec![
            "TESTBTC:TESTUSD".to_string(),
            "BTCUSD".to_string(),
        ])
    }

    #[test]
    fn accepts_colon_form_directly() {
        let r = resolver();
        assert_eq!(r.resolve("tTESTBTC:TESTUSD").unwrap(), "tTESTBTC:TESTUSD");
    }

    #[test]
    fn accepts_concatenated_form_and_emits_colon_form() {
        let r = resolver();
        assert_eq!(r.resolve("tTESTBTCUSD").unwrap(), "tTESTBTC:TESTUSD");
    }

    #[test]
    fn plain_pair_is_t_prefixed() {
        let r = resolver();
        assert_eq!(r.resolve("BTCUSD").unwrap(), "tBTCUSD");
    }

    #[test]
    fn unlisted_symbol_is_rejected() {
        let r = resolver();
        assert!(matches!(r.resolve("tXRPUSD"), Err(CoreError::UnknownSymbol(_))));
    }

    #[test]
    fn empty_listing_accepts_anything() {
        let r = SymbolResolver::new(Vec::<String>::new());
        assert!(r.resolve("tETHUSD").is_ok());
    }
}
