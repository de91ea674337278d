//! Outbound wire codec.
//!
//! Turns a topic prefix plus a symbol set into the `params` string the
//! gateway expects, and wraps it in a control frame:
//!
//! ```
//! use polygon_stream::ws::codec::{Symbols, control_frame, encode};
//! use polygon_stream::types::Action;
//!
//! let params = encode("T.", &Symbols::from(["amd", "nvda"])).unwrap();
//! assert_eq!(params, "T.AMD,T.NVDA");
//! assert_eq!(
//!     control_frame(Action::Subscribe, &params).unwrap(),
//!     r#"{"action":"subscribe","params":"T.AMD,T.NVDA"}"#,
//! );
//! ```

use serde::Serialize;

use crate::constants::WILDCARD;
use crate::error::{PolygonError, Result};
use crate::types::{Action, StreamTopic};

// ---------------------------------------------------------------------------
// Symbol sets
// ---------------------------------------------------------------------------

/// The symbols a subscription applies to.
///
/// `All` is the wildcard (`T.*`). An explicit empty list is never a valid
/// `Only` and is rejected by [`normalize`] and [`encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbols {
    /// Every ticker of the topic.
    All,
    /// An explicit list of tickers.
    Only(Vec<String>),
}

impl Symbols {
    /// The wildcard set.
    pub fn all() -> Self {
        Self::All
    }

    /// Whether this is the wildcard.
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl<T: AsRef<str>> From<&[T]> for Symbols {
    fn from(symbols: &[T]) -> Self {
        Self::Only(symbols.iter().map(|s| s.as_ref().to_owned()).collect())
    }
}

impl<T: AsRef<str>> From<Vec<T>> for Symbols {
    fn from(symbols: Vec<T>) -> Self {
        Self::from(symbols.as_slice())
    }
}

impl<T: AsRef<str>, const N: usize> From<[T; N]> for Symbols {
    fn from(symbols: [T; N]) -> Self {
        Self::from(symbols.as_slice())
    }
}

/// `None` means "no symbols given", which is the wildcard.
impl<T: AsRef<str>> From<Option<Vec<T>>> for Symbols {
    fn from(symbols: Option<Vec<T>>) -> Self {
        match symbols {
            Some(list) => Self::from(list),
            None => Self::All,
        }
    }
}

// ---------------------------------------------------------------------------
// Normalisation
// ---------------------------------------------------------------------------

/// Uppercase `symbol` and make sure it starts with `prefix`.
///
/// The wildcard is returned unchanged.
///
/// ```
/// use polygon_stream::ws::codec::ensure_prefix;
///
/// assert_eq!(ensure_prefix("tsla210903c00700000", "O:"), "O:TSLA210903C00700000");
/// assert_eq!(ensure_prefix("O:SPY241220P00720000", "O:"), "O:SPY241220P00720000");
/// assert_eq!(ensure_prefix("*", "O:"), "*");
/// ```
pub fn ensure_prefix(symbol: &str, prefix: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    if upper == WILDCARD || upper.starts_with(&prefix.to_uppercase()) {
        upper
    } else {
        format!("{}{upper}", prefix.to_uppercase())
    }
}

/// Validate and canonicalise a symbol set for `topic`.
///
/// Symbols are trimmed and uppercased, option contracts get their `O:`
/// prefix, and a list containing `*` collapses to [`Symbols::All`].
/// Duplicates are dropped, keeping first occurrence. Applying `normalize` to
/// its own output returns the same value.
pub fn normalize(topic: StreamTopic, symbols: Symbols) -> Result<Symbols> {
    let list = match symbols {
        Symbols::All => return Ok(Symbols::All),
        Symbols::Only(list) => list,
    };
    if list.is_empty() {
        return Err(PolygonError::InvalidArgument(format!(
            "empty symbol list for {topic}; pass Symbols::All for every ticker"
        )));
    }

    let mut out: Vec<String> = Vec::with_capacity(list.len());
    for raw in &list {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PolygonError::InvalidArgument(format!(
                "blank symbol in list for {topic}"
            )));
        }
        if trimmed.contains(',') {
            return Err(PolygonError::InvalidArgument(format!(
                "symbol {trimmed:?} contains a comma; pass each ticker separately"
            )));
        }
        if trimmed == WILDCARD {
            return Ok(Symbols::All);
        }
        let symbol = match topic.symbol_prefix() {
            Some(prefix) => ensure_prefix(trimmed, prefix),
            None => trimmed.to_uppercase(),
        };
        if !out.contains(&symbol) {
            out.push(symbol);
        }
    }
    Ok(Symbols::Only(out))
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Build the `params` string for a prefix and symbol set.
///
/// `All` encodes as `prefix*`; a list encodes as comma-joined
/// `prefix + SYMBOL`. Symbols are uppercased here as well, so encoding an
/// already-normalised set is a no-op on case.
pub fn encode(prefix: &str, symbols: &Symbols) -> Result<String> {
    match symbols {
        Symbols::All => Ok(format!("{prefix}{WILDCARD}")),
        Symbols::Only(list) if list.is_empty() => Err(PolygonError::InvalidArgument(
            format!("cannot encode an empty symbol list for {prefix}"),
        )),
        Symbols::Only(list) => Ok(list
            .iter()
            .map(|s| format!("{prefix}{}", s.to_uppercase()))
            .collect::<Vec<_>>()
            .join(",")),
    }
}

#[derive(Serialize)]
struct ControlFrame<'a> {
    action: Action,
    params: &'a str,
}

/// Serialise a control frame.
pub fn control_frame(action: Action, params: &str) -> Result<String> {
    Ok(serde_json::to_string(&ControlFrame { action, params })?)
}

/// The authentication frame sent immediately after the socket opens.
pub fn auth_frame(api_key: &str) -> Result<String> {
    control_frame(Action::Auth, api_key)
}

/// Split an encoded `params` string back into `(prefix, symbols)`.
///
/// Only used by tests to check what went over the wire.
#[cfg(test)]
pub(crate) fn decode(params: &str) -> Option<(String, Symbols)> {
    let mut prefix: Option<String> = None;
    let mut symbols = Vec::new();
    for part in params.split(',') {
        let (p, sym) = part.split_once('.')?;
        let p = format!("{p}.");
        match &prefix {
            Some(existing) if *existing != p => return None,
            Some(_) => {}
            None => prefix = Some(p),
        }
        if sym == WILDCARD {
            return prefix.map(|p| (p, Symbols::All));
        }
        symbols.push(sym.to_owned());
    }
    prefix.map(|p| (p, Symbols::Only(symbols)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_list_uppercase() {
        let s = Symbols::from(vec!["amd", "Nvda"]);
        assert_eq!(encode("T.", &s).unwrap(), "T.AMD,T.NVDA");
    }

    #[test]
    fn encodes_wildcard() {
        assert_eq!(encode("XL2.", &Symbols::All).unwrap(), "XL2.*");
        assert_eq!(
            encode("T.", &Symbols::from(None::<Vec<&str>>)).unwrap(),
            "T.*"
        );
    }

    #[test]
    fn empty_list_is_rejected() {
        let empty: Vec<String> = Vec::new();
        assert!(matches!(
            encode("T.", &Symbols::from(empty.clone())),
            Err(PolygonError::InvalidArgument(_))
        ));
        assert!(normalize(StreamTopic::StockTrades, Symbols::from(empty)).is_err());
    }

    #[test]
    fn encoded_params_decode_back_uppercased() {
        let s = Symbols::from(["msft", "aapl"]);
        let (prefix, decoded) = decode(&encode("Q.", &s).unwrap()).unwrap();
        assert_eq!(prefix, "Q.");
        assert_eq!(decoded, Symbols::from(["MSFT", "AAPL"]));
        assert_eq!(decode("AM.*"), Some(("AM.".to_owned(), Symbols::All)));
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize(
            StreamTopic::OptionTrades,
            Symbols::from([" tsla210903c00700000 ", "O:spy241220p00720000"]),
        )
        .unwrap();
        let twice = normalize(StreamTopic::OptionTrades, once.clone()).unwrap();
        assert_eq!(once, twice);
        assert_eq!(
            once,
            Symbols::from(["O:TSLA210903C00700000", "O:SPY241220P00720000"])
        );
    }

    #[test]
    fn normalize_collapses_wildcard_and_duplicates() {
        assert_eq!(
            normalize(StreamTopic::StockQuotes, Symbols::from(["aapl", "*"])).unwrap(),
            Symbols::All
        );
        assert_eq!(
            normalize(StreamTopic::StockQuotes, Symbols::from(["aapl", "AAPL"])).unwrap(),
            Symbols::from(["AAPL"])
        );
    }

    #[test]
    fn normalize_rejects_blank_and_comma() {
        assert!(normalize(StreamTopic::StockTrades, Symbols::from(["  "])).is_err());
        assert!(normalize(StreamTopic::StockTrades, Symbols::from(["AMD,NVDA"])).is_err());
    }

    #[test]
    fn stock_symbols_are_not_prefixed() {
        assert_eq!(
            normalize(StreamTopic::StockTrades, Symbols::from(["brk.a"])).unwrap(),
            Symbols::from(["BRK.A"])
        );
    }

    #[test]
    fn control_frames_serialize_exactly() {
        assert_eq!(
            auth_frame("KEY123").unwrap(),
            r#"{"action":"auth","params":"KEY123"}"#
        );
        assert_eq!(
            control_frame(Action::Unsubscribe, "T.*").unwrap(),
            r#"{"action":"unsubscribe","params":"T.*"}"#
        );
    }
}
