//! Record of the active subscription set, replayed after every reconnect.
//!
//! The ledger keeps the *net effect* of every subscribe/unsubscribe call, not
//! their history. Subscribing `T.AMD,T.NVDA` and then unsubscribing `T.AMD`
//! leaves a single entry `T.NVDA`. The only unsubscribe entries ever kept are
//! carve-outs from a wildcard: after `T.*` an unsubscribe of `T.AMD` must be
//! replayed too, or the reconnected socket would stream AMD again.
//!
//! Symbols are compared exactly, so callers record normalised sets
//! (see [`normalize`](crate::ws::codec::normalize)).

use crate::types::Action;
use crate::ws::codec::{Symbols, encode};

/// One replayable control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Topic prefix (`T.`).
    pub prefix: String,
    pub symbols: Symbols,
    /// `Subscribe`, or `Unsubscribe` for a wildcard carve-out.
    pub action: Action,
}

/// Ordered subscription ledger.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one subscribe or unsubscribe into the ledger.
    ///
    /// `Auth` is not a subscription action and is ignored.
    pub fn record(&mut self, prefix: &str, symbols: &Symbols, action: Action) {
        match (symbols, action) {
            (_, Action::Auth) => {}
            (Symbols::All, Action::Subscribe) => {
                self.entries.retain(|e| e.prefix != prefix);
                self.push(prefix, Symbols::All, Action::Subscribe);
            }
            (Symbols::All, Action::Unsubscribe) => {
                self.entries.retain(|e| e.prefix != prefix);
            }
            (Symbols::Only(list), Action::Subscribe) => {
                self.carve(prefix, list);
                if !self.has_wildcard(prefix) {
                    self.push(prefix, symbols.clone(), Action::Subscribe);
                }
            }
            (Symbols::Only(list), Action::Unsubscribe) => {
                self.carve(prefix, list);
                if self.has_wildcard(prefix) {
                    self.push(prefix, symbols.clone(), Action::Unsubscribe);
                }
            }
        }
    }

    /// `(params, action)` pairs in insertion order.
    pub fn snapshot(&self) -> Vec<(String, Action)> {
        self.entries
            .iter()
            .filter_map(|e| encode(&e.prefix, &e.symbols).ok().map(|p| (p, e.action)))
            .collect()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn push(&mut self, prefix: &str, symbols: Symbols, action: Action) {
        self.entries.push(LedgerEntry {
            prefix: prefix.to_owned(),
            symbols,
            action,
        });
    }

    fn has_wildcard(&self, prefix: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.prefix == prefix && e.symbols.is_all() && e.action == Action::Subscribe)
    }

    /// Remove `symbols` from every explicit-list entry of `prefix`, dropping
    /// entries left empty.
    fn carve(&mut self, prefix: &str, symbols: &[String]) {
        for entry in self.entries.iter_mut().filter(|e| e.prefix == prefix) {
            if let Symbols::Only(list) = &mut entry.symbols {
                list.retain(|s| !symbols.contains(s));
            }
        }
        self.entries
            .retain(|e| !matches!(&e.symbols, Symbols::Only(list) if list.is_empty()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only(symbols: &[&str]) -> Symbols {
        Symbols::from(symbols)
    }

    fn params(ledger: &Ledger) -> Vec<(String, Action)> {
        ledger.snapshot()
    }

    #[test]
    fn unsubscribe_removes_instead_of_appending() {
        let mut ledger = Ledger::new();
        ledger.record("T.", &only(&["AMD", "NVDA"]), Action::Subscribe);
        ledger.record("T.", &only(&["AMD"]), Action::Unsubscribe);
        assert_eq!(params(&ledger), vec![("T.NVDA".into(), Action::Subscribe)]);
    }

    #[test]
    fn unsubscribing_everything_leaves_nothing() {
        let mut ledger = Ledger::new();
        ledger.record("T.", &only(&["AMD"]), Action::Subscribe);
        ledger.record("T.", &only(&["AMD"]), Action::Unsubscribe);
        assert!(ledger.is_empty());
    }

    #[test]
    fn resubscribe_keeps_one_entry_per_symbol() {
        let mut ledger = Ledger::new();
        ledger.record("Q.", &only(&["AAPL", "MSFT"]), Action::Subscribe);
        ledger.record("Q.", &only(&["MSFT", "TSLA"]), Action::Subscribe);
        assert_eq!(
            params(&ledger),
            vec![
                ("Q.AAPL".into(), Action::Subscribe),
                ("Q.MSFT,Q.TSLA".into(), Action::Subscribe),
            ]
        );
    }

    #[test]
    fn wildcard_supersedes_explicit_lists() {
        let mut ledger = Ledger::new();
        ledger.record("T.", &only(&["AMD"]), Action::Subscribe);
        ledger.record("Q.", &only(&["AMD"]), Action::Subscribe);
        ledger.record("T.", &Symbols::All, Action::Subscribe);
        ledger.record("T.", &only(&["NVDA"]), Action::Subscribe);
        assert_eq!(
            params(&ledger),
            vec![
                ("Q.AMD".into(), Action::Subscribe),
                ("T.*".into(), Action::Subscribe),
            ]
        );
    }

    #[test]
    fn unsubscribe_under_wildcard_is_a_carve_out() {
        let mut ledger = Ledger::new();
        ledger.record("T.", &Symbols::All, Action::Subscribe);
        ledger.record("T.", &only(&["AMD"]), Action::Unsubscribe);
        assert_eq!(
            params(&ledger),
            vec![
                ("T.*".into(), Action::Subscribe),
                ("T.AMD".into(), Action::Unsubscribe),
            ]
        );

        // Subscribing again removes the carve-out.
        ledger.record("T.", &only(&["AMD"]), Action::Subscribe);
        assert_eq!(params(&ledger), vec![("T.*".into(), Action::Subscribe)]);
    }

    #[test]
    fn wildcard_unsubscribe_clears_prefix_only() {
        let mut ledger = Ledger::new();
        ledger.record("T.", &Symbols::All, Action::Subscribe);
        ledger.record("T.", &only(&["AMD"]), Action::Unsubscribe);
        ledger.record("AM.", &only(&["SPY"]), Action::Subscribe);
        ledger.record("T.", &Symbols::All, Action::Unsubscribe);
        assert_eq!(params(&ledger), vec![("AM.SPY".into(), Action::Subscribe)]);
    }

    #[test]
    fn unsubscribe_of_unknown_symbol_is_ignored() {
        let mut ledger = Ledger::new();
        ledger.record("T.", &only(&["AMD"]), Action::Unsubscribe);
        ledger.record("T.", &Symbols::All, Action::Unsubscribe);
        assert!(ledger.is_empty());
    }
}
