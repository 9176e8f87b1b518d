//! Disclosed-key whitelist and key gating.
//!
//! A gated key is one whose operations skip wrapper logic and act on the
//! wrapper's backing storage directly.  Gating lifts, permanently, once
//! the key has crossed the membrane.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::object_model::{PropertyKey, Symbol};

/// Which symbol keys start out gated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyGating {
    /// Only private symbols are gated.
    #[default]
    PrivateKeys,
    /// Every symbol key is gated; string keys never are.
    AllSymbols,
}

impl KeyGating {
    pub fn gates(self, sym: &Symbol) -> bool {
        match self {
            Self::PrivateKeys => sym.is_private(),
            Self::AllSymbols => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrivateKeys => "private_keys",
            Self::AllSymbols => "all_symbols",
        }
    }
}

impl fmt::Display for KeyGating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monotonic set of disclosed keys, shared by every wrapper of one membrane.
#[derive(Debug, Clone)]
pub struct PrivateKeyWhitelist {
    disclosed: BTreeSet<Symbol>,
    gating: Option<KeyGating>,
}

impl PrivateKeyWhitelist {
    /// `gating = None` disables gating: every key is trapped.
    pub fn new(gating: Option<KeyGating>) -> Self {
        Self {
            disclosed: BTreeSet::new(),
            gating,
        }
    }

    pub fn gating(&self) -> Option<KeyGating> {
        self.gating
    }

    /// Record `sym` as disclosed.  Returns `false` if it already was.
    pub fn insert(&mut self, sym: &Symbol) -> bool {
        self.disclosed.insert(sym.clone())
    }

    pub fn contains(&self, sym: &Symbol) -> bool {
        self.disclosed.contains(sym)
    }

    /// True when crossing `sym` has to run the disclosure protocol first.
    pub fn requires_disclosure(&self, sym: &Symbol) -> bool {
        self.gating.is_some_and(|gating| gating.gates(sym)) && !self.contains(sym)
    }

    /// True when an operation keyed by `key` must skip wrapper logic.
    pub fn bypasses(&self, key: &PropertyKey) -> bool {
        key.as_symbol()
            .is_some_and(|sym| self.requires_disclosure(sym))
    }

    pub fn len(&self) -> usize {
        self.disclosed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.disclosed.is_empty()
    }

    pub fn disclosed(&self) -> impl Iterator<Item = &Symbol> {
        self.disclosed.iter()
    }
}
