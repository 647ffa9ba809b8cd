use std::collections::HashMap;
use std::sync::Arc;

use dbt_core::GuestAddress;
use parking_lot::RwLock;

/// Best-effort address to name registry.
///
/// Names compiled units and labels trace output; nothing depends on it
/// for correctness. Unnamed addresses get a synthesized default on
/// first use through [`SymbolTable::name_for`].
#[derive(Debug, Default)]
pub struct SymbolTable {
    names: RwLock<HashMap<GuestAddress, Arc<str>>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the table from an existing symbol map (e.g. loaded from an
    /// executable's symbol section).
    pub fn with_symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = (GuestAddress, S)>,
        S: Into<Arc<str>>,
    {
        let names = symbols.into_iter().map(|(a, n)| (a, n.into())).collect();
        Self {
            names: RwLock::new(names),
        }
    }

    /// Deterministic name for an unnamed address: `Sub` followed by 16
    /// zero-padded lowercase hex digits.
    pub fn default_name(addr: GuestAddress) -> String {
        format!("Sub{:016x}", addr.value())
    }

    /// Existing name, without synthesizing one.
    pub fn get(&self, addr: GuestAddress) -> Option<Arc<str>> {
        self.names.read().get(&addr).cloned()
    }

    /// Existing name, or the default name which is then recorded.
    pub fn name_for(&self, addr: GuestAddress) -> Arc<str> {
        if let Some(name) = self.get(addr) {
            return name;
        }
        self.names
            .write()
            .entry(addr)
            .or_insert_with(|| Self::default_name(addr).into())
            .clone()
    }

    /// Record `name` unless the address is already named.
    pub fn try_add(&self, addr: GuestAddress, name: impl Into<Arc<str>>) -> bool {
        let mut names = self.names.write();
        if names.contains_key(&addr) {
            return false;
        }
        names.insert(addr, name.into());
        true
    }

    /// Record `name`, replacing any previous one.
    pub fn insert(&self, addr: GuestAddress, name: impl Into<Arc<str>>) {
        self.names.write().insert(addr, name.into());
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }
}
