use std::fmt;

/// Location in the guest code address space.
///
/// Used as the subroutine cache key and as the identity of call-graph
/// edges. Address 0 is reserved: a compiled unit returning it means
/// "no further guest code on this path".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GuestAddress(pub u64);

impl GuestAddress {
    /// Terminal address returned when control leaves translated code.
    pub const NULL: GuestAddress = GuestAddress(0);

    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `delta` bytes away, wrapping on overflow.
    pub const fn offset(self, delta: i64) -> Self {
        Self(self.0.wrapping_add(delta as u64))
    }
}

impl From<u64> for GuestAddress {
    fn from(addr: u64) -> Self {
        Self(addr)
    }
}

impl From<GuestAddress> for u64 {
    fn from(addr: GuestAddress) -> Self {
        addr.0
    }
}

impl fmt::Display for GuestAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl fmt::LowerHex for GuestAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Compilation tier of a translated subroutine.
///
/// `Tier0` covers a single basic block and is produced synchronously on
/// first touch. `Tier1` covers the whole subroutine graph and replaces
/// the Tier0 unit once it is hot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Tier {
    Tier0 = 0,
    Tier1 = 1,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Tier0 => f.write_str("tier0"),
            Tier::Tier1 => f.write_str("tier1"),
        }
    }
}
