//! Address tagging
//!
//! The four most significant bits of every recorded address carry an
//! [`EventKind`] so that a trace reader can tell memory references apart from
//! allocator events without a separate field.

use serde::{Deserialize, Serialize};

/// Number of low bits available for the address itself
pub const ADDRESS_BITS: u32 = 60;

/// Mask selecting the address bits of a tagged value
pub const ADDRESS_MASK: u64 = (1u64 << ADDRESS_BITS) - 1;

/// Kind of event encoded in the top nibble of a tagged address
///
/// Codes 0x1-0x7 and 0xD-0xE are unassigned.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Plain memory read or write
    MemRef = 0x0,
    Malloc = 0x8,
    Calloc = 0x9,
    Realloc = 0xA,
    Free = 0xB,
    Mmap = 0xC,
    /// Instruction count marker
    ICount = 0xF,
}

impl EventKind {
    /// Raw 4-bit code of this kind
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode a 4-bit code, returning `None` for unassigned codes
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x0 => Some(Self::MemRef),
            0x8 => Some(Self::Malloc),
            0x9 => Some(Self::Calloc),
            0xA => Some(Self::Realloc),
            0xB => Some(Self::Free),
            0xC => Some(Self::Mmap),
            0xF => Some(Self::ICount),
            _ => None,
        }
    }
}

/// A 64-bit address with an event kind stamped into its top nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaggedAddress(u64);

impl TaggedAddress {
    /// Stamp `kind` onto `addr`
    ///
    /// The top four bits of `addr` are discarded. Addresses wider than 60
    /// bits do not survive the round trip; this is checked in debug builds
    /// only.
    pub fn new(addr: u64, kind: EventKind) -> Self {
        Self(tag_code(addr, kind.code()))
    }

    /// Wrap an already-tagged raw value, e.g. one read back from a trace
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw 64-bit value as written to the trace
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Address with the tag bits cleared
    pub const fn address(self) -> u64 {
        untag(self.0)
    }

    /// 4-bit code held in the tag bits
    pub const fn code(self) -> u8 {
        (self.0 >> ADDRESS_BITS) as u8
    }

    /// Event kind, or `None` if the tag holds an unassigned code
    pub const fn kind(self) -> Option<EventKind> {
        EventKind::from_code(self.code())
    }
}

/// Stamp a raw 4-bit code onto an address
///
/// Precondition: `code < 16` and `addr` fits in 60 bits.
pub fn tag_code(addr: u64, code: u8) -> u64 {
    debug_assert!(code < 16, "event code {code:#x} does not fit in 4 bits");
    debug_assert!(
        addr & !ADDRESS_MASK == 0,
        "address {addr:#x} is wider than {ADDRESS_BITS} bits"
    );
    untag(addr) | (u64::from(code & 0xF) << ADDRESS_BITS)
}

/// Stamp `kind` onto an address
pub fn tag(addr: u64, kind: EventKind) -> u64 {
    tag_code(addr, kind.code())
}

/// Strip the tag bits off a tagged value
pub const fn untag(tagged: u64) -> u64 {
    tagged & ADDRESS_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESSES: [u64; 5] = [0, 0x1000, 0x7fff_ffff_f000, 0xdead_beef, ADDRESS_MASK];

    #[test]
    fn test_untag_recovers_address_for_every_code() {
        for addr in ADDRESSES {
            for code in 0u8..16 {
                assert_eq!(untag(tag_code(addr, code)), addr, "addr {addr:#x} code {code:#x}");
            }
        }
    }

    #[test]
    fn test_distinct_kinds_give_distinct_tags() {
        let addr = 0x2000;
        for a in 0u8..16 {
            for b in 0u8..16 {
                if a != b {
                    assert_ne!(tag_code(addr, a), tag_code(addr, b));
                }
            }
        }
    }

    #[test]
    fn test_memref_tag_is_identity() {
        assert_eq!(tag(0x1000, EventKind::MemRef), 0x1000);
    }

    #[test]
    fn test_tag_layout() {
        assert_eq!(tag(0x1234, EventKind::Malloc), 0x8000_0000_0000_1234);
        assert_eq!(tag(0x1234, EventKind::ICount), 0xF000_0000_0000_1234);

        let tagged = TaggedAddress::new(0x1234, EventKind::Free);
        assert_eq!(tagged.address(), 0x1234);
        assert_eq!(tagged.code(), 0xB);
        assert_eq!(tagged.kind(), Some(EventKind::Free));
    }

    #[test]
    fn test_unassigned_codes() {
        for code in (0x1..=0x7).chain(0xD..=0xE) {
            assert_eq!(EventKind::from_code(code), None);
            assert_eq!(TaggedAddress::from_raw(tag_code(0x10, code)).kind(), None);
        }
    }
}
