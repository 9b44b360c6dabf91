use core::{
    fmt,
    ops::{Add, AddAssign},
};

/// A bus address as seen by the device, which is a [`u64`] under the hood.
///
/// On platforms with an IOMMU this is an IO virtual address rather than a true
/// physical address, but the driver never needs to tell the two apart.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    /// Creates a new address from its raw value.
    #[inline]
    pub const fn new(addr: u64) -> Self {
        PhysicalAddress(addr)
    }

    /// Creates a new address with a value of zero.
    #[inline]
    pub const fn zero() -> Self {
        PhysicalAddress(0)
    }

    /// Returns the underlying value.
    #[inline]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns the lower 32 bits, as written into the `_l` half of an address register pair.
    #[inline]
    pub const fn low(&self) -> u32 {
        self.0 as u32
    }

    /// Returns the upper 32 bits, as written into the `_h` half of an address register pair.
    #[inline]
    pub const fn high(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Returns the offset of this address within its [`PAGE_SIZE`](crate::PAGE_SIZE) page.
    #[inline]
    pub const fn page_offset(&self) -> usize {
        (self.0 as usize) & (crate::PAGE_SIZE - 1)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "p{:#X}", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#X}", self.0)
    }
}

impl fmt::LowerHex for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::UpperHex for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}

impl Add<usize> for PhysicalAddress {
    type Output = PhysicalAddress;
    fn add(self, rhs: usize) -> PhysicalAddress {
        PhysicalAddress(self.0 + rhs as u64)
    }
}

impl AddAssign<usize> for PhysicalAddress {
    fn add_assign(&mut self, rhs: usize) {
        self.0 += rhs as u64;
    }
}

impl From<PhysicalAddress> for u64 {
    fn from(addr: PhysicalAddress) -> u64 {
        addr.0
    }
}
