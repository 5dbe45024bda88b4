//! Instruction and data addresses.

use std::fmt;
use std::ops::{Add, Sub};

/// An address in the crashing process
///
/// Return addresses, stack pointers, fault addresses and module bases all
/// travel through the crash pipeline as `Address` so they cannot be mixed up
/// with sizes or offsets. The value is always stored as `u64`, including on
/// 32-bit targets, which keeps report lines and dump fields one width.
///
/// ## Display
///
/// Addresses always print as 16 zero-padded hex digits, which is the shape
/// used by every frame line of a crash report:
///
/// ```rust
/// use crashkit_core::types::Address;
///
/// assert_eq!(Address::new(0x1000).to_string(), "0x0000000000001000");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address
    pub const ZERO: Self = Address(0);

    /// Wrap a raw address
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Wrap a native pointer-sized value
    pub const fn from_usize(value: usize) -> Self
    {
        Address(value as u64)
    }

    /// Raw address value
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// `true` for the null address
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Add an offset, returning `None` on overflow
    ///
    /// ```rust
    /// use crashkit_core::types::Address;
    ///
    /// assert_eq!(Address::new(0x10).checked_add(8), Some(Address::new(0x18)));
    /// assert_eq!(Address::new(u64::MAX).checked_add(1), None);
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an offset, returning `None` on underflow
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Distance from `base` to this address, if this address is not below it
    pub fn offset_from(self, base: Address) -> Option<u64>
    {
        self.0.checked_sub(base.0)
    }

    /// `true` if the address is aligned to `align` bytes (a power of two)
    pub const fn is_aligned(self, align: u64) -> bool
    {
        self.0 & (align - 1) == 0
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}
