//! Process/worker outcome bits.
//!
//! Failures are accumulated as a small bit-set rather than an enum because a
//! single run can observe several independent kinds of trouble (one core may
//! fail to start while another finds a stuck address line). The process exit
//! code is the OR of every worker's bits.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bit-set of failure conditions observed by one worker or the whole run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExitStatus(u8);

impl ExitStatus {
    /// A worker (or the process) could not begin its test loop at all.
    pub const NONSTARTER: ExitStatus = ExitStatus(0x01);
    /// The stuck-address check found an addressing fault.
    pub const ADDRESS_FAULT: ExitStatus = ExitStatus(0x02);
    /// Some pattern detector found a mismatch.
    pub const OTHER_FAULT: ExitStatus = ExitStatus(0x04);

    /// No failure bits set.
    pub const CLEAN: ExitStatus = ExitStatus(0);

    /// Raw bits, suitable for `std::process::exit`.
    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn is_clean(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn contains(self, other: ExitStatus) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ExitStatus {
    type Output = ExitStatus;

    #[inline]
    fn bitor(self, rhs: ExitStatus) -> ExitStatus {
        ExitStatus(self.0 | rhs.0)
    }
}

impl BitOrAssign for ExitStatus {
    #[inline]
    fn bitor_assign(&mut self, rhs: ExitStatus) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "clean");
        }
        let mut first = true;
        let mut put = |f: &mut fmt::Formatter<'_>, name: &str| -> fmt::Result {
            if !first {
                write!(f, "|")?;
            }
            first = false;
            write!(f, "{}", name)
        };
        if self.contains(ExitStatus::NONSTARTER) {
            put(f, "non-starter")?;
        }
        if self.contains(ExitStatus::ADDRESS_FAULT) {
            put(f, "address-fault")?;
        }
        if self.contains(ExitStatus::OTHER_FAULT) {
            put(f, "other-fault")?;
        }
        Ok(())
    }
}
