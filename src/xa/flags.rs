//! XA flag constants, matching the standard `javax.transaction.xa.XAResource`
//! values bit-for-bit so they round-trip over the wire unchanged
//! (`spec.md` §6, §7).

pub const TMNOFLAGS: u32 = 0x0000_0000;
pub const TMJOIN: u32 = 0x0020_0000;
pub const TMRESUME: u32 = 0x0800_0000;
pub const TMSUCCESS: u32 = 0x0400_0000;
pub const TMFAIL: u32 = 0x2000_0000;
pub const TMSTARTRSCAN: u32 = 0x0100_0000;
pub const TMENDRSCAN: u32 = 0x0080_0000;
