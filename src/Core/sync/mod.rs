pub mod dekker;
pub mod spin;

pub use dekker::{Role, TwoPartyGuard, TwoPartyLock};
pub use spin::{SpinGuard, SpinLock};
