pub mod checksum;
pub mod icmp;
pub mod socket;
pub mod tcp;

pub use checksum::*;
pub use icmp::*;
pub use socket::*;
pub use tcp::*;
