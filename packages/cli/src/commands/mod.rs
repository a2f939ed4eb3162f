pub mod init;
pub mod inspect;
pub mod simulate;

pub use init::{init, InitArgs};
pub use inspect::{inspect, InspectArgs};
pub use simulate::{simulate, SimulateArgs};
