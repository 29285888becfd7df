//! Serial line module.
//!
//! The `SerialLink` trait is the blocking request/response contract with
//! the radio node. `SerialPortLink` talks to real hardware; `ScriptedLink`
//! stands in for it.

mod link;
mod port;
mod scripted;

pub use link::{ResponseAssembler, SerialLink};
pub use port::SerialPortLink;
pub use scripted::ScriptedLink;
