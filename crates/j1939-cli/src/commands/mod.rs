//! Command implementations

mod monitor;
mod request;
mod send;
mod test;

pub use monitor::monitor;
pub use request::request;
pub use send::send;
pub use test::test_result;
