mod adb;
mod context;
mod remote;
mod server;

pub use adb::*;
pub use context::*;
pub use remote::*;
pub use server::*;
