pub(crate) mod envelope;
pub(crate) mod tools;

#[cfg(feature = "stdio")]
mod server;
#[cfg(feature = "stdio")]
pub(crate) use server::serve_stdio;

pub(crate) const SCHEMA_VERSION: u64 = 1;
