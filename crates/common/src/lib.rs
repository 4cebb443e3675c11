// murmur-common: shared types and wire protocol for the murmur workspace

pub mod protocol;
pub mod types;
