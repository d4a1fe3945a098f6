// Domain core: errors, payloads, the identity map, wire enums and locations.
pub mod cache;
pub mod error;
pub mod location;
pub mod payload;
pub mod types;
