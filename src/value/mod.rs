//! The value model: the tagged runtime value, the short/long bignum split,
//! and the mutable string header.

pub mod integer;
pub mod specifier;
pub mod string;
