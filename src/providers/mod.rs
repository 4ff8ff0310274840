pub mod lenco;
pub mod monnify;
