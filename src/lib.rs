extern crate self as formflow;

pub mod form;
pub mod geo;
pub mod prelude;
pub mod selection;
mod settle;
pub mod wizard;

pub use settle::{BoxError, CallbackPanicked};

#[cfg(test)]
mod test_public_api;
