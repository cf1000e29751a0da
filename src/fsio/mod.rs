mod capture;
mod compare;
mod restore;
pub mod sys;

pub use capture::*;
pub use compare::*;
pub use restore::*;

#[cfg(test)]
mod fsio_test;
