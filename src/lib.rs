mod archive;
mod fsio;
mod listing;

pub use archive::*;
pub use fsio::*;
pub use listing::*;
