pub mod ensemble;
pub mod ewrls;

pub use ensemble::*;
pub use ewrls::*;
