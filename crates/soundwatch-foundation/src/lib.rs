pub mod clock;
pub mod error;
pub mod shutdown;
pub mod state;

pub use clock::*;
pub use error::*;
pub use shutdown::*;
pub use state::*;
