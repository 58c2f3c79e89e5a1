pub mod error;
pub mod location;
pub mod progress;
pub mod traits;

pub mod prelude {
    pub use super::error::*;
    pub use super::location::*;
    pub use super::progress::*;
    pub use super::traits::*;
}
