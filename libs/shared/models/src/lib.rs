pub mod appointment;
pub mod doctor;
pub mod error;
pub mod scheduling;

pub use appointment::*;
pub use doctor::*;
pub use error::*;
pub use scheduling::*;
