pub mod clock;
pub mod secrets;
