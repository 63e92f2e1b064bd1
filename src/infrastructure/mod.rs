pub mod haptics;
pub mod logging;
