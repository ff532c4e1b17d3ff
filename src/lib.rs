pub mod config;
pub mod debounce;
pub mod hardware;
pub mod homing;
pub mod interpolation;
pub mod line_follow;
pub mod line_sensor;
pub mod messages;
pub mod platform;
pub mod runtime;
pub mod vibration;
