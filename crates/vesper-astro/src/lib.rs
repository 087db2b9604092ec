//! Sidereal-time and horizontal-coordinate math backing a Target's
//! astronomical context

pub mod scheduler;

pub use scheduler::{altitude_azimuth, greenwich_sidereal_time_hours, julian_date, AstroScheduler};
