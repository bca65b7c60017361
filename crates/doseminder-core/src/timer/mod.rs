mod countdown;
mod policy;

pub use countdown::{compute_remaining, format_countdown, next_dose, parse_dose_time, NextDose};
pub use policy::ResolutionPolicy;
