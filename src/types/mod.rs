//! Core types shared across the forecasting pipeline.

mod forecast;
mod observation;
mod phenology;
mod progress;

pub use forecast::*;
pub use observation::*;
pub use phenology::*;
pub use progress::*;
