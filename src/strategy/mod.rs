//! Strategy layer: calibration data, edge scoring and Kelly sizing.
//!
//! Everything here is synchronous and free of I/O.

pub mod calibration;
pub mod edge;
pub mod kelly;

pub use calibration::{PriceZone, Venue, WeatherMarketType};
pub use edge::{EdgeCalculator, EdgeConfig, EdgeContext, EdgeSignal, EventType};
pub use kelly::{PositionSize, PositionSizer, SizingBlock, SizingConfig, SizingResult, ValidationError};
