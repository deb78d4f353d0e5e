pub mod tick;

pub use tick::{Movement, MovementCounts, Polarity, Quote, TickRecord};
