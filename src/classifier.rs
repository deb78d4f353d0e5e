use crate::model::{Movement, Polarity};

/// Label a price delta as an up or down tick.
///
/// A zero delta counts as `Down` for ascending feeds and as `Up` for
/// descending feeds.
pub fn classify(price_change: f64, polarity: Polarity) -> Movement {
    let up = match polarity {
        Polarity::Ascending => price_change > 0.0,
        Polarity::Descending => price_change >= 0.0,
    };
    if up {
        Movement::Up
    } else {
        Movement::Down
    }
}
