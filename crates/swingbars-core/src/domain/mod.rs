mod bar;
mod range;
mod resolution;
mod symbol;
mod timestamp;

pub use bar::{Bar, Series, SeriesKey};
pub use range::CachedRange;
pub use resolution::Resolution;
pub use symbol::Symbol;
pub use timestamp::UtcDateTime;
