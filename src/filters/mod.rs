pub mod one_euro;
pub mod radius;
pub mod smoothing;

pub use one_euro::CoordFilter;
pub use radius::RadiusBuffer;
pub use smoothing::SmoothingBuffer;
