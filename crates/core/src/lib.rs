pub mod capture;
pub mod inference;
pub mod pipeline;
pub mod sampling;
pub mod shared;
