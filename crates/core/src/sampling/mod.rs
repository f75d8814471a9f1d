pub mod drawing_surface;
pub mod frame_sampler;
