pub mod filter;
pub mod frames;
pub mod kalman;
pub mod landing_target;
