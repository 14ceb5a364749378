pub mod jobs;
pub mod panoramas;
pub mod stitch;
