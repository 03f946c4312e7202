pub mod annotator;
pub mod screenshot;
pub mod stability;
