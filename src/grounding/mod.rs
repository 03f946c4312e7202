pub mod backend;
pub mod coords;
pub mod engine;
pub mod onnx;
pub mod remote;
