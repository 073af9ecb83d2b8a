pub mod errors;
pub mod config;
pub mod graphs;
pub mod aligner;
pub mod io;
pub mod window;

pub use window::{Window, WindowType};
