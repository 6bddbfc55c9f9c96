pub mod common;
pub mod image;
pub mod provenance;
pub mod text;

pub use common::*;
pub use image::*;
pub use provenance::*;
pub use text::*;
