pub mod index;
pub mod media;
