pub mod disk;
pub mod index;
pub mod process;
pub mod storage;
