pub mod hasher;
pub mod imaging;
pub mod media;
pub mod rate_limiter;
pub mod sniff;
pub mod video;
