pub mod vbyte;
pub mod codec;
pub mod compress;
