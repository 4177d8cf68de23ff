mod decoder;
mod encoder;
mod header;
mod huffman;
mod table;

pub use self::decoder::{Decoder, DecoderError};
pub use self::encoder::Encoder;
pub use self::header::Header;
