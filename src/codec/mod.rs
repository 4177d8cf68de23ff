mod error;
mod framed_read;
mod framed_write;

pub use self::error::{RecvError, UserError};
pub use self::framed_read::FramedRead;
pub use self::framed_write::FramedWrite;
