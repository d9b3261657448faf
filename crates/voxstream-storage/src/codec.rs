use std::io::{self, Read, Write};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of data")]
    Truncated,
    #[error("i/o error: {0}")]
    Io(#[source] io::Error),
    #[error("unknown cell kind {0}")]
    UnknownKind(u8),
    #[error("negative run count {0}")]
    NegativeCount(i32),
    #[error("run {index} has non-positive length {len}")]
    BadRunLength { index: usize, len: i32 },
    #[error("{count} runs cannot fit in {limit} elements")]
    TooManyRuns { count: i32, limit: usize },
    #[error("run {index} takes the total length past {limit}")]
    LengthOverflow { index: usize, limit: usize },
}

impl From<io::Error> for CodecError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            CodecError::Truncated
        } else {
            CodecError::Io(err)
        }
    }
}

/// Fixed little-endian binary encoding used by run lists and chunk files.
pub trait BinaryCodec: Sized {
    fn encode<W: Write>(&self, out: &mut W) -> io::Result<()>;
    fn decode<R: Read>(input: &mut R) -> Result<Self, CodecError>;
}

macro_rules! le_codec {
    ($($t:ty),*) => {$(
        impl BinaryCodec for $t {
            #[inline]
            fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
                out.write_all(&self.to_le_bytes())
            }

            #[inline]
            fn decode<R: Read>(input: &mut R) -> Result<Self, CodecError> {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                input.read_exact(&mut buf)?;
                Ok(<$t>::from_le_bytes(buf))
            }
        }
    )*};
}

le_codec!(u8, u16, u32, i16, i32);
