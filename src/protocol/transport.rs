use std::io::{self, BufReader, Read, Write};

use bincode::{
    config::{BigEndian, Configuration, Fixint},
    decode_from_std_read, encode_to_vec,
    error::DecodeError,
};
use thiserror::Error;

use super::{Request, Response};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode message: {0}")]
    Serialize(#[from] bincode::error::EncodeError),
    #[error("failed to decode message: {0}")]
    Deserialize(#[from] DecodeError),
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// True when the failure came from the underlying stream rather than the message bytes.
    pub fn is_io(&self) -> bool {
        match self {
            TransportError::Io(_) => true,
            TransportError::Deserialize(
                DecodeError::Io { .. } | DecodeError::UnexpectedEnd { .. },
            ) => true,
            _ => false,
        }
    }
}

/// Moves encoded [`Request`]s and [`Response`]s over a byte stream.
///
/// Reads go through a buffer; each write is a single encoded frame followed
/// by a flush.
pub struct ProtocolTransport<T: Read + Write> {
    stream: BufReader<T>,
    config: Configuration<BigEndian, Fixint>,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_fixed_int_encoding();
        Self {
            stream: BufReader::new(stream),
            config,
        }
    }

    pub fn get_ref(&self) -> &T {
        self.stream.get_ref()
    }

    pub fn write_request(&mut self, req: &Request) -> Result<(), TransportError> {
        let buf = encode_to_vec(req, self.config)?;
        self.write_frame(&buf)
    }

    pub fn write_response(&mut self, resp: &Response) -> Result<(), TransportError> {
        let buf = encode_to_vec(resp, self.config)?;
        self.write_frame(&buf)
    }

    pub fn read_response(&mut self) -> Result<Response, TransportError> {
        let resp: Response = decode_from_std_read(&mut self.stream, self.config)?;
        Ok(resp)
    }

    pub fn read_request(&mut self) -> Result<Request, TransportError> {
        let req: Request = decode_from_std_read(&mut self.stream, self.config)?;
        Ok(req)
    }

    fn write_frame(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.get_mut();
        stream.write_all(buf)?;
        stream.flush()?;
        Ok(())
    }
}
