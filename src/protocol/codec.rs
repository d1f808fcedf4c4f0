use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tokio_util::codec::Encoder;
use tokio_util::codec::LinesCodec;
use tokio_util::codec::LinesCodecError;

use super::WireMessage;
use crate::ProtocolError;

/// Result of decoding one line. A malformed line is reported per frame so
/// the reader can answer or skip it without tearing the connection down.
pub type DecodedFrame = std::result::Result<WireMessage, ProtocolError>;

/// Line-delimited framing for [`WireMessage`] on top of [`LinesCodec`].
///
/// Only transport failures and oversized lines surface as codec errors,
/// which terminate the stream.
#[derive(Debug, Clone)]
pub struct WireCodec {
    lines: LinesCodec,
    max_length: usize,
}

impl WireCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }

    fn map_error(
        &self,
        e: LinesCodecError,
    ) -> ProtocolError {
        match e {
            LinesCodecError::MaxLineLengthExceeded => ProtocolError::FrameTooLong { max: self.max_length },
            LinesCodecError::Io(e) => ProtocolError::from(e),
        }
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_MAX_LINE_LENGTH)
    }
}

impl Decoder for WireCodec {
    type Item = DecodedFrame;
    type Error = ProtocolError;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.lines.decode(src) {
                // blank keep-alive lines
                Ok(Some(line)) if line.is_empty() => continue,
                Ok(Some(line)) => return Ok(Some(WireMessage::decode(&line))),
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.map_error(e)),
            }
        }
    }

    fn decode_eof(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        match self.lines.decode_eof(src) {
            Ok(Some(line)) if line.is_empty() => Ok(None),
            Ok(Some(line)) => Ok(Some(WireMessage::decode(&line))),
            Ok(None) => Ok(None),
            Err(e) => Err(self.map_error(e)),
        }
    }
}

impl Encoder<WireMessage> for WireCodec {
    type Error = ProtocolError;

    fn encode(
        &mut self,
        item: WireMessage,
        dst: &mut BytesMut,
    ) -> std::result::Result<(), Self::Error> {
        self.lines.encode(item.encode(), dst).map_err(|e| self.map_error(e))
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::Transport(e.to_string())
    }
}
