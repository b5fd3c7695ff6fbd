use crate::chunk::{decode_chunk, ChunkAccumulator};
use crate::record::RawRecord;
use crate::{WireError, WireLimits, CHUNKED_COMMAND_ID};

/// Outcome of feeding bytes to a [`StreamDecoder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeProgress {
    /// Every received byte belonged to a record that has been handled.
    Complete,
    /// A partial record or an unfinished chunked command is buffered.
    Incomplete { buffered: usize },
}

impl DecodeProgress {
    pub fn is_complete(self) -> bool {
        matches!(self, DecodeProgress::Complete)
    }
}

/// Frames records out of an arbitrarily split byte stream.
///
/// Bytes of a record that straddles two `decode` calls are copied into an internal buffer; whole
/// records are handed to the callback straight from the caller's slice. Chunked commands are
/// reassembled before the callback sees them.
#[derive(Debug)]
pub struct StreamDecoder {
    limits: WireLimits,
    pending: Vec<u8>,
    chunks: ChunkAccumulator,
}

impl StreamDecoder {
    pub fn new(limits: WireLimits) -> Self {
        Self {
            limits,
            pending: Vec::new(),
            chunks: ChunkAccumulator::new(limits.max_chunked_size),
        }
    }

    /// Bytes held back waiting for the rest of their record or chunked command.
    pub fn buffered(&self) -> usize {
        self.pending.len() + self.chunks.received()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && !self.chunks.in_progress()
    }

    /// Decode every complete record in `bytes`, in order.
    ///
    /// The first error, from framing or from `on_record`, stops decoding and is returned.
    pub fn decode<F>(&mut self, bytes: &[u8], mut on_record: F) -> Result<DecodeProgress, WireError>
    where
        F: FnMut(RawRecord<'_>) -> Result<(), WireError>,
    {
        if self.pending.is_empty() {
            let consumed = self.walk(bytes, &mut on_record)?;
            self.pending.extend_from_slice(&bytes[consumed..]);
        } else {
            let mut pending = std::mem::take(&mut self.pending);
            pending.extend_from_slice(bytes);
            let consumed = self.walk(&pending, &mut on_record)?;
            pending.drain(..consumed);
            self.pending = pending;
        }
        Ok(self.progress())
    }

    /// Declare the end of the stream.
    pub fn finish(&mut self) -> Result<(), WireError> {
        if self.is_idle() {
            return Ok(());
        }
        let buffered = self.buffered();
        self.pending.clear();
        self.chunks.reset();
        Err(WireError::TruncatedStream { buffered })
    }

    fn progress(&self) -> DecodeProgress {
        if self.is_idle() {
            DecodeProgress::Complete
        } else {
            DecodeProgress::Incomplete {
                buffered: self.buffered(),
            }
        }
    }

    fn walk<F>(&mut self, buf: &[u8], on_record: &mut F) -> Result<usize, WireError>
    where
        F: FnMut(RawRecord<'_>) -> Result<(), WireError>,
    {
        let mut offset = 0;
        while let Some(record) = RawRecord::parse(&buf[offset..], self.limits.max_record_size)? {
            offset += record.len();

            if record.command_id() != CHUNKED_COMMAND_ID {
                if self.chunks.in_progress() {
                    return Err(WireError::InterleavedChunk {
                        command_id: record.command_id(),
                    });
                }
                on_record(record)?;
                continue;
            }

            let (total_size, chunk) = decode_chunk(record)?;
            if let Some(whole) = self.chunks.push(total_size, chunk)? {
                let record = RawRecord::parse(&whole, self.limits.max_chunked_size)?
                    .filter(|r| r.len() == whole.len() && r.command_id() != CHUNKED_COMMAND_ID)
                    .ok_or(WireError::MalformedChunkedCommand)?;
                tracing::trace!(
                    command_id = record.command_id(),
                    size = whole.len(),
                    "reassembled chunked record"
                );
                on_record(record)?;
            }
        }
        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CmdHeader;

    fn record(command_id: u32, payload: &[u8]) -> Vec<u8> {
        let size = CmdHeader::SIZE_BYTES + payload.len();
        let mut out = bytemuck::bytes_of(&CmdHeader {
            command_id,
            size_bytes: size as u32,
        })
        .to_vec();
        out.extend_from_slice(payload);
        out
    }

    fn collect(decoder: &mut StreamDecoder, bytes: &[u8], out: &mut Vec<Vec<u8>>) -> DecodeProgress {
        decoder
            .decode(bytes, |r| {
                out.push(r.as_bytes().to_vec());
                Ok(())
            })
            .unwrap()
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let mut stream = record(1, &[1; 8]);
        stream.extend(record(2, &[2; 16]));

        let mut decoder = StreamDecoder::new(WireLimits::default());
        let mut out = Vec::new();
        for (i, b) in stream.iter().enumerate() {
            let progress = collect(&mut decoder, std::slice::from_ref(b), &mut out);
            if i == 15 || i == stream.len() - 1 {
                assert_eq!(progress, DecodeProgress::Complete);
            } else {
                assert!(!progress.is_complete());
            }
        }
        assert_eq!(out, vec![record(1, &[1; 8]), record(2, &[2; 16])]);
        decoder.finish().unwrap();
    }

    #[test]
    fn truncated_stream_is_fatal_at_finish() {
        let stream = record(1, &[0; 16]);
        let mut decoder = StreamDecoder::new(WireLimits::default());
        let mut out = Vec::new();
        assert_eq!(
            collect(&mut decoder, &stream[..12], &mut out),
            DecodeProgress::Incomplete { buffered: 12 }
        );
        assert_eq!(
            decoder.finish(),
            Err(WireError::TruncatedStream { buffered: 12 })
        );
        assert!(out.is_empty());
    }

    #[test]
    fn callback_errors_stop_decoding() {
        let mut stream = record(1, &[]);
        stream.extend(record(2, &[]));
        let mut decoder = StreamDecoder::new(WireLimits::default());
        let mut seen = 0;
        let err = decoder
            .decode(&stream, |_| {
                seen += 1;
                Err(WireError::UnknownCommand { id: 1 })
            })
            .unwrap_err();
        assert_eq!(err, WireError::UnknownCommand { id: 1 });
        assert_eq!(seen, 1);
    }

    #[test]
    fn oversized_record_is_fatal_before_it_arrives() {
        let limits = WireLimits {
            max_record_size: 64 * 1024,
            ..WireLimits::default()
        };
        let header = bytemuck::bytes_of(&CmdHeader {
            command_id: 1,
            size_bytes: 1 << 20,
        })
        .to_vec();
        let mut decoder = StreamDecoder::new(limits);
        assert!(matches!(
            decoder.decode(&header, |_| Ok(())),
            Err(WireError::RecordTooLarge { .. })
        ));
    }
}
