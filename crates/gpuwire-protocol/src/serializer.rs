use gpuwire_alloc::{align_up, CommandAllocator, CommandIterator};

use crate::chunk::send_chunked;
use crate::record::CmdHeader;
use crate::schema::{self, Direction, MAX_FIXED_SIZE};
use crate::{Transport, WireError, WireLimits, WIRE_ALIGNMENT};

/// Something that serializes as one wire record.
pub trait WireRecord {
    fn command_id(&self) -> u32;
    fn name(&self) -> &'static str;
    /// Size of the fixed transfer struct, header included.
    fn fixed_size(&self) -> usize;
    /// The single trailing array, unpadded. Empty if the record has none.
    fn trailing(&self) -> &[u8];
    /// Write the fixed transfer struct, header included, into `out` (exactly `fixed_size` bytes).
    fn write_fixed(&self, header: CmdHeader, out: &mut [u8]);
}

/// Buffers records in a [`CommandAllocator`] and frames them into transport messages on flush.
///
/// Records are sent strictly in serialization order. A record larger than
/// `max_message_size` is split into chunk records.
pub struct CommandSerializer {
    direction: Direction,
    limits: WireLimits,
    allocator: CommandAllocator,
    staging: Vec<u8>,
    pending_records: usize,
}

impl CommandSerializer {
    pub fn new(direction: Direction, limits: WireLimits) -> Self {
        Self {
            direction,
            limits,
            allocator: CommandAllocator::new(),
            staging: Vec::new(),
            pending_records: 0,
        }
    }

    pub fn limits(&self) -> &WireLimits {
        &self.limits
    }

    /// Number of records serialized since the last flush.
    pub fn pending_records(&self) -> usize {
        self.pending_records
    }

    pub fn has_pending(&self) -> bool {
        !self.allocator.is_empty()
    }

    /// Append one record. Nothing is sent until [`CommandSerializer::flush`].
    pub fn serialize(&mut self, record: &impl WireRecord) -> Result<(), WireError> {
        let command_id = record.command_id();
        let fixed = record.fixed_size();
        let trailing = record.trailing();
        let padded = align_up(trailing.len(), WIRE_ALIGNMENT);
        let size = fixed.saturating_add(padded);
        let max = self.limits.max_chunked_size;
        if size > max {
            return Err(WireError::RecordTooLarge {
                command_id,
                size_bytes: size,
                max,
            });
        }
        let size_bytes = u32::try_from(size).map_err(|_| WireError::RecordTooLarge {
            command_id,
            size_bytes: size,
            max: u32::MAX as usize,
        })?;

        let header = CmdHeader {
            command_id,
            size_bytes,
        };
        let dst = self.allocator.allocate(command_id, fixed, WIRE_ALIGNMENT)?;
        record.write_fixed(header, dst);
        if padded > 0 {
            let dst = self.allocator.allocate_data(padded, WIRE_ALIGNMENT)?;
            let (data, padding) = dst.split_at_mut(trailing.len());
            data.copy_from_slice(trailing);
            padding.fill(0);
        }

        self.pending_records += 1;
        tracing::trace!(command = record.name(), size, "serialized record");
        Ok(())
    }

    /// Send every pending record through `transport` and reset the allocator.
    ///
    /// Returns the number of messages sent.
    pub fn flush(&mut self, transport: &mut dyn Transport) -> Result<usize, WireError> {
        if self.allocator.is_empty() {
            return Ok(0);
        }

        let mut records = CommandIterator::new(self.allocator.acquire_blocks());
        let mut staging = std::mem::take(&mut self.staging);
        staging.clear();
        let result = self.frame(&mut records, &mut staging, transport);
        records.mark_consumed();
        staging.clear();
        self.staging = staging;

        let count = std::mem::take(&mut self.pending_records);
        match &result {
            Ok(messages) => tracing::trace!(records = count, messages, "flushed"),
            Err(err) => tracing::warn!(%err, "flush failed"),
        }
        result
    }

    /// Drop pending records without sending them.
    pub fn discard(&mut self) {
        self.allocator.reset();
        self.pending_records = 0;
    }

    fn frame(
        &self,
        records: &mut CommandIterator,
        staging: &mut Vec<u8>,
        transport: &mut dyn Transport,
    ) -> Result<usize, WireError> {
        let max = self.limits.max_message_size;
        let mut sent = 0;
        let mut fixed_buf = [0u8; MAX_FIXED_SIZE];

        while let Some(id) = records.next_tag() {
            let fixed_size = schema::fixed_size(self.direction, id)
                .filter(|&size| size <= MAX_FIXED_SIZE)
                .ok_or(WireError::UnknownCommand { id })?;
            let fixed = &mut fixed_buf[..fixed_size];
            fixed.copy_from_slice(records.next_record(fixed_size, WIRE_ALIGNMENT)?);
            let header: CmdHeader = bytemuck::pod_read_unaligned(&fixed[..CmdHeader::SIZE_BYTES]);
            let size = header.size_bytes as usize;
            let trailing_size = size.saturating_sub(fixed_size);

            if size <= max {
                if staging.len() + size > max {
                    transport.send(staging)?;
                    sent += 1;
                    staging.clear();
                }
                staging.extend_from_slice(fixed);
                if trailing_size > 0 {
                    staging.extend_from_slice(records.next_data(trailing_size, WIRE_ALIGNMENT)?);
                }
            } else {
                if !staging.is_empty() {
                    transport.send(staging)?;
                    sent += 1;
                    staging.clear();
                }
                let data: &[u8] = if trailing_size > 0 {
                    records.next_data(trailing_size, WIRE_ALIGNMENT)?
                } else {
                    &[]
                };
                sent += send_chunked(
                    &[&*fixed, data],
                    self.limits.chunk_payload(),
                    transport,
                    staging,
                )?;
                staging.clear();
            }
        }

        if !staging.is_empty() {
            transport.send(staging)?;
            sent += 1;
        }
        Ok(sent)
    }
}
