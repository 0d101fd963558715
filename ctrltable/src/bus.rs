use crate::accessor::{OperationDescriptor, OperationKind};
use crate::channel::ByteChannel;
use crate::packet::{read_frame, read_response, InstructionPacket, StatusPacket, BROADCAST_ID};
use crate::{BusError, Instruction, PacketError, ProtocolVersion};
use log::{debug, trace};
use std::time::Duration;

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(100);

/// The number of parameters in a protocol 2 ping reply: model number and firmware version.
const PING_PARAMS_V2: usize = 3;

/**
 * Executes operations against devices on a half-duplex bus.
 *
 * Each call writes one instruction packet, throws away the configured number of echoed or
 * relayed packets, and then reads the device's status packet. Nothing is retried: a checksum
 * error or timeout is returned to the caller, who knows whether repeating the operation is safe.
 */
pub struct Bus<C> {
    channel: C,
    timeout: Duration,
}

impl<C: ByteChannel> Bus<C> {
    pub fn new(channel: C) -> Self {
        Self::with_timeout(channel, DEFAULT_RESPONSE_TIMEOUT)
    }

    pub fn with_timeout(channel: C, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn into_inner(self) -> C {
        self.channel
    }

    fn send(
        &mut self,
        id: u8,
        version: ProtocolVersion,
        instruction: Instruction,
        params: &[u8],
    ) -> Result<(), BusError> {
        let packet = InstructionPacket {
            id,
            instruction,
            params: params.to_vec(),
        };
        trace!("Sending {:?} with protocol {}", packet, version.number());
        self.channel.write(&packet.to_bytes(version))?;
        Ok(())
    }

    fn skip_frames(&mut self, version: ProtocolVersion, count: u8) -> Result<(), BusError> {
        for _ in 0..count {
            read_frame(&mut self.channel, version, self.timeout)?;
        }
        Ok(())
    }

    fn receive(
        &mut self,
        version: ProtocolVersion,
        expected_params: usize,
    ) -> Result<StatusPacket, BusError> {
        let status = read_response(&mut self.channel, version, expected_params, self.timeout)?;
        if status.error != 0 {
            return Err(BusError::Device {
                id: status.id,
                error: status.error,
            });
        }
        Ok(status)
    }

    /// Checks whether a device answers at `id`. A timeout means nobody is there; any other
    /// failure is returned. Broadcast pings get no answer, so they return `false` straight
    /// after the skipped frames.
    pub fn ping(&mut self, id: u8, version: ProtocolVersion, skip: u8) -> Result<bool, BusError> {
        self.send(id, version, Instruction::Ping, &[])?;
        self.skip_frames(version, skip)?;
        if id == BROADCAST_ID {
            return Ok(false);
        }
        let expected_params = match version {
            ProtocolVersion::V1 => 0,
            ProtocolVersion::V2 => PING_PARAMS_V2,
        };
        match self.receive(version, expected_params) {
            Ok(_) => Ok(true),
            Err(BusError::Packet(PacketError::Timeout)) => {
                debug!("No reply from {}", id);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Sends a read instruction with raw `params` and returns the `width` bytes read.
    pub fn read(
        &mut self,
        id: u8,
        version: ProtocolVersion,
        params: &[u8],
        skip: u8,
        width: usize,
    ) -> Result<Vec<u8>, BusError> {
        self.send(id, version, Instruction::Read, params)?;
        self.skip_frames(version, skip)?;
        Ok(self.receive(version, width)?.params)
    }

    /// Sends a write instruction with raw `params`. Returns the status packet if one is
    /// expected, which is never the case for [`BROADCAST_ID`].
    pub fn write(
        &mut self,
        id: u8,
        version: ProtocolVersion,
        params: &[u8],
        skip: u8,
        expects_status: bool,
    ) -> Result<Option<StatusPacket>, BusError> {
        self.send(id, version, Instruction::Write, params)?;
        self.skip_frames(version, skip)?;
        if !expects_status || id == BROADCAST_ID {
            return Ok(None);
        }
        Ok(Some(self.receive(version, 0)?))
    }

    /// Reads the field described by a [`OperationKind::Get`] descriptor.
    pub fn get(&mut self, id: u8, descriptor: &OperationDescriptor) -> Result<u32, BusError> {
        check_kind(descriptor, OperationKind::Get)?;
        let params = self.read(
            id,
            descriptor.version,
            &descriptor.read_params(),
            descriptor.response_skip_count,
            descriptor.width,
        )?;
        Ok(descriptor.decode(&params))
    }

    /// Writes the field described by a [`OperationKind::Set`] descriptor.
    pub fn set(
        &mut self,
        id: u8,
        descriptor: &OperationDescriptor,
        value: u32,
    ) -> Result<Option<StatusPacket>, BusError> {
        check_kind(descriptor, OperationKind::Set)?;
        let params = descriptor.write_params(value)?;
        self.write(
            id,
            descriptor.version,
            &params,
            descriptor.response_skip_count,
            descriptor.expects_status,
        )
    }
}

fn check_kind(descriptor: &OperationDescriptor, kind: OperationKind) -> Result<(), BusError> {
    if descriptor.kind != kind {
        return Err(BusError::WrongKind {
            field: descriptor.field_name.clone(),
            kind: descriptor.kind,
        });
    }
    Ok(())
}
