//! Generated operations driven against a simulated device that decodes real instruction frames.

use ctrltable::accessor::{AccessorGenerator, Generated};
use ctrltable::bus::Bus;
use ctrltable::channel::ByteChannel;
use ctrltable::packet::{parse_frame, BROADCAST_ID};
use ctrltable::table::TableSyntax;
use ctrltable::{
    BusError, ChannelError, Instruction, OperationDescriptor, OperationKind, ProtocolVersion,
    ReplyPolicy, StatusPacket,
};
use std::collections::VecDeque;
use std::time::Duration;
use test_case::test_case;
use ProtocolVersion::{V1, V2};

const XL320: &str = include_str!("data/xl320.md");

/// A servo with a flat control table, answering whatever it is sent on the same wire.
struct SimulatedServo {
    id: u8,
    version: ProtocolVersion,
    memory: [u8; 64],
    echo: bool,
    /// Whether writes get a status packet.
    status_return: bool,
    incoming: VecDeque<u8>,
    instructions: Vec<(Instruction, Vec<u8>)>,
}

impl SimulatedServo {
    fn new(id: u8, version: ProtocolVersion) -> Self {
        // Run with RUST_LOG=trace to see the bytes on the wire.
        let _ = pretty_env_logger::try_init();
        Self {
            id,
            version,
            memory: [0; 64],
            echo: false,
            status_return: true,
            incoming: VecDeque::new(),
            instructions: Vec::new(),
        }
    }

    fn reply(&mut self, params: &[u8]) {
        let status = StatusPacket {
            id: self.id,
            error: 0,
            params: params.to_vec(),
        };
        self.incoming.extend(status.to_bytes(self.version));
    }

    fn handle(&mut self, frame: &[u8]) {
        let version = self.version;
        let header = version.header().len();
        let field = version.field_width();
        let id = frame[header];
        let instruction = Instruction::parse(frame[header + 1 + field]).unwrap();
        let params = frame[header + 2 + field..frame.len() - version.trailer_len()].to_vec();
        self.instructions.push((instruction, params.clone()));
        if id != self.id && id != BROADCAST_ID {
            return;
        }

        let address = le_value(&params[..field]);
        let data = &params[field..];
        match instruction {
            Instruction::Read => {
                let size = le_value(&data[..field]);
                let value = self.memory[address..address + size].to_vec();
                self.reply(&value);
            }
            Instruction::Write => {
                self.memory[address..address + data.len()].copy_from_slice(data);
                if self.status_return && id != BROADCAST_ID {
                    self.reply(&[]);
                }
            }
            other => panic!("unexpected instruction {:?}", other),
        }
    }
}

fn le_value(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .rev()
        .fold(0, |value, &byte| (value << 8) | usize::from(byte))
}

impl ByteChannel for SimulatedServo {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        if self.echo {
            self.incoming.extend(bytes);
        }
        let frame = parse_frame(bytes, self.version).unwrap();
        assert_eq!(frame, bytes);
        self.handle(bytes);
        Ok(())
    }

    fn read(&mut self, count: usize, _timeout: Duration) -> Result<Vec<u8>, ChannelError> {
        if self.incoming.is_empty() && count > 0 {
            return Err(ChannelError::Timeout);
        }
        let count = count.min(self.incoming.len());
        Ok(self.incoming.drain(..count).collect())
    }
}

fn generated(version: ProtocolVersion, policy: ReplyPolicy) -> Generated {
    AccessorGenerator::new(vec![version], policy, TableSyntax::default())
        .unwrap()
        .run(XL320)
}

fn find<'a>(
    generated: &'a Generated,
    name: &str,
    kind: OperationKind,
) -> &'a OperationDescriptor {
    generated
        .descriptors
        .iter()
        .find(|descriptor| descriptor.field_name == name && descriptor.kind == kind)
        .unwrap()
}

#[test_case(V1, 0; "protocol 1 direct")]
#[test_case(V2, 0; "protocol 2 direct")]
#[test_case(V1, 1; "protocol 1 echoing adapter")]
#[test_case(V2, 1; "protocol 2 echoing adapter")]
fn set_then_get(version: ProtocolVersion, skip_count: u8) {
    let policy = ReplyPolicy {
        skip_count,
        status_return: true,
    };
    let generated = generated(version, policy);
    let mut servo = SimulatedServo::new(1, version);
    servo.echo = skip_count == 1;
    let mut bus = Bus::new(servo);

    let goal_position = find(&generated, "goal_position", OperationKind::Set);
    assert_eq!(
        bus.set(1, goal_position, 512),
        Ok(Some(StatusPacket {
            id: 1,
            error: 0,
            params: vec![]
        }))
    );
    assert_eq!(bus.channel_mut().memory[30..32], [0x00, 0x02]);

    let goal_position = find(&generated, "goal_position", OperationKind::Get);
    assert_eq!(bus.get(1, goal_position), Ok(512));

    let servo = bus.into_inner();
    assert!(servo.incoming.is_empty());
    assert_eq!(servo.instructions[0].0, Instruction::Write);
    assert_eq!(servo.instructions[1].0, Instruction::Read);
}

#[test]
fn every_getter_reads_its_own_bytes() {
    let generated = generated(V2, ReplyPolicy::default());
    let mut servo = SimulatedServo::new(3, V2);
    for (address, byte) in servo.memory.iter_mut().enumerate() {
        *byte = address as u8;
    }
    let mut bus = Bus::new(servo);

    let led = find(&generated, "led", OperationKind::Get);
    assert_eq!(bus.get(3, led), Ok(25));
    let present_position = find(&generated, "present_position", OperationKind::Get);
    assert_eq!(bus.get(3, present_position), Ok(u32::from_le_bytes([37, 38, 0, 0])));

    for descriptor in generated
        .descriptors
        .iter()
        .filter(|descriptor| descriptor.kind == OperationKind::Get)
    {
        bus.get(3, descriptor).unwrap();
    }
    assert_eq!(bus.into_inner().instructions.len(), 2 + 31);
}

#[test]
fn broadcast_write_expects_no_status() {
    let policy = ReplyPolicy {
        skip_count: 1,
        status_return: false,
    };
    let generated = generated(V1, policy);
    let mut servo = SimulatedServo::new(7, V1);
    servo.echo = true;
    let mut bus = Bus::new(servo);

    let torque_enable = find(&generated, "torque_enable", OperationKind::Set);
    assert_eq!(bus.set(BROADCAST_ID, torque_enable, 1), Ok(None));

    let servo = bus.into_inner();
    assert_eq!(servo.memory[24], 1);
    assert!(servo.incoming.is_empty());
}

#[test]
fn silent_device_times_out() {
    let generated = generated(V2, ReplyPolicy::default());
    let mut bus = Bus::with_timeout(SimulatedServo::new(1, V2), Duration::from_millis(1));

    let led = find(&generated, "led", OperationKind::Get);
    assert!(matches!(bus.get(2, led), Err(BusError::Packet(_))));
    assert_eq!(bus.into_inner().instructions.len(), 1);
}
