//! Control-table documents in, operation descriptors and rendered source out.

use ctrltable::accessor::{AccessorGenerator, Generated, RowError};
use ctrltable::render::{EmissionBackend, ListingBackend, RustModuleBackend};
use ctrltable::table::TableSyntax;
use ctrltable::{OperationKind, ProtocolVersion, ReplyPolicy, RowProblem};

const XL320: &str = include_str!("data/xl320.md");
const AX12A: &str = include_str!("data/ax12a.md");

/// EEPROM section with a row missing its access and initial value columns, then an intact RAM
/// section.
const BROKEN: &str = "\
## [Control Table of EEPROM Area](#control-table-of-eeprom-area)

| Address | Size | Data Name | Access | Initial Value |
|---------|------|-----------|--------|---------------|
| 0       | 2    | [Model Number](#model-number) | R | 1060 |
| 2       | 1    | [Firmware Version](#firmware-version) |
| 3       | 1    | [ID](#id) | RW | 1 |

## [Control Table of RAM Area](#control-table-of-ram-area)

| Address | Size | Data Name | Access | Initial Value |
|---------|------|-----------|--------|---------------|
| 64      | 1    | [Torque Enable](#torque-enable) | RW | 0 |
| 132     | 4    | [Present Position](#present-position) | R | - |
";

fn generator(versions: Vec<ProtocolVersion>) -> AccessorGenerator {
    AccessorGenerator::new(versions, ReplyPolicy::default(), TableSyntax::default()).unwrap()
}

fn names(generated: &Generated) -> Vec<&str> {
    generated.field_index.iter().map(String::as_str).collect()
}

#[test]
fn xl320_both_sections_and_nothing_after() {
    let generated = generator(vec![ProtocolVersion::V2]).run(XL320);

    assert!(generated.errors.is_empty());
    assert_eq!(generated.field_index.len(), 31);
    assert_eq!(generated.field_index.first().unwrap(), "model_number");
    assert_eq!(generated.field_index[13], "shutdown");
    assert_eq!(generated.field_index[14], "torque_enable");
    assert_eq!(generated.field_index.last().unwrap(), "punch");
    // 31 getters and 21 setters.
    assert_eq!(generated.descriptors.len(), 52);
    assert_eq!(
        generated
            .descriptors
            .iter()
            .filter(|descriptor| descriptor.kind == OperationKind::Set)
            .count(),
        21
    );
}

#[test]
fn read_only_fields_never_get_setters() {
    let generated = generator(ProtocolVersion::ALL.to_vec()).run(XL320);
    for name in ["model_number", "present_position", "hardware_error_status"] {
        assert!(generated
            .descriptors
            .iter()
            .filter(|descriptor| descriptor.field_name == name)
            .all(|descriptor| descriptor.kind == OperationKind::Get));
    }
}

#[test]
fn index_repeats_names_per_version() {
    let generated = generator(ProtocolVersion::ALL.to_vec()).run(AX12A);
    assert_eq!(
        names(&generated)[..6],
        [
            "model_number",
            "model_number",
            "firmware_version",
            "firmware_version",
            "id",
            "id"
        ]
    );
    assert_eq!(generated.field_index.len(), 24);
}

#[test]
fn description_column_feeds_docs() {
    let generated = generator(vec![ProtocolVersion::V1]).run(AX12A);
    let id = generated
        .descriptors
        .iter()
        .find(|descriptor| descriptor.field_name == "id")
        .unwrap();
    assert_eq!(id.doc, "DYNAMIXEL ID (initial: 1)");
    assert_eq!(id.address_bytes, [3]);
    assert_eq!(id.size_bytes, [1]);
    assert!(!names(&generated).contains(&"bogus"));
}

#[test]
fn batch_keeps_going_after_a_bad_row() {
    let results = generator(vec![ProtocolVersion::V2]).run_batch([XL320, BROKEN, AX12A]);

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].field_index.len(), 31);
    assert_eq!(results[2].field_index.len(), 12);

    let broken = &results[1];
    assert_eq!(
        names(broken),
        ["model_number", "torque_enable", "present_position"]
    );
    match &broken.errors[..] {
        [RowError::Format(error)] => {
            assert_eq!(error.line_number, 6);
            assert_eq!(
                error.line,
                "| 2       | 1    | [Firmware Version](#firmware-version) |"
            );
            assert_eq!(
                error.reason,
                RowProblem::ColumnCount {
                    expected: 5,
                    found: 3
                }
            );
        }
        errors => panic!("unexpected errors {:?}", errors),
    }
}

#[test]
fn skip_count_comes_from_the_run() {
    let policy = ReplyPolicy {
        skip_count: 2,
        status_return: false,
    };
    let generated = AccessorGenerator::new(vec![ProtocolVersion::V1], policy, TableSyntax::default())
        .unwrap()
        .run(AX12A);
    for descriptor in &generated.descriptors {
        assert_eq!(descriptor.response_skip_count, 2);
        assert_eq!(descriptor.expects_status, descriptor.kind == OperationKind::Get);
    }
}

#[test]
fn listing() {
    let generated = generator(vec![ProtocolVersion::V1]).run(AX12A);
    let listing = ListingBackend.render(&generated.descriptors).unwrap();
    let lines: Vec<&str> = listing.lines().take(4).collect();
    assert_eq!(
        lines,
        [
            "V1\tget\tmodel_number\t[0]\t[2]\tskip 0",
            "V1\tget\tfirmware_version\t[2]\t[1]\tskip 0",
            "V1\tget\tid\t[3]\t[1]\tskip 0",
            "V1\tset\tid\t[3]\t[1]\tskip 0",
        ]
    );
}

#[test]
fn rust_module() {
    let generated = generator(ProtocolVersion::ALL.to_vec()).run(XL320);
    let source = RustModuleBackend::new("xl320")
        .render(&generated.descriptors)
        .unwrap();

    assert!(source.contains("pub mod protocol_1 {"));
    assert!(source.contains("pub mod protocol_2 {"));
    assert!(source.contains("    /// [LED](#led) (initial: 0)\n"));
    assert!(source.contains("    pub fn set_xl320_led<C: ByteChannel>(bus: &mut Bus<C>, id: u8, value: u8)"));
    assert!(source.contains("    pub fn get_xl320_present_position<C: ByteChannel>(bus: &mut Bus<C>, id: u8) -> Result<u16, BusError> {"));
    assert!(!source.contains("set_xl320_present_position"));
    assert_eq!(source.matches("pub fn get_").count(), 62);
    assert_eq!(source.matches("pub fn set_").count(), 42);
}
