use dec::{encode, Cursor, Scalar};

fn init_test_log() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

const TRACE_ENTRY_ELEMENTS: u16 = 1;
const ELEMENT_ID: u16 = 1;
const ELEMENT_VALUE: u16 = 2;

fn element(id: u64, value: u64) -> Vec<u8> {
    let mut body = Vec::new();
    encode::write_varint_field(&mut body, ELEMENT_ID, id);
    encode::write_varint_field(&mut body, ELEMENT_VALUE, value);
    body
}

#[test]
fn trace_entry_repeated_elements_decode_in_source_order() {
    init_test_log();
    let mut trace_entry = Vec::new();
    encode::write_bytes_field(&mut trace_entry, TRACE_ENTRY_ELEMENTS, &element(0, 10));
    encode::write_bytes_field(&mut trace_entry, TRACE_ENTRY_ELEMENTS, &element(1, 11));

    let cursor = Cursor::new(&trace_entry);
    let children: Vec<_> = cursor
        .iterate_repeated_field(TRACE_ENTRY_ELEMENTS)
        .unwrap()
        .collect();
    assert_eq!(children.len(), 2);

    for (i, mut child) in children.into_iter().enumerate() {
        child.enter_field(ELEMENT_ID).unwrap();
        assert_eq!(child.get_scalar().unwrap(), Scalar::VarInt(i as u64));
    }
}

#[test]
fn enter_field_merges_to_last_occurrence_across_full_record() {
    init_test_log();
    let mut record = Vec::new();
    encode::write_varint_field(&mut record, 7, 100);
    encode::write_varint_field(&mut record, 7, 200);

    let mut cursor = Cursor::new(&record);
    cursor.enter_field(7).unwrap();
    assert_eq!(cursor.get_scalar().unwrap(), Scalar::VarInt(200));
}
