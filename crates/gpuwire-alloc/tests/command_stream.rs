use gpuwire_alloc::{CommandAllocator, CommandIterator, MAX_BLOCK_GROWTH};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct Record {
    tag: u32,
    alignment: usize,
    body: Vec<u8>,
    trailing: Option<Vec<u8>>,
}

fn record_strategy() -> impl Strategy<Value = Record> {
    (
        0u32..1000,
        prop::sample::select(vec![1usize, 2, 4, 8]),
        prop::collection::vec(any::<u8>(), 0..96),
        prop::option::of(prop::collection::vec(any::<u8>(), 0..(MAX_BLOCK_GROWTH + 512))),
    )
        .prop_map(|(tag, alignment, body, trailing)| Record {
            tag,
            alignment,
            body,
            trailing,
        })
}

fn write_all(alloc: &mut CommandAllocator, records: &[Record]) {
    for r in records {
        alloc
            .allocate(r.tag, r.body.len(), r.alignment)
            .unwrap()
            .copy_from_slice(&r.body);
        if let Some(trailing) = &r.trailing {
            alloc.push_data(trailing, 8).unwrap();
        }
    }
}

fn read_all(it: &mut CommandIterator, records: &[Record]) {
    for r in records {
        assert_eq!(it.next_tag(), Some(r.tag));
        assert_eq!(it.next_record(r.body.len(), r.alignment).unwrap(), &r.body[..]);
        if let Some(trailing) = &r.trailing {
            assert_eq!(it.next_data(trailing.len(), 8).unwrap(), &trailing[..]);
        }
    }
    assert_eq!(it.next_tag(), None);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn records_round_trip_across_blocks(records in prop::collection::vec(record_strategy(), 0..48)) {
        let mut alloc = CommandAllocator::new();
        write_all(&mut alloc, &records);
        assert_eq!(alloc.is_empty(), records.is_empty());

        let mut it = CommandIterator::new(alloc.acquire_blocks());
        assert!(alloc.is_empty());
        read_all(&mut it, &records);
    }
}

#[test]
fn iterates_several_acquired_lists_in_order() {
    let first: Vec<Record> = (0..40)
        .map(|i| Record {
            tag: i,
            alignment: 8,
            body: vec![i as u8; 200],
            trailing: None,
        })
        .collect();
    let second: Vec<Record> = (40..45)
        .map(|i| Record {
            tag: i,
            alignment: 4,
            body: vec![i as u8; 12],
            trailing: Some(vec![0x5A; 30]),
        })
        .collect();

    let mut alloc = CommandAllocator::new();
    write_all(&mut alloc, &first);
    let a = alloc.acquire_blocks();
    assert!(a.len() > 1);
    write_all(&mut alloc, &second);
    let b = alloc.acquire_blocks();

    let mut it = CommandIterator::from_lists(vec![a, Default::default(), b]);
    let all: Vec<Record> = first.into_iter().chain(second).collect();
    read_all(&mut it, &all);
}

#[test]
fn reused_allocator_does_not_replay_acquired_records() {
    let mut alloc = CommandAllocator::new();
    alloc.push(1, &1u64).unwrap();
    let mut old = CommandIterator::new(alloc.acquire_blocks());

    alloc.push(2, &2u64).unwrap();
    let mut new = CommandIterator::new(alloc.acquire_blocks());

    assert_eq!(new.next_tag(), Some(2));
    assert_eq!(new.next_record_pod::<u64>().unwrap(), 2);
    assert_eq!(new.next_tag(), None);

    assert_eq!(old.next_tag(), Some(1));
    assert_eq!(old.next_record_pod::<u64>().unwrap(), 1);
    assert_eq!(old.next_tag(), None);
}
