use crate::{MemDevice, SectorAdapter, SECTOR_SIZE};
use proptest::prelude::*;
use proptest::test_runner::TestCaseResult;

#[derive(Debug, Clone)]
enum Op {
    Write { offset: u32, data: Vec<u8> },
    Read { offset: u32, len: usize },
}

const MAX_DISK_SECTORS: u32 = 64;
const MAX_OPS: usize = 48;
const MAX_RW_LEN: usize = 4 * SECTOR_SIZE + 37;

const SECTOR_SIZE_U32: u32 = SECTOR_SIZE as u32;

fn offset_strategy(disk_size: u32) -> BoxedStrategy<u32> {
    // Reads may start past the end; writes are filtered separately.
    let max_offset = disk_size + SECTOR_SIZE_U32;

    let any = 0u32..=max_offset;
    let sector_aligned =
        (0u32..=max_offset / SECTOR_SIZE_U32).prop_map(|lba| lba * SECTOR_SIZE_U32);
    let sector_boundary_plus_delta = (0u32..=max_offset / SECTOR_SIZE_U32, 0u32..SECTOR_SIZE_U32)
        .prop_map(move |(lba, delta)| (lba * SECTOR_SIZE_U32 + delta).min(max_offset));
    let near_end =
        (0u32..=SECTOR_SIZE_U32).prop_map(move |delta| disk_size.saturating_sub(delta));

    prop_oneof![
        4 => any,
        2 => sector_aligned,
        3 => sector_boundary_plus_delta,
        1 => near_end,
    ]
    .boxed()
}

fn op_strategy(disk_size: u32) -> BoxedStrategy<Op> {
    let write = (
        offset_strategy(disk_size),
        prop::collection::vec(any::<u8>(), 0..=MAX_RW_LEN),
    )
        .prop_map(|(offset, data)| Op::Write { offset, data });
    let read = (offset_strategy(disk_size), 0usize..=MAX_RW_LEN)
        .prop_map(|(offset, len)| Op::Read { offset, len });
    prop_oneof![
        5 => write,
        4 => read,
    ]
    .boxed()
}

fn scenario_strategy() -> BoxedStrategy<(u32, Vec<Op>)> {
    (1u32..=MAX_DISK_SECTORS)
        .prop_map(|sectors| sectors * SECTOR_SIZE_U32)
        .prop_flat_map(|disk_size| {
            (
                Just(disk_size),
                prop::collection::vec(op_strategy(disk_size), 1..=MAX_OPS),
            )
        })
        .boxed()
}

fn run_against_model(disk_size: u32, ops: Vec<Op>) -> TestCaseResult {
    let adapter =
        SectorAdapter::open(MemDevice::new(u64::from(disk_size / SECTOR_SIZE_U32)).unwrap())
            .unwrap();
    let mut model = vec![0u8; disk_size as usize];

    for op in ops {
        match op {
            Op::Write { offset, data } => {
                let end = offset as usize + data.len();
                let result = adapter.write_at(u64::from(offset), &data);
                if end > model.len() {
                    let err = result.unwrap_err();
                    prop_assert_eq!(err.transferred, 0);
                    prop_assert!(matches!(err.error, crate::DiskError::ShortWrite));
                } else {
                    prop_assert_eq!(result.unwrap(), data.len());
                    model[offset as usize..end].copy_from_slice(&data);
                }
            }
            Op::Read { offset, len } => {
                let mut buf = vec![0xEEu8; len];
                let result = adapter.read_at(u64::from(offset), &mut buf);
                if offset >= disk_size {
                    let err = result.unwrap_err();
                    prop_assert!(err.is_end_of_stream());
                    prop_assert_eq!(err.transferred, 0);
                    prop_assert!(buf.iter().all(|b| *b == 0xEE));
                } else {
                    let expected = len.min((disk_size - offset) as usize);
                    prop_assert_eq!(result.unwrap(), expected);
                    let start = offset as usize;
                    prop_assert_eq!(&buf[..expected], &model[start..start + expected]);
                    prop_assert!(buf[expected..].iter().all(|b| *b == 0xEE));
                }
            }
        }
    }

    prop_assert_eq!(adapter.device().snapshot(), model);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn adapter_matches_flat_model((disk_size, ops) in scenario_strategy()) {
        run_against_model(disk_size, ops)?;
    }

    #[test]
    fn aligned_write_then_read_roundtrips(
        start in 0u64..32,
        sectors in 1usize..=8,
        fill in any::<u8>(),
    ) {
        let adapter = SectorAdapter::open(MemDevice::new(40).unwrap()).unwrap();
        let data = vec![fill; sectors * SECTOR_SIZE];
        let offset = start * SECTOR_SIZE as u64;
        prop_assert_eq!(adapter.write_at(offset, &data).unwrap(), data.len());

        let mut back = vec![0u8; data.len()];
        prop_assert_eq!(adapter.read_at(offset, &mut back).unwrap(), data.len());
        prop_assert_eq!(back, data);
    }

    #[test]
    fn unaligned_write_preserves_rest_of_sector(
        sector in 0u64..4,
        within in 1usize..SECTOR_SIZE,
        len in 1usize..SECTOR_SIZE,
    ) {
        let len = len.min(SECTOR_SIZE - within);
        let background: Vec<u8> = (0..4 * SECTOR_SIZE).map(|i| (i % 253) as u8).collect();
        let adapter =
            SectorAdapter::open(MemDevice::from_bytes(background.clone()).unwrap()).unwrap();

        let sector_start = sector * SECTOR_SIZE as u64;
        let mut before = vec![0u8; SECTOR_SIZE];
        adapter.read_at(sector_start, &mut before).unwrap();

        let payload = vec![0xFFu8; len];
        adapter.write_at(sector_start + within as u64, &payload).unwrap();

        let mut after = vec![0u8; SECTOR_SIZE];
        adapter.read_at(sector_start, &mut after).unwrap();

        for i in 0..SECTOR_SIZE {
            if (within..within + len).contains(&i) {
                prop_assert_eq!(after[i], 0xFF);
            } else {
                prop_assert_eq!(after[i], before[i]);
            }
        }
    }
}
