use proptest::prelude::*;
use voxstream_storage::{CellKind, RunList, VoxelCell};

// Few distinct values so runs actually form.
fn small_values() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u8..4, 0..256)
}

fn nonempty_values() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u8..4, 1..256)
}

fn edits(len: usize) -> impl Strategy<Value = Vec<(usize, u8)>> {
    prop::collection::vec((0..len, 0u8..4), 0..64)
}

fn kind() -> impl Strategy<Value = CellKind> {
    prop::sample::select(CellKind::ALL.to_vec())
}

proptest! {
    #[test]
    fn decompress_inverts_compress(data in small_values()) {
        let list = RunList::compress(&data);
        prop_assert_eq!(list.decompress(), data.clone());
        let mut buf = vec![0u8; data.len()];
        list.decompress_into(&mut buf);
        prop_assert_eq!(buf, data);
    }

    #[test]
    fn compress_is_canonical(data in small_values()) {
        let list = RunList::compress(&data);
        prop_assert!(list.is_canonical());
        prop_assert_eq!(list.len(), data.len());
    }

    // Any sequence of sets keeps maximal runs and the original length,
    // and matches the same writes applied to a plain array.
    #[test]
    fn sets_keep_canonical_form((data, ops) in nonempty_values().prop_flat_map(|d| {
        let len = d.len();
        (Just(d), edits(len))
    })) {
        let mut list = RunList::compress(&data);
        let mut mirror = data.clone();
        for (i, v) in ops {
            list.set(i, v);
            mirror[i] = v;
            prop_assert!(list.is_canonical());
            prop_assert_eq!(list.len(), data.len());
        }
        prop_assert_eq!(list.decompress(), mirror.clone());
        prop_assert_eq!(list, RunList::compress(&mirror));
    }

    #[test]
    fn setting_current_value_keeps_run_count(data in nonempty_values(), pick in any::<prop::sample::Index>()) {
        let mut list = RunList::compress(&data);
        let i = pick.index(data.len());
        let before = list.run_count();
        let v = list.get(i);
        prop_assert!(!list.set(i, v));
        prop_assert_eq!(list.run_count(), before);
    }

    #[test]
    fn binary_form_reloads(data in small_values()) {
        let list = RunList::compress(&data);
        let mut bytes = Vec::new();
        list.write_to(&mut bytes).unwrap();
        prop_assert_eq!(bytes.len(), 4 + list.run_count() * 5);
        let back = RunList::<u8>::read_from(&mut &bytes[..]).unwrap();
        prop_assert_eq!(back, list);
    }

    // Cells compare by kind only: a write that changes just the damage or metadata
    // nibbles is absorbed by the existing run and the stored bits stay as they were.
    #[test]
    fn damage_only_writes_are_absorbed(k in kind(), len in 1usize..64, meta in 0u8..16, damage in 0u8..16, pick in any::<prop::sample::Index>()) {
        let base = VoxelCell::new(k);
        let mut list = RunList::filled(len, base);
        let i = pick.index(len);
        let damaged = VoxelCell::with_bits(k, meta, damage);
        prop_assert!(!list.set(i, damaged));
        prop_assert_eq!(list.run_count(), 1);
        prop_assert!(list.get(i).same_bits(base));
    }
}
