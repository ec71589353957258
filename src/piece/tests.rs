use super::*;
use crate::pool::PeerId;
use bytes::BytesMut;

#[test]
fn test_insert_remove_contains() {
    let mut set = PieceIndexSet::new();
    assert!(set.is_empty());

    assert!(set.insert(3));
    assert!(!set.insert(3));
    assert!(set.insert(200));
    assert_eq!(set.len(), 2);
    assert!(set.contains(3));
    assert!(set.contains(200));
    assert!(!set.contains(4));

    assert!(set.remove(3));
    assert!(!set.remove(3));
    assert_eq!(set.len(), 1);
    assert!(!set.contains(3));
}

#[test]
fn test_len_tracks_net_insertions() {
    let mut set = PieceIndexSet::new();
    for i in 0..100 {
        set.insert(i);
    }
    for i in (0..100).step_by(2) {
        set.remove(i);
    }
    set.insert(4);
    assert_eq!(set.len(), 51);
    assert!(set.contains(4));
    assert!(!set.contains(6));
}

#[test]
fn test_and_or_bounds() {
    let a: PieceIndexSet = [1u32, 5, 9, 70].into_iter().collect();
    let b: PieceIndexSet = [5u32, 9, 11].into_iter().collect();

    let both = a.and(&b);
    assert!(both.len() <= a.len().min(b.len()));
    assert!(both.contains(5) && both.contains(9));
    assert!(!both.contains(1) && !both.contains(11));

    let either = a.or(&b);
    assert!(either.len() >= a.len().max(b.len()));
    assert_eq!(either.len(), 5);
}

#[test]
fn test_not_complement_is_disjoint() {
    let a: PieceIndexSet = [0u32, 2, 4].into_iter().collect();
    let complement = a.not(8);
    assert_eq!(complement.len(), 5);
    assert!(complement.and(&a).is_empty());
}

#[test]
fn test_not_beyond_capacity_appears_in_complement() {
    // A fresh empty set has no allocated words, so every index of the
    // requested range counts as absent.
    let empty = PieceIndexSet::new();
    let complement = empty.not(130);
    assert_eq!(complement.len(), 130);
    assert!(complement.contains(129));
}

#[test]
fn test_remove_first_takes_smallest() {
    let mut set: PieceIndexSet = (0u32..10).collect();
    let taken = set.remove_first(0.5);

    assert_eq!(taken.len(), 5);
    assert_eq!(set.len(), 5);
    for t in taken.iter() {
        for r in set.iter() {
            assert!(t < r);
        }
    }
}

#[test]
fn test_remove_first_rounds_down() {
    let mut set: PieceIndexSet = (0u32..7).collect();
    let taken = set.remove_first(0.5);
    assert_eq!(taken.len(), 3);
    assert_eq!(set.len(), 4);

    let none = set.remove_first(0.0);
    assert!(none.is_empty());
    assert_eq!(set.len(), 4);
}

// Known quirk: comparison is truncated to the shorter set's internal
// capacity, so a populated set can compare equal to a small empty one.
// Callers only compare sets built over the same piece range.
#[test]
fn test_eq_ignores_bits_beyond_shorter_capacity() {
    let small = PieceIndexSet::new();
    let mut large = PieceIndexSet::new();
    large.insert(500);
    assert_eq!(large, small);

    let mut other = PieceIndexSet::with_capacity(512);
    assert_eq!(large, large.clone());
    other.insert(500);
    other.remove(500);
    assert_ne!(large, other);
}

#[test]
fn test_wire_round_trip() {
    let set: PieceIndexSet = [0u32, 7, 8, 63, 64, 129].into_iter().collect();
    let mut buf = BytesMut::new();
    set.write_to(&mut buf);
    assert_eq!(buf.len(), set.wire_len());

    let mut bytes = buf.freeze();
    let decoded = PieceIndexSet::read_from(&mut bytes).unwrap();
    assert_eq!(decoded.len(), set.len());
    for i in set.iter() {
        assert!(decoded.contains(i));
    }
}

#[test]
fn test_wire_empty_set() {
    let set = PieceIndexSet::new();
    let mut buf = BytesMut::new();
    set.write_to(&mut buf);
    assert_eq!(buf.len(), 4);

    let decoded = PieceIndexSet::read_from(&mut buf.freeze()).unwrap();
    assert!(decoded.is_empty());
}

fn peer(name: &str) -> PeerId {
    PeerId::from(name)
}

#[test]
fn test_tell_have_classifies_and_reports_new_interest() {
    let gold: PieceIndexSet = [0u32, 1].into_iter().collect();
    let silver: PieceIndexSet = [2u32, 3].into_iter().collect();
    let mut interest = PieceInterest::new(gold, silver);

    let advertised: PieceIndexSet = [1u32, 3, 9].into_iter().collect();
    assert!(interest.tell_have(&peer("a"), &advertised, false));
    // Already interested, so a second advertisement does not re-trigger.
    assert!(!interest.tell_have_one(&peer("a"), 0, false));
    assert_eq!(interest.wants_from(&peer("a")), 3);

    // Piece 9 is neither gold nor silver and is not recorded.
    let unwanted: PieceIndexSet = [9u32].into_iter().collect();
    assert!(!interest.tell_have(&peer("b"), &unwanted, false));
}

#[test]
fn test_want_only_gold_skips_silver() {
    let gold: PieceIndexSet = [0u32].into_iter().collect();
    let silver: PieceIndexSet = [1u32, 2].into_iter().collect();
    let mut interest = PieceInterest::new(gold, silver);

    let advertised: PieceIndexSet = [1u32, 2].into_iter().collect();
    assert!(!interest.tell_have(&peer("remote"), &advertised, true));
    assert_eq!(interest.wants_from(&peer("remote")), 0);

    let advertised: PieceIndexSet = [0u32, 1].into_iter().collect();
    assert!(interest.tell_have(&peer("remote"), &advertised, true));
    assert_eq!(interest.wants_from(&peer("remote")), 1);
}

#[test]
fn test_remove_gold_retires_globally() {
    let gold: PieceIndexSet = [0u32, 1, 2].into_iter().collect();
    let mut interest = PieceInterest::new(gold.clone(), PieceIndexSet::new());
    interest.tell_have(&peer("a"), &gold, false);
    interest.tell_have(&peer("b"), &gold, false);

    let picked = interest.remove_gold(&peer("a"), 2);
    assert_eq!(picked.len(), 2);
    // Retired pieces are gone from every peer's lists, not only a's.
    assert_eq!(interest.wants_from(&peer("a")), 1);
    assert_eq!(interest.wants_from(&peer("b")), 1);

    let rest = interest.remove_gold(&peer("b"), 5);
    assert_eq!(rest.len(), 1);
    assert!(!interest.has_gold());
    assert_eq!(interest.wants_from(&peer("a")), 0);
}

#[test]
fn test_remove_gold_or_silver_prefers_gold() {
    let gold: PieceIndexSet = [0u32].into_iter().collect();
    let silver: PieceIndexSet = [5u32, 6].into_iter().collect();
    let mut interest = PieceInterest::new(gold, silver);

    let advertised: PieceIndexSet = [0u32, 5, 6].into_iter().collect();
    interest.tell_have(&peer("a"), &advertised, false);

    let picked = interest.remove_gold_or_silver(&peer("a"), 2);
    assert_eq!(picked[0], 0);
    assert!(picked[1] == 5 || picked[1] == 6);
    assert_eq!(interest.wants_from(&peer("a")), 1);
}

#[test]
fn test_devaluate_and_revaluate_remap_peer_lists() {
    let gold: PieceIndexSet = [0u32, 1].into_iter().collect();
    let mut interest = PieceInterest::new(gold.clone(), PieceIndexSet::new());
    interest.tell_have(&peer("local"), &gold, false);
    interest.tell_have(&peer("remote"), &gold, true);

    let moved: PieceIndexSet = [0u32].into_iter().collect();
    interest.devaluate(&moved);
    assert!(interest.has_gold());
    // The local peer keeps the edge as silver; the gold-only peer drops it.
    assert_eq!(interest.wants_from(&peer("local")), 2);
    assert_eq!(interest.wants_from(&peer("remote")), 1);
    assert_eq!(interest.remove_gold(&peer("local"), 5), vec![1]);

    interest.revaluate(&moved);
    assert!(interest.has_gold());
    assert_eq!(interest.remove_gold(&peer("local"), 5), vec![0]);
}

#[test]
fn test_devaluate_first_slices_smallest_gold() {
    let gold: PieceIndexSet = (0u32..8).collect();
    let mut interest = PieceInterest::new(gold.clone(), PieceIndexSet::new());
    interest.tell_have(&peer("a"), &gold, false);

    let booty = interest.devaluate_first(0.5);
    assert_eq!(booty.len(), 4);
    assert!(booty.contains(0) && booty.contains(3));
    assert_eq!(interest.gold().len(), 4);
    assert!(interest.gold().contains(4));
    // All eight pieces are still wanted from `a`, four of them now silver.
    assert_eq!(interest.wants_from(&peer("a")), 8);
    let picked = interest.remove_gold(&peer("a"), 8);
    assert_eq!(picked.len(), 4);
}
