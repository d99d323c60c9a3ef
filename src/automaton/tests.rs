use super::*;
use crate::numbers::{canonical_key, canonicalize, key_digits, MAX_KEY};
use crate::numeric::KeyInterval;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

type Fm = FieldMatcher<String>;

fn traverse(table: &SmallTable<FaState<String>>, val: &[u8]) -> Vec<Arc<Fm>> {
    let mut out = Vec::new();
    traverse_dfa(table, val, &mut out);
    out
}

fn marked(canonical: &[u8]) -> Vec<u8> {
    let mut val = vec![NUMBER_MARKER];
    val.extend_from_slice(canonical);
    val
}

fn field(id: &str) -> Arc<Fm> {
    Arc::new(FieldMatcher::with_match(id.to_string()))
}

fn ids(transitions: &[Arc<Fm>]) -> Vec<String> {
    let mut ids: Vec<String> = transitions
        .iter()
        .flat_map(|fm| fm.matches.iter().cloned())
        .collect();
    ids.sort();
    ids
}

#[test]
fn test_small_table_step() {
    let table = SmallTable::<FaState<String>>::new();
    assert!(table.step(b'a').is_none());
    assert!(table.is_empty());
    assert_eq!(table.run_count(), 1);
}

#[test]
fn test_add_byte_step_coalesces() {
    let s = Arc::new(FaState::<String>::new());
    let mut table = SmallTable::new();
    table.add_byte_step(b'a', s.clone());
    assert_eq!(table.ceilings, vec![b'a' as u16, b'b' as u16, 256]);

    table.add_byte_step(b'b', s.clone());
    assert_eq!(table.ceilings, vec![b'a' as u16, b'c' as u16, 256]);
    assert!(Arc::ptr_eq(table.step(b'b').unwrap(), &s));
    assert!(table.step(b'c').is_none());
}

#[test]
fn test_add_range_steps_split_and_overwrite() {
    let s1 = Arc::new(FaState::<String>::new());
    let s2 = Arc::new(FaState::<String>::new());
    let mut table = SmallTable::new();
    table.add_range_steps(10, 20, s1.clone());
    table.add_byte_step(15, s2.clone());
    assert_eq!(table.ceilings, vec![10, 15, 16, 20, 256]);

    // Overwriting the middle back to s1 collapses to a single run
    table.add_byte_step(15, s1.clone());
    assert_eq!(table.ceilings, vec![10, 20, 256]);

    // A range spanning several runs
    table.add_range_steps(0, 256, s2.clone());
    assert_eq!(table.ceilings, vec![256]);
    for b in 0..=255u8 {
        assert!(Arc::ptr_eq(table.step(b).unwrap(), &s2));
    }
}

#[test]
fn test_unpack() {
    let s1 = Arc::new(FaState::<String>::new());
    let s2 = Arc::new(FaState::<String>::new());
    let mut table = SmallTable::new();
    table.add_range_steps(3, 5, s1.clone());
    table.add_byte_step(0x34, s2.clone());

    let unpacked = table.unpack();
    for (b, slot) in unpacked.iter().enumerate() {
        match b {
            3 | 4 => assert!(Arc::ptr_eq(slot.as_ref().unwrap(), &s1)),
            0x34 => assert!(Arc::ptr_eq(slot.as_ref().unwrap(), &s2)),
            _ => assert!(slot.is_none(), "byte {b}"),
        }
    }
}

#[test]
fn test_pack_unpack_fuzz() {
    let mut rng = StdRng::seed_from_u64(2024);
    let pool: Vec<Arc<FaState<String>>> = (0..4).map(|_| Arc::new(FaState::new())).collect();

    for round in 0..200 {
        let mut table = SmallTable::new();
        let mut model: Vec<Option<usize>> = vec![None; BYTE_CEILING];

        for _ in 0..rng.gen_range(1..30) {
            let which = rng.gen_range(0..pool.len());
            if rng.gen_bool(0.5) {
                let b: u8 = rng.gen();
                table.add_byte_step(b, pool[which].clone());
                model[b as usize] = Some(which);
            } else {
                let floor = rng.gen_range(0..BYTE_CEILING);
                let ceiling = rng.gen_range(floor + 1..=BYTE_CEILING);
                table.add_range_steps(floor, ceiling, pool[which].clone());
                for slot in &mut model[floor..ceiling] {
                    *slot = Some(which);
                }
            }
        }

        let mut repacked = SmallTable::new();
        repacked.pack(&table.unpack());
        assert!(repacked.ceilings.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(repacked.ceilings.last(), Some(&256));

        for b in 0..=255u8 {
            let want = model[b as usize].map(|i| &pool[i]);
            for t in [&table, &repacked] {
                match (t.step(b), want) {
                    (None, None) => {}
                    (Some(got), Some(want)) => assert!(Arc::ptr_eq(got, want), "round {round} byte {b}"),
                    _ => panic!("round {round} byte {b}: mismatch"),
                }
            }
        }
        // Minimal encodings agree
        assert_eq!(repacked.ceilings, table.ceilings, "round {round}");
    }
}

#[test]
fn test_string_fa() {
    let table = make_string_fa(b"abc", field("p"));
    assert_eq!(ids(&traverse(&table, b"abc")), vec!["p"]);
    assert!(traverse(&table, b"abd").is_empty());
    assert!(traverse(&table, b"ab").is_empty());
    assert!(traverse(&table, b"abcd").is_empty());
}

#[test]
fn test_empty_string_fa() {
    let table = make_string_fa(b"", field("p"));
    assert_eq!(ids(&traverse(&table, b"")), vec!["p"]);
    assert!(traverse(&table, b"a").is_empty());
}

#[test]
fn test_merge_fas() {
    let t1 = make_string_fa(b"abc", field("abc"));
    let t2 = make_string_fa(b"abd", field("abd"));
    let t3 = make_string_fa(b"ab", field("ab"));
    let merged = merge_fas(&merge_fas(&t1, &t2), &t3);

    assert_eq!(ids(&traverse(&merged, b"abc")), vec!["abc"]);
    assert_eq!(ids(&traverse(&merged, b"abd")), vec!["abd"]);
    assert_eq!(ids(&traverse(&merged, b"ab")), vec!["ab"]);
    assert!(traverse(&merged, b"a").is_empty());
    assert!(traverse(&merged, b"abe").is_empty());
}

#[test]
fn test_merge_same_value_unions_terminals() {
    let t1 = make_string_fa(b"x", field("one"));
    let t2 = make_string_fa(b"x", field("two"));
    let merged = merge_fas(&t1, &t2);
    assert_eq!(ids(&traverse(&merged, b"x")), vec!["one", "two"]);
}

#[test]
fn test_merge_shares_one_sided_structure() {
    let t1 = make_string_fa(b"abc", field("abc"));
    let t2 = make_string_fa(b"xyz", field("xyz"));
    let merged = merge_fas(&t1, &t2);

    assert!(Arc::ptr_eq(merged.step(b'a').unwrap(), t1.step(b'a').unwrap()));
    assert!(Arc::ptr_eq(merged.step(b'x').unwrap(), t2.step(b'x').unwrap()));

    // Merging a table with itself changes nothing
    let same = merge_fas(&t1, &t1);
    assert!(Arc::ptr_eq(same.step(b'a').unwrap(), t1.step(b'a').unwrap()));
}

#[test]
fn test_merge_memo_reuses_pairs() {
    // Both sides reach the same pair of states through every digit
    let a = Arc::new(FaState::with_table(make_string_fa(b"q", field("a"))));
    let b = Arc::new(FaState::with_table(make_string_fa(b"q", field("b"))));
    let mut t1 = SmallTable::new();
    t1.add_range_steps(b'0' as usize, b'9' as usize + 1, a);
    let mut t2 = SmallTable::new();
    t2.add_range_steps(b'0' as usize, b'9' as usize + 1, b);

    let mut memo = MergeMemo::default();
    let merged = merge_fas_with(&t1, &t2, &mut memo);
    // One pair at the digit level, one below it, one for the terminals
    assert_eq!(memo.len(), 3);
    assert_eq!(merged.run_count(), 3);
    assert!(Arc::ptr_eq(merged.step(b'0').unwrap(), merged.step(b'9').unwrap()));
    assert_eq!(ids(&traverse(&merged, b"7q")), vec!["a", "b"]);
}

#[test]
fn test_number_fa_disjoint_from_text() {
    let canonical = canonicalize(b"35").unwrap();
    let table = make_number_fa(&canonical, field("n"));
    assert_eq!(ids(&traverse(&table, &marked(canonical.as_bytes()))), vec!["n"]);
    assert!(traverse(&table, canonical.as_bytes()).is_empty());
}

#[test]
fn test_numeric_range_fa() {
    let lo = canonical_key(b"10").unwrap();
    let hi = canonical_key(b"20").unwrap();
    let table = make_numeric_range_fa(&[KeyInterval::new(lo, hi)], field("r"));

    for (n, want) in [("10", true), ("15.5", true), ("20", true), ("9.999", false), ("20.001", false), ("-15", false)] {
        let c = canonicalize(n.as_bytes()).unwrap();
        assert_eq!(!traverse(&table, &marked(c.as_bytes())).is_empty(), want, "{n}");
    }
}

#[test]
fn test_numeric_range_fa_bounds_cross_after_split() {
    // -5 and 0.5 differ early; afterwards the lower bound's digits exceed
    // the upper bound's
    let lo = canonical_key(b"-5").unwrap() + 1;
    let hi = canonical_key(b"0.5").unwrap() - 1;
    let (lo_digits, hi_digits) = (key_digits(lo), key_digits(hi));
    let split = lo_digits.iter().zip(hi_digits.iter()).position(|(l, h)| l != h).unwrap();
    assert!(lo_digits[split + 1..].iter().zip(hi_digits[split + 1..].iter()).any(|(l, h)| l > h));

    let table = make_numeric_range_fa(&[KeyInterval::new(lo, hi)], field("r"));
    for (n, want) in [("-5", false), ("-4.999", true), ("0", true), ("0.499", true), ("0.5", false), ("7", false)] {
        let c = canonicalize(n.as_bytes()).unwrap();
        assert_eq!(!traverse(&table, &marked(c.as_bytes())).is_empty(), want, "{n}");
    }
}

#[test]
fn test_numeric_range_fa_empty() {
    let table = make_numeric_range_fa::<String>(&[], field("r"));
    assert!(table.is_empty());
}

#[test]
fn test_numeric_range_fa_random_intervals() {
    let mut rng = StdRng::seed_from_u64(99);
    for round in 0..100 {
        let mut bounds: Vec<u64> = (0..4).map(|_| rng.gen_range(0..=MAX_KEY)).collect();
        bounds.sort();
        let intervals = [KeyInterval::new(bounds[0], bounds[1]), KeyInterval::new(bounds[2], bounds[3])];
        let table = make_numeric_range_fa(&intervals, field("r"));

        let mut samples: Vec<u64> = bounds
            .iter()
            .flat_map(|&b| [b.saturating_sub(1), b, b.saturating_add(1).min(MAX_KEY)])
            .collect();
        samples.extend((0..20).map(|_| rng.gen_range(0..=MAX_KEY)));

        for key in samples {
            let want = intervals.iter().any(|i| i.contains(key));
            let got = !traverse(&table, &marked(&key_digits(key))).is_empty();
            assert_eq!(got, want, "round {round} key {key} intervals {intervals:?}");
        }
    }
}

#[test]
fn test_merge_range_with_literal_number() {
    let lo = canonical_key(b"10").unwrap();
    let hi = canonical_key(b"20").unwrap();
    let range = make_numeric_range_fa(&[KeyInterval::new(lo, hi)], field("range"));
    let fifty = make_number_fa(&canonicalize(b"50").unwrap(), field("fifty"));
    let fifteen = make_number_fa(&canonicalize(b"15").unwrap(), field("fifteen"));
    let merged = merge_fas(&merge_fas(&range, &fifty), &fifteen);

    let lookup = |n: &[u8]| ids(&traverse(&merged, &marked(canonicalize(n).unwrap().as_bytes())));
    assert_eq!(lookup(b"12"), vec!["range"]);
    assert_eq!(lookup(b"15"), vec!["fifteen", "range"]);
    assert_eq!(lookup(b"50"), vec!["fifty"]);
    assert!(lookup(b"30").is_empty());
}

#[test]
fn test_value_matcher_canonicalizes_numbers() {
    let canonical = canonicalize(b"35").unwrap();
    let mut vm = ValueMatcher::from_table(make_number_fa(&canonical, field("n")), true);
    vm.start_table = merge_fas(&vm.start_table, &make_string_fa(b"\"x\"", field("x")));

    let mut out = Vec::new();
    vm.transition_on(b"3.5e1", &mut out);
    assert_eq!(ids(&out), vec!["n"]);

    out.clear();
    vm.transition_on(b"\"x\"", &mut out);
    assert_eq!(ids(&out), vec!["x"]);

    out.clear();
    vm.transition_on(b"\"35\"", &mut out);
    assert!(out.is_empty());
}

#[test]
fn test_value_matcher_predicates() {
    let predicate: crate::Predicate = Arc::new(|val: &[u8]| val.starts_with(b"\"t"));
    let vm = ValueMatcher::from_predicate(predicate, field("t"));

    let mut out = Vec::new();
    vm.transition_on(b"\"tacos\"", &mut out);
    assert_eq!(ids(&out), vec!["t"]);

    out.clear();
    vm.transition_on(b"\"nachos\"", &mut out);
    assert!(out.is_empty());
}

#[test]
fn test_merge_field_matchers() {
    let vm_a = ValueMatcher::from_table(make_string_fa(b"1", field("a")), false);
    let vm_b = ValueMatcher::from_table(make_string_fa(b"2", field("b")), false);
    let vm_c = ValueMatcher::from_table(make_string_fa(b"3", field("c")), false);

    let fa = Arc::new(FieldMatcher::with_transition("x".into(), vm_a));
    let fb = Arc::new(FieldMatcher::with_transition("x".into(), vm_b));
    let fc = Arc::new(FieldMatcher::with_transition("y".into(), vm_c));

    let mut memo = MergeMemo::default();
    let merged = merge_field_matchers(&fa, &fb, &mut memo);
    let merged = merge_field_matchers(&merged, &fc, &mut memo);
    assert_eq!(merged.transitions.len(), 2);
    // One-sided paths are shared
    assert!(Arc::ptr_eq(&merged.transitions["y"], &fc.transitions["y"]));

    let lookup = |path: &str, val: &[u8]| {
        let mut out = Vec::new();
        merged.transition_on(path, val, &mut out);
        ids(&out)
    };
    assert_eq!(lookup("x", b"1"), vec!["a"]);
    assert_eq!(lookup("x", b"2"), vec!["b"]);
    assert_eq!(lookup("y", b"3"), vec!["c"]);
    assert!(lookup("y", b"1").is_empty());
    assert!(lookup("z", b"1").is_empty());
}

#[test]
fn test_merge_field_matchers_unions_matches() {
    let a = field("a");
    let b = field("b");
    let mut memo = MergeMemo::default();
    let merged = merge_field_matchers(&a, &b, &mut memo);
    assert_eq!(merged.matches, vec!["a".to_string(), "b".to_string()]);

    let again = merge_field_matchers(&merged, &a, &mut memo);
    assert_eq!(again.matches.len(), 2);
}
