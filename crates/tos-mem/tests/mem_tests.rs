//! Memory engine integration tests
//!
//! Placement under each policy, fragmentation and compaction, swap
//! round-trips, address translation and record round-trips.

use tos_core::Pid;
use tos_mem::{
    FitPolicy, MemEngine, MemEvent, MemPolicy, MemProcessSpec, Residence, SegmentSpec,
};

fn proc_spec(name: &str, arrival: u64, size: usize) -> MemProcessSpec {
    MemProcessSpec {
        name: name.to_string(),
        arrival,
        size,
        ..Default::default()
    }
}

fn base_of(engine: &MemEngine, pid: Pid, component: u32) -> Option<usize> {
    engine
        .process(pid)?
        .components
        .iter()
        .find(|c| c.index == component)?
        .base()
}

// ============================================================================
// Fixed partitions
// ============================================================================

#[test]
fn test_fixed_first_fit_takes_address_order() {
    // partitions of 10, 5 and 20 bytes above the 10-byte OS block
    let mut engine = MemEngine::new(
        MemPolicy::Fixed {
            fit: FitPolicy::FirstFit,
        },
        100,
        10,
    )
    .unwrap();
    engine.add_partition(10).unwrap();
    engine.add_partition(5).unwrap();
    engine.add_partition(20).unwrap();

    let p1 = engine.add_process(proc_spec("p1", 0, 4)).unwrap();
    engine.forward_time();

    // first sufficient partition in address order, not the tightest
    assert_eq!(base_of(&engine, p1, 0), Some(10));
}

#[test]
fn test_fixed_best_fit_takes_tightest() {
    let mut engine = MemEngine::new(
        MemPolicy::Fixed {
            fit: FitPolicy::BestFit,
        },
        100,
        10,
    )
    .unwrap();
    engine.add_partition(10).unwrap();
    engine.add_partition(5).unwrap();
    engine.add_partition(20).unwrap();

    let p1 = engine.add_process(proc_spec("p1", 0, 4)).unwrap();
    engine.forward_time();
    assert_eq!(base_of(&engine, p1, 0), Some(20));
}

#[test]
fn test_fixed_overflow_reported_once() {
    let mut engine = MemEngine::new(
        MemPolicy::Fixed {
            fit: FitPolicy::FirstFit,
        },
        100,
        10,
    )
    .unwrap();
    engine.add_partition(10).unwrap();
    let p1 = engine.add_process(proc_spec("big", 0, 25)).unwrap();

    for _ in 0..4 {
        assert!(!engine.forward_time());
    }
    let failures = engine
        .log()
        .events()
        .iter()
        .filter(|e| e.detail == MemEvent::AllocationFailed { pid: p1 })
        .count();
    assert_eq!(failures, 1);
}

#[test]
fn test_partitions_only_under_fixed() {
    let mut engine = MemEngine::new(
        MemPolicy::Variable {
            fit: FitPolicy::FirstFit,
        },
        100,
        10,
    )
    .unwrap();
    assert!(engine.add_partition(10).is_err());
}

// ============================================================================
// Variable partitions
// ============================================================================

#[test]
fn test_variable_split_and_reuse() {
    let mut engine = MemEngine::new(
        MemPolicy::Variable {
            fit: FitPolicy::FirstFit,
        },
        100,
        10,
    )
    .unwrap();
    let p1 = engine.add_process(proc_spec("a", 0, 20)).unwrap();
    let p2 = engine.add_process(proc_spec("b", 0, 30)).unwrap();
    let p3 = engine.add_process(proc_spec("c", 0, 10)).unwrap();
    engine.forward_time();

    assert_eq!(base_of(&engine, p1, 0), Some(10));
    assert_eq!(base_of(&engine, p2, 0), Some(30));
    assert_eq!(base_of(&engine, p3, 0), Some(60));

    // freeing the middle allocation leaves a hole that first-fit reuses
    engine.remove_process(p2).unwrap();
    assert_eq!(engine.usage().free_fragments, 2);

    let p4 = engine.add_process(proc_spec("d", 0, 25)).unwrap();
    engine.forward_time();
    assert_eq!(base_of(&engine, p4, 0), Some(30));
}

#[test]
fn test_coalescing_merges_neighbors() {
    let mut engine = MemEngine::new(
        MemPolicy::Variable {
            fit: FitPolicy::FirstFit,
        },
        100,
        10,
    )
    .unwrap();
    let p1 = engine.add_process(proc_spec("a", 0, 20)).unwrap();
    let p2 = engine.add_process(proc_spec("b", 0, 30)).unwrap();
    engine.forward_time();

    engine.remove_process(p1).unwrap();
    engine.remove_process(p2).unwrap();
    // both holes and the tail merge into one region
    assert_eq!(engine.usage().free_fragments, 1);
    assert_eq!(engine.usage().free_bytes, 90);
}

#[test]
fn test_compaction_packs_downwards() {
    let mut engine = MemEngine::new(
        MemPolicy::Variable {
            fit: FitPolicy::FirstFit,
        },
        100,
        10,
    )
    .unwrap();
    let p1 = engine.add_process(proc_spec("a", 0, 20)).unwrap();
    let p2 = engine.add_process(proc_spec("b", 0, 30)).unwrap();
    let p3 = engine.add_process(proc_spec("c", 0, 10)).unwrap();
    engine.forward_time();
    engine.remove_process(p2).unwrap();

    let free_before = engine.usage().free_bytes;
    assert_eq!(engine.usage().free_fragments, 2);

    engine.compaction().unwrap();

    // occupied regions contiguous above the OS block, one free region,
    // total free space preserved
    assert_eq!(base_of(&engine, p1, 0), Some(10));
    assert_eq!(base_of(&engine, p3, 0), Some(30));
    assert_eq!(engine.usage().free_fragments, 1);
    assert_eq!(engine.usage().free_bytes, free_before);
    let kinds: Vec<bool> = engine.regions().iter().map(|r| r.is_free()).collect();
    assert_eq!(kinds, vec![false, false, false, true]);
}

#[test]
fn test_worst_fit_prefers_biggest_hole() {
    let mut engine = MemEngine::new(
        MemPolicy::Variable {
            fit: FitPolicy::WorstFit,
        },
        100,
        10,
    )
    .unwrap();
    let p1 = engine.add_process(proc_spec("a", 0, 20)).unwrap();
    let p2 = engine.add_process(proc_spec("b", 0, 30)).unwrap();
    engine.forward_time();
    // holes: none yet; free tail [60,100). drop p1 -> hole [10,30)
    engine.remove_process(p1).unwrap();
    let _ = p2;

    let p3 = engine.add_process(proc_spec("c", 0, 10)).unwrap();
    engine.forward_time();
    // worst fit takes the 40-byte tail, not the 20-byte hole
    assert_eq!(base_of(&engine, p3, 0), Some(60));
}

// ============================================================================
// Paging
// ============================================================================

#[test]
fn test_paged_decomposition_and_fragmentation() {
    let mut engine = MemEngine::new(MemPolicy::Paged { page_size: 8 }, 64, 8).unwrap();
    let p1 = engine.add_process(proc_spec("p", 0, 20)).unwrap();
    engine.forward_time();

    let proc = engine.process(p1).unwrap();
    assert_eq!(proc.components.len(), 3);
    assert_eq!(proc.components[2].size, 4);
    assert_eq!(base_of(&engine, p1, 0), Some(8));
    assert_eq!(base_of(&engine, p1, 1), Some(16));
    assert_eq!(base_of(&engine, p1, 2), Some(24));
    // only the partial last page wastes frame space
    assert_eq!(engine.usage().internal_fragmentation, 4);
}

#[test]
fn test_paged_translation() {
    let mut engine = MemEngine::new(MemPolicy::Paged { page_size: 8 }, 64, 8).unwrap();
    let p1 = engine.add_process(proc_spec("p", 0, 20)).unwrap();
    engine.forward_time();

    // page 2, offset 1
    assert_eq!(engine.translate(p1, 17), Ok(24 + 1));
    // beyond the declared size is a fault even inside the last frame
    assert!(engine.translate(p1, 20).is_err());

    engine.swap_out(p1, 1).unwrap();
    assert!(engine.translate(p1, 8).is_err());
    // other pages still translate
    assert_eq!(engine.translate(p1, 3), Ok(8 + 3));
}

// ============================================================================
// Segmentation
// ============================================================================

fn segmented_engine() -> (MemEngine, Pid) {
    let mut engine = MemEngine::new(
        MemPolicy::Segmented {
            fit: FitPolicy::FirstFit,
        },
        100,
        10,
    )
    .unwrap();
    let pid = engine
        .add_process(MemProcessSpec {
            size: 30,
            segments: vec![
                SegmentSpec {
                    name: "code".to_string(),
                    size: 10,
                },
                SegmentSpec {
                    name: "data".to_string(),
                    size: 12,
                },
                SegmentSpec {
                    name: "stack".to_string(),
                    size: 8,
                },
            ],
            ..proc_spec("seg", 0, 30)
        })
        .unwrap();
    engine.forward_time();
    (engine, pid)
}

#[test]
fn test_segmented_placement_and_translation() {
    let (engine, pid) = segmented_engine();
    assert_eq!(base_of(&engine, pid, 0), Some(10));
    assert_eq!(base_of(&engine, pid, 1), Some(20));
    assert_eq!(base_of(&engine, pid, 2), Some(32));

    assert_eq!(engine.translate_segment(pid, 1, 5), Ok(25));
    // offsets are bounds-checked against the segment, not the process
    assert!(engine.translate_segment(pid, 1, 12).is_err());
    assert!(engine.translate_segment(pid, 9, 0).is_err());
    // linear addressing does not apply to segmented processes
    assert!(engine.translate(pid, 5).is_err());
}

#[test]
fn test_segment_sizes_must_sum() {
    let mut engine = MemEngine::new(
        MemPolicy::Segmented {
            fit: FitPolicy::FirstFit,
        },
        100,
        10,
    )
    .unwrap();
    let bad = engine.add_process(MemProcessSpec {
        size: 30,
        segments: vec![SegmentSpec {
            name: "only".to_string(),
            size: 12,
        }],
        ..proc_spec("bad", 0, 30)
    });
    assert!(bad.is_err());
}

// ============================================================================
// Swap
// ============================================================================

#[test]
fn test_swap_round_trip_restores_layout() {
    let mut engine = MemEngine::new(
        MemPolicy::Variable {
            fit: FitPolicy::FirstFit,
        },
        100,
        10,
    )
    .unwrap();
    let p1 = engine.add_process(proc_spec("a", 0, 20)).unwrap();
    engine.forward_time();
    let before = engine.usage();

    engine.swap_out(p1, 0).unwrap();
    assert_eq!(
        engine.process(p1).unwrap().components[0].residence,
        Residence::Swapped
    );
    assert_eq!(engine.backing_ids().len(), 1);
    assert_eq!(engine.usage().swapped_components, 1);

    engine.swap_in(p1, 0).unwrap();
    assert!(engine.backing_ids().is_empty());
    // layout is functionally equivalent: same amount used and free
    assert_eq!(engine.usage(), before);
}

#[test]
fn test_swap_in_failure_reported_once() {
    let mut engine = MemEngine::new(
        MemPolicy::Variable {
            fit: FitPolicy::FirstFit,
        },
        40,
        10,
    )
    .unwrap();
    let p1 = engine.add_process(proc_spec("a", 0, 20)).unwrap();
    engine.add_process(proc_spec("b", 0, 10)).unwrap();
    engine.forward_time();

    engine.swap_out(p1, 0).unwrap();
    // the vacated space is taken before the swap-in
    let p3 = engine.add_process(proc_spec("c", 0, 20)).unwrap();
    engine.forward_time();
    assert!(engine.process(p3).unwrap().is_fully_resident());

    assert!(engine.swap_in(p1, 0).unwrap_err().is_no_fit());
    assert!(engine.swap_in(p1, 0).unwrap_err().is_no_fit());
    let failures = engine
        .log()
        .events()
        .iter()
        .filter(|e| matches!(e.detail, MemEvent::SwapInFailed { who } if who.pid == p1))
        .count();
    assert_eq!(failures, 1);

    // space opens up again and the swap-in succeeds
    engine.remove_process(p3).unwrap();
    assert!(engine.swap_in(p1, 0).is_ok());
}

// ============================================================================
// Gating, rewind, persistence
// ============================================================================

#[test]
fn test_commands_gated_after_start() {
    let mut engine = MemEngine::new(
        MemPolicy::Fixed {
            fit: FitPolicy::FirstFit,
        },
        100,
        10,
    )
    .unwrap();
    engine.add_partition(20).unwrap();
    let p1 = engine.add_process(proc_spec("a", 0, 10)).unwrap();
    engine.forward_time();

    assert!(engine
        .set_policy(MemPolicy::Paged { page_size: 8 })
        .is_err());
    assert!(engine.add_partition(10).is_err());
    assert!(engine.update_process(p1, proc_spec("a2", 0, 12)).is_err());
    // explicit removal stays available during a run
    assert!(engine.remove_process(p1).is_ok());
}

#[test]
fn test_rewind_restores_start_state() {
    let mut engine = MemEngine::new(
        MemPolicy::Variable {
            fit: FitPolicy::FirstFit,
        },
        100,
        10,
    )
    .unwrap();
    let p1 = engine.add_process(proc_spec("a", 1, 20)).unwrap();
    let before = engine.to_record().unwrap();

    engine.forward_time();
    engine.forward_time();
    assert!(engine.process(p1).unwrap().is_fully_resident());

    assert!(engine.rewind());
    assert_eq!(engine.to_record().unwrap(), before);
    assert_eq!(
        engine.process(p1).unwrap().components[0].residence,
        Residence::Waiting
    );
    assert!(!engine.is_started());
}

#[test]
fn test_record_round_trip_preserves_state() {
    let mut engine = MemEngine::new(MemPolicy::Paged { page_size: 8 }, 64, 8).unwrap();
    let p1 = engine.add_process(proc_spec("p", 0, 20)).unwrap();
    engine.forward_time();
    engine.swap_out(p1, 1).unwrap();

    let record = engine.to_record().unwrap();
    let rebuilt = MemEngine::from_record(record.clone()).unwrap();
    assert_eq!(rebuilt.to_record().unwrap(), record);
    assert_eq!(rebuilt.backing_ids(), engine.backing_ids());
    assert_eq!(rebuilt.usage(), engine.usage());
}

#[test]
fn test_corrupt_record_rejected_whole() {
    let mut engine = MemEngine::new(
        MemPolicy::Variable {
            fit: FitPolicy::FirstFit,
        },
        100,
        10,
    )
    .unwrap();
    engine.add_process(proc_spec("a", 0, 20)).unwrap();
    engine.forward_time();

    // structurally broken
    assert!(MemEngine::from_record(serde_json::json!({ "clock": [] }))
        .unwrap_err()
        .is_malformed());

    // decodes, but the region table no longer covers memory
    let mut record = engine.to_record().unwrap();
    record["memory_size"] = serde_json::json!(200);
    let err = MemEngine::from_record(record).unwrap_err();
    assert!(!err.is_malformed());
}
