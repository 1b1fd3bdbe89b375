//! Scheduling engine integration tests
//!
//! Full forward_time workflows: admission, dispatch, preemption, quantum
//! rotation, IO round trips, periodic re-arrival, rewind and record
//! round-trips.

use tos_core::Pid;
use tos_sched::{
    Burst, ProcState, ProcessSpec, SchedEngine, SchedError, SchedEvent, SchedPolicy,
};

fn spec(name: &str, arrival: u64, bursts: Vec<Burst>) -> ProcessSpec {
    ProcessSpec {
        name: name.to_string(),
        arrival,
        bursts,
        ..Default::default()
    }
}

fn run_to_end(engine: &mut SchedEngine, cap: u32) -> u64 {
    for _ in 0..cap {
        if engine.forward_time() {
            return engine.now();
        }
    }
    panic!("simulation did not end within {} ticks", cap);
}

// ============================================================================
// FCFS
// ============================================================================

#[test]
fn test_fcfs_completes_in_arrival_order() {
    let mut engine = SchedEngine::new(SchedPolicy::Fcfs).unwrap();
    let p1 = engine.add_process(spec("a", 0, vec![Burst::cpu(3)])).unwrap();
    let p2 = engine.add_process(spec("b", 0, vec![Burst::cpu(3)])).unwrap();
    let p3 = engine.add_process(spec("c", 1, vec![Burst::cpu(2)])).unwrap();

    run_to_end(&mut engine, 20);

    // same-arrival tie broken by pid; later arrival last
    assert_eq!(engine.finished_ids(), vec![p1, p2, p3]);
    assert_eq!(engine.process(p1).unwrap().metrics.finished_at, Some(3));
    assert_eq!(engine.process(p2).unwrap().metrics.finished_at, Some(6));
    assert_eq!(engine.process(p3).unwrap().metrics.finished_at, Some(8));
}

#[test]
fn test_fcfs_never_preempts() {
    let mut engine = SchedEngine::new(SchedPolicy::Fcfs).unwrap();
    let p1 = engine.add_process(spec("long", 0, vec![Burst::cpu(9)])).unwrap();
    engine.add_process(spec("short", 1, vec![Burst::cpu(1)])).unwrap();

    for _ in 0..5 {
        engine.forward_time();
    }
    assert_eq!(engine.running(), Some(p1));
    assert_eq!(engine.process(p1).unwrap().metrics.preemptions, 0);
}

// ============================================================================
// Round-Robin
// ============================================================================

#[test]
fn test_round_robin_quantum_trace() {
    // Single CPU-4 process under quantum 2: requeued at tick 2, done at 4.
    let mut engine = SchedEngine::new(SchedPolicy::RoundRobin { quantum: 2 }).unwrap();
    let p1 = engine.add_process(spec("solo", 0, vec![Burst::cpu(4)])).unwrap();

    let end = run_to_end(&mut engine, 10);
    assert_eq!(end, 4);
    assert_eq!(engine.process(p1).unwrap().metrics.finished_at, Some(4));

    let expiries: Vec<u64> = engine
        .log()
        .events()
        .iter()
        .filter(|e| matches!(e.detail, SchedEvent::QuantumExpired { pid } if pid == p1))
        .map(|e| e.tick)
        .collect();
    assert_eq!(expiries, vec![2]);
    // two dispatches: the initial one and the post-expiry one
    assert_eq!(engine.process(p1).unwrap().metrics.dispatches, 2);
}

#[test]
fn test_round_robin_alternates() {
    let mut engine = SchedEngine::new(SchedPolicy::RoundRobin { quantum: 1 }).unwrap();
    let p1 = engine.add_process(spec("a", 0, vec![Burst::cpu(2)])).unwrap();
    let p2 = engine.add_process(spec("b", 0, vec![Burst::cpu(2)])).unwrap();

    run_to_end(&mut engine, 10);

    let dispatched: Vec<Pid> = engine
        .log()
        .events()
        .iter()
        .filter_map(|e| match e.detail {
            SchedEvent::Dispatched { pid } => Some(pid),
            _ => None,
        })
        .collect();
    assert_eq!(dispatched, vec![p1, p2, p1, p2]);
    assert_eq!(engine.process(p1).unwrap().metrics.finished_at, Some(3));
    assert_eq!(engine.process(p2).unwrap().metrics.finished_at, Some(4));
}

// ============================================================================
// SJF / Priority preemption
// ============================================================================

#[test]
fn test_preemptive_sjf_switches_to_shorter() {
    let mut engine = SchedEngine::new(SchedPolicy::Sjf { preemptive: true }).unwrap();
    let p1 = engine.add_process(spec("long", 0, vec![Burst::cpu(8)])).unwrap();
    let p2 = engine.add_process(spec("short", 2, vec![Burst::cpu(3)])).unwrap();

    run_to_end(&mut engine, 20);

    assert_eq!(engine.process(p2).unwrap().metrics.finished_at, Some(5));
    assert_eq!(engine.process(p1).unwrap().metrics.finished_at, Some(11));
    assert_eq!(engine.process(p1).unwrap().metrics.preemptions, 1);
    assert!(engine
        .log()
        .events()
        .iter()
        .any(|e| e.detail == SchedEvent::Preempted { pid: p1, by: p2 } && e.tick == 2));
}

#[test]
fn test_non_preemptive_sjf_waits_for_burst() {
    let mut engine = SchedEngine::new(SchedPolicy::Sjf { preemptive: false }).unwrap();
    let p1 = engine.add_process(spec("first", 0, vec![Burst::cpu(5)])).unwrap();
    let p2 = engine.add_process(spec("short", 1, vec![Burst::cpu(1)])).unwrap();

    run_to_end(&mut engine, 20);
    assert_eq!(engine.process(p1).unwrap().metrics.preemptions, 0);
    // p2 had to wait for the full first burst
    assert_eq!(engine.process(p2).unwrap().metrics.finished_at, Some(6));
}

#[test]
fn test_preemptive_priority_lower_value_wins_cpu() {
    let mut engine = SchedEngine::new(SchedPolicy::Priority { preemptive: true }).unwrap();
    let bg = engine
        .add_process(ProcessSpec {
            priority: 5,
            ..spec("bg", 0, vec![Burst::cpu(6)])
        })
        .unwrap();
    let urgent = engine
        .add_process(ProcessSpec {
            priority: 1,
            ..spec("urgent", 3, vec![Burst::cpu(2)])
        })
        .unwrap();

    for _ in 0..4 {
        engine.forward_time();
    }
    // at tick 3 the urgent process takes the CPU
    assert_eq!(engine.running(), Some(urgent));
    run_to_end(&mut engine, 20);
    assert_eq!(engine.process(urgent).unwrap().metrics.finished_at, Some(5));
    assert_eq!(engine.process(bg).unwrap().metrics.finished_at, Some(8));
}

// ============================================================================
// IO bursts
// ============================================================================

#[test]
fn test_io_round_trip() {
    let mut engine = SchedEngine::new(SchedPolicy::Fcfs).unwrap();
    let p1 = engine
        .add_process(spec("io", 0, vec![Burst::cpu(2), Burst::io(3), Burst::cpu(1)]))
        .unwrap();

    // after the CPU burst drains the process sits on the IO queue
    engine.forward_time();
    engine.forward_time();
    assert_eq!(engine.process(p1).unwrap().state, ProcState::Blocked);
    assert_eq!(engine.blocked_ids(), vec![p1]);
    assert_eq!(engine.running(), None);

    let end = run_to_end(&mut engine, 20);
    assert_eq!(end, 5);
    let metrics = engine.process(p1).unwrap().metrics;
    assert_eq!(metrics.cpu_ticks, 3);
    assert_eq!(metrics.io_ticks, 3);
    assert!(engine
        .log()
        .events()
        .iter()
        .any(|e| e.detail == SchedEvent::IoFinished { pid: p1 }));
}

#[test]
fn test_cpu_free_while_io_in_flight() {
    let mut engine = SchedEngine::new(SchedPolicy::Fcfs).unwrap();
    let io_bound = engine
        .add_process(spec("io", 0, vec![Burst::cpu(1), Burst::io(4), Burst::cpu(1)]))
        .unwrap();
    let cpu_bound = engine.add_process(spec("cpu", 0, vec![Burst::cpu(3)])).unwrap();

    run_to_end(&mut engine, 20);
    // the CPU-bound process ran while the other waited on IO
    assert_eq!(engine.process(cpu_bound).unwrap().metrics.finished_at, Some(4));
    assert_eq!(engine.process(io_bound).unwrap().metrics.finished_at, Some(5));
}

// ============================================================================
// Multiprogramming and periodic processes
// ============================================================================

#[test]
fn test_multiprogramming_off_admits_one_at_a_time() {
    let mut engine = SchedEngine::new(SchedPolicy::Fcfs).unwrap();
    engine.set_multiprogramming(false).unwrap();
    let p1 = engine.add_process(spec("a", 0, vec![Burst::cpu(3)])).unwrap();
    let p2 = engine.add_process(spec("b", 0, vec![Burst::cpu(2)])).unwrap();

    engine.forward_time();
    assert_eq!(engine.running(), Some(p1));
    assert_eq!(engine.process(p2).unwrap().state, ProcState::Arriving);

    run_to_end(&mut engine, 20);
    // p2 was only admitted after p1 fully finished
    assert_eq!(engine.process(p1).unwrap().metrics.finished_at, Some(3));
    assert_eq!(engine.process(p2).unwrap().metrics.finished_at, Some(5));
}

#[test]
fn test_periodic_process_never_ends() {
    let mut engine = SchedEngine::new(SchedPolicy::Fcfs).unwrap();
    let p1 = engine
        .add_process(ProcessSpec {
            period: Some(2),
            ..spec("tick", 0, vec![Burst::cpu(1)])
        })
        .unwrap();

    for _ in 0..12 {
        assert!(!engine.forward_time());
    }
    let rearms = engine
        .log()
        .events()
        .iter()
        .filter(|e| matches!(e.detail, SchedEvent::Rearmed { pid, .. } if pid == p1))
        .count();
    assert!(rearms >= 2);
    assert_eq!(engine.process(p1).unwrap().metrics.finished_at, None);
}

// ============================================================================
// Command gating, rewind, persistence
// ============================================================================

#[test]
fn test_commands_gated_after_start() {
    let mut engine = SchedEngine::new(SchedPolicy::Fcfs).unwrap();
    let p1 = engine.add_process(spec("a", 0, vec![Burst::cpu(2)])).unwrap();
    engine.forward_time();

    assert_eq!(
        engine.set_policy(SchedPolicy::RoundRobin { quantum: 2 }),
        Err(SchedError::SimulationStarted)
    );
    assert_eq!(
        engine.update_process(p1, spec("a2", 0, vec![Burst::cpu(5)])),
        Err(SchedError::SimulationStarted)
    );
    assert_eq!(engine.remove_process(p1), Err(SchedError::SimulationStarted));
    // adding is still allowed
    assert!(engine.add_process(spec("late", 9, vec![Burst::cpu(1)])).is_ok());
}

#[test]
fn test_rewind_restores_start_state() {
    let mut engine = SchedEngine::new(SchedPolicy::Fcfs).unwrap();
    let p1 = engine.add_process(spec("a", 0, vec![Burst::cpu(4)])).unwrap();
    let before = engine.to_record().unwrap();

    for _ in 0..3 {
        engine.forward_time();
    }
    assert_ne!(engine.to_record().unwrap(), before);

    assert!(engine.rewind());
    assert_eq!(engine.to_record().unwrap(), before);
    assert!(!engine.is_started());
    assert_eq!(engine.process(p1).unwrap().state, ProcState::Arriving);
    // policy may be swapped again after rewinding
    assert!(engine.set_policy(SchedPolicy::Sjf { preemptive: false }).is_ok());
}

#[test]
fn test_record_round_trip_preserves_state() {
    let mut engine = SchedEngine::new(SchedPolicy::RoundRobin { quantum: 3 }).unwrap();
    engine.add_process(spec("a", 0, vec![Burst::cpu(5), Burst::io(2)])).unwrap();
    engine.add_process(spec("b", 1, vec![Burst::cpu(4)])).unwrap();
    for _ in 0..4 {
        engine.forward_time();
    }

    let record = engine.to_record().unwrap();
    let rebuilt = SchedEngine::from_record(record.clone()).unwrap();
    assert_eq!(rebuilt.to_record().unwrap(), record);
    assert_eq!(rebuilt.now(), engine.now());
    assert_eq!(rebuilt.ready_ids(), engine.ready_ids());
    assert_eq!(rebuilt.running(), engine.running());
    // a loaded engine is not started; the run resumes fresh
    assert!(!rebuilt.is_started());
}

#[test]
fn test_malformed_record_rejected_whole() {
    let err = SchedEngine::from_record(serde_json::json!({ "clock": "zero" })).unwrap_err();
    assert!(err.is_malformed());
}

#[test]
fn test_validation_and_capacity() {
    let mut engine = SchedEngine::new(SchedPolicy::Fcfs).unwrap();
    assert!(engine.add_process(spec("", 0, vec![Burst::cpu(1)])).is_err());
    assert!(engine.add_process(spec("x", 0, vec![])).is_err());
    assert!(engine.add_process(spec("x", 0, vec![Burst::cpu(0)])).is_err());

    for n in 0..tos_sched::MAX_PROCESSES {
        engine
            .add_process(spec(&format!("p{}", n), 0, vec![Burst::cpu(1)]))
            .unwrap();
    }
    assert_eq!(
        engine.add_process(spec("over", 0, vec![Burst::cpu(1)])),
        Err(SchedError::CapacityExceeded {
            limit: tos_sched::MAX_PROCESSES
        })
    );
}
