// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::FakeClock;
use crate::id::{LockId, NodeId, ServerThreadId, ThreadId};

fn key(thread: u64, seq: u64) -> TimerKey {
    TimerKey::new(
        LockId::named("timer"),
        ServerThreadId::new(NodeId(1), ThreadId(thread)),
        seq,
    )
}

fn started(clock: &FakeClock) -> LockTimer<FakeClock> {
    let mut timer = LockTimer::new(clock.clone());
    timer.start();
    timer
}

#[test]
fn fires_in_deadline_order() {
    let clock = FakeClock::new();
    let mut timer = started(&clock);

    timer.schedule(key(1, 1), Duration::from_millis(300));
    timer.schedule(key(2, 2), Duration::from_millis(100));
    timer.schedule(key(3, 3), Duration::from_millis(200));

    clock.advance(Duration::from_millis(150));
    assert_eq!(timer.poll(), vec![key(2, 2)]);

    clock.advance(Duration::from_millis(200));
    assert_eq!(timer.poll(), vec![key(3, 3), key(1, 1)]);
    assert!(timer.is_empty());
}

#[test]
fn cancelled_timer_never_fires() {
    let clock = FakeClock::new();
    let mut timer = started(&clock);

    timer.schedule(key(1, 1), Duration::from_millis(100));
    timer.cancel(&key(1, 1));

    clock.advance(Duration::from_secs(1));
    assert!(timer.poll().is_empty());
}

#[test]
fn nothing_fires_before_start() {
    let clock = FakeClock::new();
    let mut timer = LockTimer::new(clock.clone());

    timer.schedule(key(1, 1), Duration::from_millis(10));
    clock.advance(Duration::from_secs(1));

    assert_eq!(timer.state(), TimerState::NotStarted);
    assert!(timer.poll().is_empty());
    assert_eq!(timer.len(), 1);
}

#[test]
fn start_credits_time_spent_queued() {
    let clock = FakeClock::new();
    let mut timer = LockTimer::new(clock.clone());

    timer.schedule(key(1, 1), Duration::from_millis(500));
    timer.schedule(key(2, 2), Duration::from_millis(100));
    clock.advance(Duration::from_millis(300));

    timer.start();
    // The overdue timer fires at once; the other has 200ms left
    assert_eq!(timer.poll(), vec![key(2, 2)]);
    assert_eq!(
        timer.next_deadline(),
        Some(clock.now() + Duration::from_millis(200))
    );

    clock.advance(Duration::from_millis(200));
    assert_eq!(timer.poll(), vec![key(1, 1)]);
}

#[test]
fn cancel_while_queued_removes_timer() {
    let clock = FakeClock::new();
    let mut timer = LockTimer::new(clock.clone());

    timer.schedule(key(1, 1), Duration::from_millis(10));
    timer.cancel(&key(1, 1));
    timer.start();

    clock.advance(Duration::from_secs(1));
    assert!(timer.poll().is_empty());
}

#[test]
fn shutdown_discards_and_ignores_new_timers() {
    let clock = FakeClock::new();
    let mut timer = started(&clock);
    timer.schedule(key(1, 1), Duration::from_millis(10));

    timer.shutdown();
    timer.shutdown();
    timer.schedule(key(2, 2), Duration::from_millis(10));
    timer.start();

    clock.advance(Duration::from_secs(1));
    assert_eq!(timer.state(), TimerState::Shutdown);
    assert!(timer.poll().is_empty());
    assert_eq!(timer.next_deadline(), None);
}

#[test]
fn next_deadline_skips_cancelled() {
    let clock = FakeClock::new();
    let mut timer = started(&clock);
    let now = clock.now();

    timer.schedule(key(1, 1), Duration::from_millis(10));
    timer.schedule(key(2, 2), Duration::from_millis(20));
    timer.cancel(&key(1, 1));

    assert_eq!(timer.next_deadline(), Some(now + Duration::from_millis(20)));
}

#[test]
fn cancel_drops_the_deadline() {
    let clock = FakeClock::new();
    let mut timer = started(&clock);

    for seq in 0..100 {
        timer.schedule(key(1, seq), Duration::from_secs(3600));
        timer.cancel(&key(1, seq));
    }
    let Phase::Started { deadlines } = &timer.phase else {
        panic!("timer not started");
    };
    assert_eq!(deadlines.by_time.len(), 0);
    assert_eq!(deadlines.by_key.len(), 0);
    assert_eq!(timer.next_deadline(), None);
}

#[test]
fn rescheduling_a_key_replaces_its_deadline() {
    let clock = FakeClock::new();
    let mut timer = started(&clock);
    let now = clock.now();

    timer.schedule(key(1, 1), Duration::from_millis(10));
    timer.schedule(key(1, 1), Duration::from_millis(50));
    assert_eq!(timer.len(), 1);
    assert_eq!(timer.next_deadline(), Some(now + Duration::from_millis(50)));

    clock.advance(Duration::from_millis(20));
    assert!(timer.poll().is_empty());
}

#[test]
fn out_of_range_delay_never_fires() {
    let clock = FakeClock::new();
    let mut timer = started(&clock);

    timer.schedule(key(1, 1), Duration::MAX);
    timer.schedule(key(2, 2), Duration::from_millis(10));

    clock.advance(Duration::from_secs(3600));
    assert_eq!(timer.poll(), vec![key(2, 2)]);
    assert!(timer.is_empty());

    let mut queued = LockTimer::new(clock.clone());
    queued.schedule(key(3, 3), Duration::MAX);
    queued.start();
    assert_eq!(queued.next_deadline(), None);
}
