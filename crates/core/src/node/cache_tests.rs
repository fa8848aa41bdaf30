// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const NODE: NodeId = NodeId(1);

fn lock_a() -> LockId {
    LockId::named("a")
}

fn sid(thread: u64) -> ServerThreadId {
    ServerThreadId::new(NODE, ThreadId(thread))
}

fn leased(level: LockLevel) -> NodeLockCache {
    let mut cache = NodeLockCache::new(NODE);
    cache.lease_granted(&lock_a(), ThreadId(1), level);
    cache
}

fn local_grant(thread: u64, level: LockLevel) -> CacheEffect {
    CacheEffect::Local(LockResponse::Granted {
        lock: lock_a(),
        thread: sid(thread),
        level,
        lease: LeaseKind::Greedy,
    })
}

fn recall_complete(effects: &[CacheEffect]) -> Option<(Vec<PendingTransfer>, Vec<WaiterTransfer>)> {
    effects.iter().find_map(|e| match e {
        CacheEffect::Server(ClientMessage::RecallComplete {
            pending, waiters, ..
        }) => Some((pending.clone(), waiters.clone())),
        _ => None,
    })
}

#[test]
fn without_a_lease_the_server_is_asked() {
    let mut cache = NodeLockCache::new(NODE);
    assert_eq!(
        cache
            .acquire(&lock_a(), ThreadId(1), LockLevel::Write, false, Instant::now())
            .unwrap(),
        None
    );
    assert!(cache.release(&lock_a(), ThreadId(1), Instant::now()).is_none());
}

#[test]
fn lease_serves_local_threads_in_fifo_order() {
    let mut cache = leased(LockLevel::Write);
    let now = Instant::now();

    let queued = cache
        .acquire(&lock_a(), ThreadId(2), LockLevel::Write, false, Instant::now())
        .unwrap();
    assert_eq!(queued, Some(vec![]));
    cache
        .acquire(&lock_a(), ThreadId(3), LockLevel::Write, false, Instant::now())
        .unwrap();

    let effects = cache.release(&lock_a(), ThreadId(1), now).unwrap();
    assert_eq!(effects, vec![local_grant(2, LockLevel::Write)]);

    let effects = cache.release(&lock_a(), ThreadId(2), now).unwrap();
    assert_eq!(effects, vec![local_grant(3, LockLevel::Write)]);
    assert_eq!(cache.local_holders(&lock_a()), vec![ThreadId(3)]);
}

#[test]
fn free_lease_grants_immediately() {
    let mut cache = leased(LockLevel::Write);
    cache
        .release(&lock_a(), ThreadId(1), Instant::now())
        .unwrap();

    let effects = cache
        .acquire(&lock_a(), ThreadId(2), LockLevel::Read, false, Instant::now())
        .unwrap();
    assert_eq!(effects, Some(vec![local_grant(2, LockLevel::Read)]));
    assert_eq!(cache.lease(&lock_a()), Some(LockLevel::Write));
}

#[test]
fn read_lease_cannot_serve_a_writer() {
    let mut cache = leased(LockLevel::Read);
    assert_eq!(
        cache
            .acquire(&lock_a(), ThreadId(2), LockLevel::Write, false, Instant::now())
            .unwrap(),
        None
    );
    assert_eq!(
        cache
            .acquire(&lock_a(), ThreadId(3), LockLevel::Read, false, Instant::now())
            .unwrap(),
        Some(vec![local_grant(3, LockLevel::Read)])
    );
}

#[test]
fn try_lock_is_denied_instead_of_queued() {
    let mut cache = leased(LockLevel::Write);
    let effects = cache
        .acquire(&lock_a(), ThreadId(2), LockLevel::Write, true, Instant::now())
        .unwrap();
    assert_eq!(
        effects,
        Some(vec![CacheEffect::Local(LockResponse::Denied {
            lock: lock_a(),
            thread: sid(2),
            level: LockLevel::Write,
            reason: DenyReason::WouldBlock,
        })])
    );
}

#[test]
fn local_misuse_is_rejected() {
    let mut cache = leased(LockLevel::Write);
    assert!(matches!(
        cache.acquire(&lock_a(), ThreadId(1), LockLevel::Write, false, Instant::now()),
        Err(LockError::AlreadyHeld { .. })
    ));

    let effects = cache
        .acquire(&lock_a(), ThreadId(1), LockLevel::Read, false, Instant::now())
        .unwrap()
        .unwrap();
    assert_eq!(effects[0], local_grant(1, LockLevel::Read));
    assert!(matches!(
        cache.acquire(&lock_a(), ThreadId(1), LockLevel::Write, false, Instant::now()),
        Err(LockError::UpgradeNotSupported { .. })
    ));
}

#[test]
fn recall_with_no_holders_completes_at_once() {
    let mut cache = leased(LockLevel::Write);
    let now = Instant::now();
    cache.release(&lock_a(), ThreadId(1), now).unwrap();

    let effects = cache.recall(&lock_a(), now);
    assert_eq!(recall_complete(&effects), Some((vec![], vec![])));
    assert_eq!(cache.lease(&lock_a()), None);
}

#[test]
fn recall_waits_for_holders_and_transfers_queued_threads() {
    let mut cache = leased(LockLevel::Write);
    let now = Instant::now();
    cache
        .acquire(&lock_a(), ThreadId(2), LockLevel::Read, false, Instant::now())
        .unwrap();

    assert!(cache.recall(&lock_a(), now).is_empty());
    assert!(cache.is_recalled(&lock_a()));

    // Recalled leases stop granting even when a request would fit
    cache
        .acquire(&lock_a(), ThreadId(3), LockLevel::Read, false, Instant::now())
        .unwrap();

    let effects = cache.release(&lock_a(), ThreadId(1), now).unwrap();
    let (pending, waiters) = recall_complete(&effects).unwrap();
    assert_eq!(
        pending,
        vec![
            PendingTransfer {
                thread: ThreadId(2),
                level: LockLevel::Read
            },
            PendingTransfer {
                thread: ThreadId(3),
                level: LockLevel::Read
            },
        ]
    );
    assert!(waiters.is_empty());
    assert_eq!(cache.lease_count(), 0);
}

#[test]
fn recall_for_unknown_lease_still_answers() {
    let mut cache = NodeLockCache::new(NODE);
    let effects = cache.recall(&lock_a(), Instant::now());
    assert_eq!(recall_complete(&effects), Some((vec![], vec![])));
}

#[test]
fn waiters_are_transferred_with_remaining_time() {
    let mut cache = leased(LockLevel::Write);
    let now = Instant::now();

    cache
        .wait(&lock_a(), ThreadId(1), Some(Duration::from_secs(5)), now)
        .unwrap()
        .unwrap();
    let effects = cache.recall(&lock_a(), now + Duration::from_secs(2));

    let (pending, waiters) = recall_complete(&effects).unwrap();
    assert!(pending.is_empty());
    assert_eq!(
        waiters,
        vec![WaiterTransfer {
            thread: ThreadId(1),
            level: LockLevel::Write,
            remaining: Some(Duration::from_secs(3)),
        }]
    );
}

#[test]
fn wait_and_notify_under_the_lease() {
    let mut cache = leased(LockLevel::Write);
    let now = Instant::now();
    cache
        .acquire(&lock_a(), ThreadId(2), LockLevel::Write, false, Instant::now())
        .unwrap();

    // Waiting releases the lock to the next local request
    let effects = cache
        .wait(&lock_a(), ThreadId(1), None, now)
        .unwrap()
        .unwrap();
    assert_eq!(effects, vec![local_grant(2, LockLevel::Write)]);

    let effects = cache
        .notify(&lock_a(), ThreadId(2), false)
        .unwrap()
        .unwrap();
    assert_eq!(
        effects,
        vec![
            CacheEffect::Local(LockResponse::WaitWoken {
                lock: lock_a(),
                thread: sid(1),
                reason: WakeReason::Notified,
            }),
            CacheEffect::Local(LockResponse::Notified {
                lock: lock_a(),
                thread: sid(2),
                waiters: vec![sid(1)],
            }),
        ]
    );

    let effects = cache.release(&lock_a(), ThreadId(2), now).unwrap();
    assert_eq!(effects, vec![local_grant(1, LockLevel::Write)]);
}

#[test]
fn notified_waiter_keeps_its_place_ahead_of_later_requests() {
    let mut cache = leased(LockLevel::Write);
    let now = Instant::now();
    cache
        .wait(&lock_a(), ThreadId(1), None, now)
        .unwrap()
        .unwrap();
    cache
        .acquire(&lock_a(), ThreadId(2), LockLevel::Write, false, Instant::now())
        .unwrap();
    cache
        .acquire(&lock_a(), ThreadId(3), LockLevel::Write, false, Instant::now())
        .unwrap();

    cache.notify(&lock_a(), ThreadId(2), true).unwrap().unwrap();
    let effects = cache.release(&lock_a(), ThreadId(2), now).unwrap();
    assert_eq!(effects, vec![local_grant(1, LockLevel::Write)]);
}

#[test]
fn wait_requires_a_write_hold() {
    let mut cache = leased(LockLevel::Read);
    assert!(matches!(
        cache.wait(&lock_a(), ThreadId(1), None, Instant::now()),
        Err(LockError::IllegalMonitorState { .. })
    ));
    assert_eq!(
        cache
            .wait(&lock_a(), ThreadId(9), None, Instant::now())
            .unwrap(),
        None
    );
}

#[test]
fn expired_waiters_rejoin_the_queue() {
    let mut cache = leased(LockLevel::Write);
    let now = Instant::now();
    cache
        .wait(&lock_a(), ThreadId(1), Some(Duration::from_millis(100)), now)
        .unwrap()
        .unwrap();

    assert!(cache.expire_waiters(now + Duration::from_millis(50)).is_empty());

    let effects = cache.expire_waiters(now + Duration::from_millis(100));
    assert_eq!(
        effects,
        vec![
            CacheEffect::Local(LockResponse::WaitWoken {
                lock: lock_a(),
                thread: sid(1),
                reason: WakeReason::TimedOut,
            }),
            local_grant(1, LockLevel::Write),
        ]
    );
}

#[test]
fn interrupt_wakes_a_local_waiter() {
    let mut cache = leased(LockLevel::Write);
    let now = Instant::now();
    cache
        .wait(&lock_a(), ThreadId(1), None, now)
        .unwrap()
        .unwrap();

    let effects = cache.interrupt(&lock_a(), ThreadId(1), now).unwrap();
    assert_eq!(
        effects[0],
        CacheEffect::Local(LockResponse::WaitWoken {
            lock: lock_a(),
            thread: sid(1),
            reason: WakeReason::Interrupted,
        })
    );
    assert_eq!(cache.local_holders(&lock_a()), vec![ThreadId(1)]);
    assert!(cache.interrupt(&lock_a(), ThreadId(1), now).is_none());
}

#[test]
fn cancel_withdraws_queued_requests_only() {
    let mut cache = leased(LockLevel::Write);
    let now = Instant::now();
    cache
        .acquire(&lock_a(), ThreadId(2), LockLevel::Write, false, Instant::now())
        .unwrap();

    assert_eq!(cache.cancel(&lock_a(), ThreadId(2), now), Some(vec![]));
    assert_eq!(cache.cancel(&lock_a(), ThreadId(2), now), None);
    assert_eq!(cache.cancel(&lock_a(), ThreadId(1), now), None);

    let effects = cache.release(&lock_a(), ThreadId(1), now).unwrap();
    assert!(effects.is_empty());
}

#[test]
fn surrender_hands_back_an_idle_lease() {
    let mut cache = leased(LockLevel::Write);
    let now = Instant::now();
    cache.release(&lock_a(), ThreadId(1), now).unwrap();

    let effects = cache.surrender(&lock_a(), now);
    assert!(recall_complete(&effects).is_some());
    assert_eq!(cache.lease(&lock_a()), None);
}

#[test]
fn grant_under_a_held_lease_is_arbitrated_locally() {
    let mut cache = leased(LockLevel::Write);
    let now = Instant::now();

    // The server covered the request with the lease; thread 1 still holds it
    assert_eq!(cache.lease_granted(&lock_a(), ThreadId(2), LockLevel::Write), None);
    assert_eq!(cache.local_holders(&lock_a()), vec![ThreadId(1)]);
    assert_eq!(cache.lease_granted(&lock_a(), ThreadId(2), LockLevel::Write), None);

    let effects = cache.release(&lock_a(), ThreadId(1), now).unwrap();
    assert_eq!(effects, vec![local_grant(2, LockLevel::Write)]);
    assert_eq!(cache.local_holders(&lock_a()), vec![ThreadId(2)]);
}

#[test]
fn compatible_grant_under_a_held_lease_is_delivered() {
    let mut cache = leased(LockLevel::Read);

    assert_eq!(
        cache.lease_granted(&lock_a(), ThreadId(2), LockLevel::Read),
        Some(LockResponse::Granted {
            lock: lock_a(),
            thread: sid(2),
            level: LockLevel::Read,
            lease: LeaseKind::Greedy,
        })
    );
    assert_eq!(cache.local_holders(&lock_a()), vec![ThreadId(1), ThreadId(2)]);
}

#[test]
fn grant_arriving_during_a_recall_is_handed_back() {
    let mut cache = leased(LockLevel::Write);
    let now = Instant::now();
    assert!(cache.recall(&lock_a(), now).is_empty());

    assert_eq!(cache.lease_granted(&lock_a(), ThreadId(2), LockLevel::Write), None);

    let effects = cache.release(&lock_a(), ThreadId(1), now).unwrap();
    let (pending, _) = recall_complete(&effects).unwrap();
    assert_eq!(
        pending,
        vec![PendingTransfer {
            thread: ThreadId(2),
            level: LockLevel::Write
        }]
    );
}

#[test]
fn waiter_with_an_unrepresentable_timeout_has_no_deadline() {
    let mut cache = leased(LockLevel::Write);
    let now = Instant::now();
    cache
        .wait(&lock_a(), ThreadId(1), Some(Duration::MAX), now)
        .unwrap()
        .unwrap();

    assert!(cache.expire_waiters(now + Duration::from_secs(3600)).is_empty());
    let (_, waiters) = recall_complete(&cache.recall(&lock_a(), now)).unwrap();
    assert_eq!(waiters[0].remaining, None);
}
