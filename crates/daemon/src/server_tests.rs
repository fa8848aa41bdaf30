// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use lockd_core::{
    ClientMessage, LeaseKind, LockId, LockLevel, LockManagerConfig, LockPolicy, ServerThreadId,
    SystemClock, ThreadId,
};
use tokio::task::JoinHandle;

use super::*;
use crate::protocol::{read_response, write_request};

type Task = JoinHandle<Result<(), ServerError>>;

fn setup() -> (Arc<LockManager<SystemClock>>, Arc<NodeRouter>) {
    let router = Arc::new(NodeRouter::new());
    let manager = Arc::new(LockManager::new(
        LockPolicy::NonGreedy,
        LockManagerConfig::default(),
        SystemClock,
        router.clone(),
    ));
    manager.start().unwrap();
    (manager, router)
}

fn open(manager: &Arc<LockManager<SystemClock>>, router: &Arc<NodeRouter>) -> (UnixStream, Task) {
    let (client, server) = UnixStream::pair().unwrap();
    let task = tokio::spawn(handle_connection(manager.clone(), router.clone(), server));
    (client, task)
}

async fn connect(
    manager: &Arc<LockManager<SystemClock>>,
    router: &Arc<NodeRouter>,
    node: u64,
) -> (UnixStream, Task) {
    let (mut client, task) = open(manager, router);
    write_request(
        &mut client,
        &Request::Hello {
            node: NodeId(node),
            version: PROTOCOL_VERSION.to_string(),
        },
    )
    .await
    .unwrap();
    assert!(matches!(recv(&mut client).await, Response::Welcome { .. }));
    (client, task)
}

async fn recv(client: &mut UnixStream) -> Response {
    tokio::time::timeout(Duration::from_secs(2), read_response(client))
        .await
        .expect("no response from server")
        .unwrap()
}

async fn send(client: &mut UnixStream, message: ClientMessage) {
    write_request(client, &Request::Message { message })
        .await
        .unwrap();
}

fn thread(node: u64) -> ServerThreadId {
    ServerThreadId::new(NodeId(node), ThreadId(1))
}

fn lock_a() -> LockId {
    LockId::named("a")
}

#[tokio::test]
async fn lock_request_is_answered_on_the_socket() {
    let (manager, router) = setup();
    let (mut client, _task) = connect(&manager, &router, 1).await;

    send(
        &mut client,
        ClientMessage::lock(lock_a(), thread(1), LockLevel::Write),
    )
    .await;

    assert_eq!(
        recv(&mut client).await,
        Response::Lock {
            response: LockResponse::Granted {
                lock: lock_a(),
                thread: thread(1),
                level: LockLevel::Write,
                lease: LeaseKind::Direct,
            }
        }
    );
}

#[tokio::test]
async fn stats_reflect_held_locks() {
    let (manager, router) = setup();
    let (mut client, _task) = connect(&manager, &router, 1).await;

    send(
        &mut client,
        ClientMessage::lock(lock_a(), thread(1), LockLevel::Read),
    )
    .await;
    recv(&mut client).await;

    write_request(&mut client, &Request::Stats).await.unwrap();
    let Response::Stats { stats } = recv(&mut client).await else {
        panic!("expected stats");
    };
    assert_eq!(stats.total_locks, 1);
    assert_eq!(stats.held_locks, 1);
}

#[tokio::test]
async fn manager_errors_come_back_as_lock_responses() {
    let (manager, router) = setup();
    let (mut client, _task) = connect(&manager, &router, 1).await;

    send(&mut client, ClientMessage::notify(lock_a(), thread(1), false)).await;

    match recv(&mut client).await {
        Response::Lock {
            response: LockResponse::Error { thread: from, .. },
        } => assert_eq!(from, Some(thread(1))),
        other => panic!("expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn message_for_another_node_is_refused() {
    let (manager, router) = setup();
    let (mut client, _task) = connect(&manager, &router, 1).await;

    send(
        &mut client,
        ClientMessage::lock(lock_a(), thread(2), LockLevel::Write),
    )
    .await;

    assert!(matches!(recv(&mut client).await, Response::Error { .. }));
    assert!(manager.query(&lock_a()).is_none());
}

#[tokio::test]
async fn first_frame_must_be_hello() {
    let (manager, router) = setup();
    let (mut client, task) = open(&manager, &router);

    write_request(&mut client, &Request::Stats).await.unwrap();

    assert!(matches!(recv(&mut client).await, Response::Error { .. }));
    assert!(matches!(
        task.await.unwrap(),
        Err(ServerError::Protocol(ProtocolError::Unexpected(_)))
    ));
}

#[tokio::test]
async fn second_connection_for_a_node_is_refused() {
    let (manager, router) = setup();
    let (_first, _task) = connect(&manager, &router, 1).await;
    let (mut second, task) = open(&manager, &router);

    write_request(
        &mut second,
        &Request::Hello {
            node: NodeId(1),
            version: PROTOCOL_VERSION.to_string(),
        },
    )
    .await
    .unwrap();

    assert!(matches!(recv(&mut second).await, Response::Error { .. }));
    assert!(matches!(
        task.await.unwrap(),
        Err(ServerError::DuplicateNode(NodeId(1)))
    ));
    assert!(router.is_registered(NodeId(1)));
}

#[tokio::test]
async fn closing_the_socket_releases_the_node() {
    let (manager, router) = setup();
    let (mut holder, holder_task) = connect(&manager, &router, 1).await;
    let (mut waiter, _task) = connect(&manager, &router, 2).await;

    send(
        &mut holder,
        ClientMessage::lock(lock_a(), thread(1), LockLevel::Write),
    )
    .await;
    recv(&mut holder).await;
    send(
        &mut waiter,
        ClientMessage::lock(lock_a(), thread(2), LockLevel::Write),
    )
    .await;

    drop(holder);
    assert!(holder_task.await.unwrap().is_ok());
    assert!(!router.is_registered(NodeId(1)));

    assert!(matches!(
        recv(&mut waiter).await,
        Response::Lock {
            response: LockResponse::Granted { .. }
        }
    ));
}
