//! Timer tests: T1-T4 never fire early and fire within 200 ms of their value
//!
//! Run with: cargo test -p j1939-tests --test timing_test

use std::time::Duration;

use j1939::tp::{AbortReason, ControlMessage, T1, T2, T3, T4};
use j1939::{Bus, BusError, Frame, SessionAbort, GLOBAL_ADDRESS};
use j1939_tests::*;
use pretty_assertions::assert_eq;
use tokio::time::Instant;

const TOLERANCE: Duration = Duration::from_millis(200);

fn assert_fired(elapsed: Duration, timer: Duration) {
    assert!(elapsed >= timer, "fired early: {:?} < {:?}", elapsed, timer);
    assert!(
        elapsed < timer + TOLERANCE,
        "fired late: {:?} >= {:?}",
        elapsed,
        timer + TOLERANCE
    );
}

#[tokio::test(start_paused = true)]
async fn test_t1_between_packets() {
    let tool = Tool::new();
    let mut engine = Peer::attach(&tool.medium, ENGINE);
    let data = payload(20);

    engine.request_to_send(TOOL, PROPRIETARY_A, &data).await;
    engine.next_control(TOOL).await.unwrap();
    engine.packet(TOOL, 1, &data).await;
    let start = Instant::now();

    let (_, retry) = engine.next_control(TOOL).await.unwrap();
    assert_fired(start.elapsed(), T1);
    assert_eq!(retry, ControlMessage::clear_to_send(2, 2, PROPRIETARY_A));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_packet_does_not_extend_t1() {
    let tool = Tool::new();
    let mut engine = Peer::attach(&tool.medium, ENGINE);
    let repeater = Peer::attach(&tool.medium, ENGINE);
    let data = payload(20);

    engine.request_to_send(TOOL, PROPRIETARY_A, &data).await;
    engine.next_control(TOOL).await.unwrap();
    engine.packet(TOOL, 1, &data).await;
    let start = Instant::now();

    let repeated = data.clone();
    tokio::spawn(async move {
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(300)).await;
            repeater.packet(TOOL, 1, &repeated).await;
        }
    });

    let (_, retry) = engine.next_control(TOOL).await.unwrap();
    assert_fired(start.elapsed(), T1);
    assert_eq!(retry, ControlMessage::clear_to_send(2, 2, PROPRIETARY_A));
}

#[tokio::test(start_paused = true)]
async fn test_t2_after_clear_to_send() {
    let tool = Tool::new();
    let mut engine = Peer::attach(&tool.medium, ENGINE);
    let data = payload(20);

    engine.request_to_send(TOOL, PROPRIETARY_A, &data).await;
    engine.next_control(TOOL).await.unwrap();
    let start = Instant::now();

    let (_, retry) = engine.next_control(TOOL).await.unwrap();
    assert_fired(start.elapsed(), T2);
    assert_eq!(retry, ControlMessage::clear_to_send(3, 1, PROPRIETARY_A));
}

#[tokio::test(start_paused = true)]
async fn test_t3_waiting_for_end_of_message() {
    let tool = Tool::new();
    let mut engine = Peer::attach(&tool.medium, ENGINE);
    let bus = tool.bus.clone();
    let send = tokio::spawn(async move {
        let frame = Frame::addressed(6, PROPRIETARY_A, ENGINE, TOOL, payload(9));
        let result = bus.send(frame).await;
        (result, Instant::now())
    });

    engine.next_control(TOOL).await.unwrap();
    engine
        .control(ControlMessage::clear_to_send(2, 1, PROPRIETARY_A), TOOL)
        .await;
    engine.next_packet(TOOL).await.unwrap();
    engine.next_packet(TOOL).await.unwrap();
    let last_packet = Instant::now();

    let (result, finished) = send.await.unwrap();
    assert_eq!(
        result,
        Err(BusError::Transport(SessionAbort::Timeout("EOM ACK")))
    );
    assert_fired(finished - last_packet, T3);

    let (_, abort) = engine.next_control(TOOL).await.unwrap();
    assert_eq!(
        abort,
        ControlMessage::Abort {
            reason: AbortReason::Timeout,
            pgn: PROPRIETARY_A,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_t4_after_hold_open() {
    let tool = Tool::new();
    let mut engine = Peer::attach(&tool.medium, ENGINE);
    let bus = tool.bus.clone();
    let send = tokio::spawn(async move {
        let frame = Frame::addressed(6, PROPRIETARY_A, ENGINE, TOOL, payload(9));
        let result = bus.send(frame).await;
        (result, Instant::now())
    });

    engine.next_control(TOOL).await.unwrap();
    engine
        .control(ControlMessage::clear_to_send(0, 0xFF, PROPRIETARY_A), TOOL)
        .await;
    let held = Instant::now();

    let (result, finished) = send.await.unwrap();
    assert_eq!(result, Err(BusError::Transport(SessionAbort::Timeout("CTS"))));
    assert_fired(finished - held, T4);
    assert!(tool.warnings.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_gap_ends_session() {
    let tool = Tool::new();
    let engine = Peer::attach(&tool.medium, ENGINE);
    let data = payload(20);

    engine
        .control(
            ControlMessage::Broadcast {
                total_bytes: 20,
                total_packets: 3,
                pgn: COMPONENT_ID,
            },
            GLOBAL_ADDRESS,
        )
        .await;
    engine.packet(GLOBAL_ADDRESS, 1, &data).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(tool.bus.active_sessions(), 1);

    tokio::time::sleep(T1 + Duration::from_millis(10)).await;
    assert_eq!(tool.bus.active_sessions(), 0);

    // Late packets find no session and publish nothing
    let reader = tool.bus.read(Duration::from_millis(500));
    engine.packet(GLOBAL_ADDRESS, 2, &data).await;
    engine.packet(GLOBAL_ADDRESS, 3, &data).await;
    assert!(reader.collect().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_empty_read_window() {
    let tool = Tool::new();
    let start = Instant::now();

    let frames = tool.bus.read(Duration::from_secs(2)).collect().await;

    assert!(frames.is_empty());
    assert_fired(start.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_read_window_rolls_with_traffic() {
    let tool = Tool::new();
    let engine = Peer::attach(&tool.medium, ENGINE);
    let reader = tool.bus.read(Duration::from_secs(1));
    let start = Instant::now();

    let collector = tokio::spawn(reader.collect());
    let frame = Frame::new(6, 0xFEF1, ENGINE, vec![0; 8]);
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(600)).await;
        engine.send(frame.clone()).await;
    }
    let frames = collector.await.unwrap();

    assert_eq!(frames.len(), 3);
    assert_fired(start.elapsed(), Duration::from_millis(2800));
}
