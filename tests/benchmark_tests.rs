//! Performance benchmarks for the orchestrator hot paths
//!
//! Run with `cargo test --release benchmark -- --nocapture` for timings.

use serde_json::json;
use server::game::{assign_player_ids, ActionBatch, TurnGate};
use shared::codec::{encode_frame, read_message, FrameLimit};
use shared::protocol::DoTurnAckMessage;
use shared::{PlayerActions, PlayerInformation, ServerMessage, Turn};
use std::time::Instant;

fn big_game_state(cells: usize) -> serde_json::Value {
    json!({
        "all_clients": {},
        "board": (0..cells)
            .map(|i| json!({ "x": i % 64, "y": i / 64, "owner": i % 7 }))
            .collect::<Vec<_>>(),
    })
}

/// Benchmarks framing and decoding of large TURN messages
#[tokio::test]
async fn benchmark_turn_frame_roundtrip() {
    let turn = ServerMessage::Turn(Turn {
        turn_number: 42,
        game_state: big_game_state(2_000),
        players_info: (0..16)
            .map(|i| PlayerInformation {
                player_id: i,
                nickname: format!("bot{}", i),
                remote_address: "127.0.0.1:4242".to_string(),
                is_connected: true,
            })
            .collect(),
    });

    let iterations = 500;
    let start = Instant::now();

    for _ in 0..iterations {
        let payload = serde_json::to_vec(&turn).unwrap();
        let frame = encode_frame(&payload).unwrap();
        let decoded = read_message(&mut frame.as_slice(), FrameLimit::Regular)
            .await
            .unwrap();
        assert_eq!(decoded["turn_number"], 42);
    }

    let duration = start.elapsed();
    println!(
        "TURN frame roundtrip: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks DO_TURN_ACK validation
#[test]
fn benchmark_do_turn_ack_validation() {
    let ack = json!({
        "message_type": "DO_TURN_ACK",
        "winner_player_id": -1,
        "game_state": big_game_state(500),
    });

    let iterations = 2_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let parsed = DoTurnAckMessage::parse(&ack, 16).unwrap();
        assert!(!parsed.game_finished);
    }

    let duration = start.elapsed();
    println!(
        "DO_TURN_ACK validation: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 5000);
}

/// Stress tests action batching with many players answering repeatedly
#[test]
fn stress_test_action_batch() {
    let nb_players = 1024;
    let rounds = 20;
    let mut batch = ActionBatch::default();

    let start = Instant::now();
    for round in 0..rounds {
        for player_id in 0..nb_players {
            batch.push(PlayerActions {
                player_id,
                turn_number: round,
                actions: vec![json!({ "round": round })],
            });
        }
    }
    let duration = start.elapsed();

    let taken = batch.take();
    assert_eq!(taken.len(), nb_players as usize);
    assert!(taken.iter().all(|a| a.turn_number == rounds - 1));

    println!(
        "Action batch: {} pushes in {:?}",
        nb_players * rounds,
        duration
    );
    assert!(duration.as_millis() < 5000);
}

/// Stress tests fast-mode gating with a full roster
#[test]
fn stress_test_turn_gate() {
    let mut rng = rand::thread_rng();
    let (special, players) = assign_player_ids(24, 1000, &mut rng);
    let all: Vec<i64> = special.into_iter().chain(players).collect();
    let mut gate = TurnGate::new(all.iter().copied());

    let start = Instant::now();
    for turn in 0..100 {
        gate.open(turn);
        for &player_id in &all {
            gate.record_action(player_id, turn);
        }
        assert!(gate.is_ready());
        gate.close();
    }
    let duration = start.elapsed();

    println!("Turn gate: 100 turns of {} players in {:?}", all.len(), duration);
    assert!(duration.as_millis() < 5000);
}
