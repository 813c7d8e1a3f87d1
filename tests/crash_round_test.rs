//! Crash rounds under concurrent players

use fairplay::{
    config::CrashConfig,
    errors::{EngineError, StateConflict},
    games::{
        crash::{crash_point_for, CrashEngine, RoundPhase},
        types::payout_for,
    },
    ledger::{EntryKind, InMemoryLedger, LedgerOperation},
    ManualClock,
};
use proptest::prelude::*;
use std::{collections::HashMap, sync::Arc};

fn setup(players: usize) -> (Arc<CrashEngine>, Arc<InMemoryLedger>) {
    let ledger = Arc::new(InMemoryLedger::new());
    for i in 0..players {
        ledger.deposit(&format!("player-{}", i), 1_000.0);
    }
    let engine = CrashEngine::new(CrashConfig::default(), ledger.clone(), Arc::new(ManualClock::default()));
    (Arc::new(engine), ledger)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bets_from_many_players() {
    let (engine, ledger) = setup(64);
    engine.current_round().unwrap();

    let tasks: Vec<_> = (0..64)
        .map(|i| {
            let engine = engine.clone();
            tokio::task::spawn_blocking(move || engine.place_bet(&format!("player-{}", i), 5.0))
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let round = engine.snapshot().unwrap();
    assert_eq!(round.players.len(), 64);
    for i in 0..64 {
        assert_eq!(ledger.balance(&format!("player-{}", i)), Some(995.0));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_bets_from_one_player_take_one_wager() {
    let (engine, ledger) = setup(1);

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let engine = engine.clone();
            tokio::task::spawn_blocking(move || engine.place_bet("player-0", 10.0))
        })
        .collect();

    let mut accepted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(EngineError::Conflict(StateConflict::BetAlreadyPlaced { .. })) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(ledger.balance("player-0"), Some(990.0));
    assert_eq!(engine.snapshot().unwrap().players.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_cash_outs_pay_once() {
    let (engine, ledger) = setup(1);
    engine.place_bet("player-0", 10.0).unwrap();
    engine.start_flying().unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let engine = engine.clone();
            tokio::task::spawn_blocking(move || engine.cash_out("player-0", 1.0))
        })
        .collect();

    let mut paid = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            paid += 1;
        }
    }

    assert_eq!(paid, 1);
    assert_eq!(ledger.balance("player-0"), Some(1_000.0));
    let payouts = ledger
        .entries_for("player-0")
        .iter()
        .filter(|e| e.kind == EntryKind::Payout)
        .count();
    assert_eq!(payouts, 1);
}

#[test]
fn test_settlement_reveals_a_replayable_round() {
    let (engine, ledger) = setup(3);
    let round = engine.current_round().unwrap();
    for i in 0..3 {
        engine.place_bet(&format!("player-{}", i), 10.0).unwrap();
    }
    engine.start_flying().unwrap();
    engine.cash_out("player-0", 1.0).unwrap();

    let settlement = engine.finalize_round().unwrap();
    assert_eq!(settlement.round_id, round.id);
    assert_eq!(settlement.winners.len(), 1);
    assert_eq!(settlement.losers.len(), 2);
    assert!(settlement.unrecorded.is_empty());

    let replay = settlement.reveal.to_seed_pair().unwrap();
    assert_eq!(replay.server_seed_hash(), round.commitment.server_seed_hash);
    assert_eq!(crash_point_for(&replay).unwrap(), settlement.crash_point);

    let losses = ledger
        .entries()
        .into_iter()
        .filter(|e| e.kind == EntryKind::Loss)
        .collect::<Vec<_>>();
    assert_eq!(losses.len(), 2);
    assert!(losses.iter().all(|e| e.profit == -10.0));

    let crashed = engine.snapshot().unwrap();
    assert_eq!(crashed.phase, RoundPhase::Crashed);
    assert_eq!(crashed.reveal, Some(settlement.reveal));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cash_outs_racing_the_crash_settle_consistently() {
    let players = 24;
    let (engine, ledger) = setup(players);
    for i in 0..players {
        engine.place_bet(&format!("player-{}", i), 10.0).unwrap();
    }
    engine.start_flying().unwrap();

    let cash_outs: Vec<_> = (0..players)
        .map(|i| {
            let engine = engine.clone();
            tokio::task::spawn_blocking(move || {
                let player = format!("player-{}", i);
                let result = engine.cash_out(&player, 1.0);
                (player, result)
            })
        })
        .collect();
    let crash = {
        let engine = engine.clone();
        tokio::task::spawn_blocking(move || engine.finalize_round())
    };

    let mut cashed = HashMap::new();
    for task in cash_outs {
        let (player, result) = task.await.unwrap();
        match result {
            Ok(bet) => {
                assert_eq!(bet.payout, Some(10.0));
                cashed.insert(player, true);
            }
            Err(EngineError::Conflict(StateConflict::WrongPhase { .. })) => {
                cashed.insert(player, false);
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    let settlement = crash.await.unwrap().unwrap();

    assert_eq!(settlement.winners.len() + settlement.losers.len(), players);
    assert!(settlement.unrecorded.is_empty());
    for (player, paid) in &cashed {
        let won = settlement.winners.iter().any(|bet| &bet.player_id == player);
        let lost = settlement.losers.iter().any(|bet| &bet.player_id == player);
        assert_eq!(won, *paid, "{} winner status disagrees with cash-out", player);
        assert_eq!(lost, !*paid);

        let kinds: Vec<EntryKind> = ledger.entries_for(player).iter().map(|e| e.kind).collect();
        if *paid {
            assert_eq!(ledger.balance(player), Some(1_000.0));
            assert_eq!(kinds, vec![EntryKind::Wager, EntryKind::Payout]);
        } else {
            assert_eq!(ledger.balance(player), Some(990.0));
            assert_eq!(kinds, vec![EntryKind::Wager, EntryKind::Loss]);
        }
    }
}

#[test]
fn test_crash_completes_when_losses_cannot_be_recorded() {
    let (engine, ledger) = setup(3);
    for i in 0..3 {
        engine.place_bet(&format!("player-{}", i), 10.0 + i as f64).unwrap();
    }
    engine.start_flying().unwrap();
    engine.cash_out("player-0", 1.0).unwrap();

    ledger.set_outage(LedgerOperation::Record, true);
    let settlement = engine.finalize_round().unwrap();
    ledger.set_outage(LedgerOperation::Record, false);

    assert_eq!(engine.snapshot().unwrap().phase, RoundPhase::Crashed);
    assert_eq!(settlement.losers.len(), 2);
    assert_eq!(settlement.unrecorded.len(), settlement.losers.len());
    for loss in &settlement.unrecorded {
        assert_eq!(loss.kind, EntryKind::Loss);
        assert_eq!(loss.profit, -loss.wager);
        let bet = settlement
            .losers
            .iter()
            .find(|bet| bet.player_id == loss.player_id)
            .unwrap();
        assert_eq!(loss.wager, bet.amount);
        assert_eq!(ledger.balance(&loss.player_id), Some(1_000.0 - bet.amount));
    }
    assert!(ledger.entries().iter().all(|e| e.kind != EntryKind::Loss));

    let next = engine.current_round().unwrap();
    assert_eq!(next.phase, RoundPhase::Betting);
    assert_eq!(next.number, settlement.number + 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_cash_out_never_exceeds_crash_point(claimed in 1.0f64..1_000_000.0, amount in 0.01f64..500.0) {
        let (engine, _) = setup(1);
        engine.place_bet("player-0", amount).unwrap();
        engine.start_flying().unwrap();

        let bet = engine.cash_out("player-0", claimed).unwrap();
        let crash_point = engine.finalize_round().unwrap().crash_point;
        let effective = claimed.min(crash_point);

        prop_assert_eq!(bet.cashout_multiplier, Some(effective));
        prop_assert_eq!(bet.payout, Some(payout_for(amount, effective)));
        prop_assert!(bet.payout.unwrap() <= amount * crash_point + 1e-6);
    }
}
