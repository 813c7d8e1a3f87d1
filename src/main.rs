//! Fairplay CLI
//!
//! Offline verification of revealed seeds, plus a timer-driven crash loop
//! with simulated players for local runs. Players also play mines hands
//! between rounds; hands left open are swept or abandoned at exit.

use clap::{Parser, Subcommand};
use fairplay::{
    config::{ConfigLoader, EngineConfig},
    fairness::{derive_for, generate_client_seed, generate_seed, hash_seed, RevealedSeed, SeedPair},
    games::{
        crash::{self, CrashEngine},
        oneshot::{self, OneShotGame},
        tiles::{derive_trap_layout, LayoutConfig, RevealOutcome, TileEngine, TowerDifficulty},
        dice::DiceParams,
        plinko::{PlinkoParams, PlinkoRisk},
    },
    ledger::InMemoryLedger,
    telemetry, EngineResult, SessionKey, SystemClock,
};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::time::{interval, sleep};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "fairplay")]
#[command(about = "Provably-fair casino outcome engine", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the SHA-256 commitment of a server seed
    Hash { server_seed: String },

    /// Generate a fresh server seed, its commitment and a client seed
    Seed,

    /// Replay an outcome from a revealed seed
    Verify {
        #[arg(long)]
        server_seed: String,

        /// Hash published before play; checked when given
        #[arg(long)]
        server_seed_hash: Option<String>,

        #[arg(long)]
        client_seed: String,

        #[arg(long)]
        nonce: u64,

        #[command(subcommand)]
        game: VerifyGame,
    },

    /// Run crash rounds against simulated players
    CrashDemo {
        /// Rounds to play before exiting
        #[arg(long, default_value = "3")]
        rounds: u64,

        /// Simulated players per round
        #[arg(long, default_value = "4")]
        players: usize,

        /// Starting balance per player
        #[arg(long, default_value = "100")]
        balance: f64,
    },
}

#[derive(Subcommand, Debug)]
enum VerifyGame {
    Crash,
    Mines {
        #[arg(long, default_value = "3")]
        mines: usize,
    },
    Towers {
        #[arg(long, default_value = "medium")]
        difficulty: TowerDifficulty,
    },
    Dice {
        #[arg(long)]
        target: f64,
        /// Win above the target instead of below
        #[arg(long)]
        over: bool,
    },
    Plinko {
        #[arg(long, default_value = "16")]
        rows: usize,
        #[arg(long, default_value = "medium")]
        risk: PlinkoRisk,
    },
    Slots,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let config = loader.load()?;
    telemetry::init_tracing(&config.logging);

    match args.command {
        Command::Hash { server_seed } => {
            println!("{}", hash_seed(&server_seed));
        }
        Command::Seed => {
            let server_seed = generate_seed();
            let report = json!({
                "server_seed_hash": hash_seed(&server_seed),
                "server_seed": server_seed,
                "client_seed": generate_client_seed(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Verify {
            server_seed,
            server_seed_hash,
            client_seed,
            nonce,
            game,
        } => {
            let revealed = RevealedSeed {
                server_seed_hash: server_seed_hash.unwrap_or_else(|| hash_seed(&server_seed)),
                server_seed,
                client_seed,
                nonce,
            };
            let report = verify(&config, &revealed, game)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::CrashDemo {
            rounds,
            players,
            balance,
        } => {
            run_crash_demo(config, rounds, players, balance).await?;
        }
    }

    Ok(())
}

fn verify(
    config: &EngineConfig,
    revealed: &RevealedSeed,
    game: VerifyGame,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let seed = revealed.to_seed_pair()?;
    let digest = derive_for(&seed, None);

    let result = match game {
        VerifyGame::Crash => json!({
            "game": "crash",
            "entropy": crash::crash_entropy(&seed)?,
            "crash_point": crash::crash_point_for(&seed)?,
        }),
        VerifyGame::Mines { mines } => {
            let layout = LayoutConfig::mines(mines, config.tiles.house_edge)?;
            layout_report(&seed, &layout)?
        }
        VerifyGame::Towers { difficulty } => {
            let layout = LayoutConfig::towers(difficulty, config.tiles.house_edge)?;
            layout_report(&seed, &layout)?
        }
        VerifyGame::Dice { target, over } => {
            let game = OneShotGame::Dice(DiceParams { target, over });
            serde_json::to_value(oneshot::evaluate(&seed, 1.0, &game, config.one_shot.house_edge)?.result)?
        }
        VerifyGame::Plinko { rows, risk } => {
            let game = OneShotGame::Plinko(PlinkoParams { rows, risk });
            serde_json::to_value(oneshot::evaluate(&seed, 1.0, &game, config.one_shot.house_edge)?.result)?
        }
        VerifyGame::Slots => {
            serde_json::to_value(oneshot::evaluate(&seed, 1.0, &OneShotGame::Slots, 0.0)?.result)?
        }
    };

    Ok(json!({
        "commitment_valid": revealed.verify(),
        "server_seed_hash": seed.server_seed_hash(),
        "client_seed": seed.client_seed(),
        "nonce": seed.nonce(),
        "digest": digest,
        "result": result,
    }))
}

fn layout_report(seed: &SeedPair, layout: &LayoutConfig) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    Ok(json!({
        "game": layout.game(),
        "traps": derive_trap_layout(seed, layout)?,
        "multipliers": layout.multipliers,
    }))
}

/// Play one mines hand, revealing cells `0..steps` in order. Returns the key
/// if the player walked away with the hand still open.
fn play_mines_hand(
    tiles: &TileEngine,
    player: &str,
    seed: SeedPair,
    stake: f64,
    steps: usize,
    walk_away: bool,
) -> EngineResult<Option<SessionKey>> {
    let layout = tiles.mines_layout(3)?;
    let key = tiles.start_session(player, seed, layout, stake)?.key;

    for step in 0..steps {
        match tiles.reveal_cell(&key, step, step)? {
            RevealOutcome::Safe { multiplier, .. } => debug!(session = %key, multiplier, "Mines cell safe"),
            RevealOutcome::Busted { .. } => return Ok(None),
            RevealOutcome::Completed(_) => return Ok(None),
        }
    }

    if walk_away {
        return Ok(Some(key));
    }
    let cashed = tiles.cash_out(&key)?;
    debug!(session = %key, payout = ?cashed.payout, "Mines hand cashed");
    Ok(None)
}

/// Drive BETTING -> FLYING -> CRASHED on wall-clock timers.
async fn run_crash_demo(
    config: EngineConfig,
    rounds: u64,
    players: usize,
    balance: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let ledger = Arc::new(InMemoryLedger::new());
    let clock = Arc::new(SystemClock);
    let engine = Arc::new(CrashEngine::new(config.crash.clone(), ledger.clone(), clock.clone()));
    let tiles = Arc::new(TileEngine::new(config.tiles.clone(), ledger.clone(), clock));

    let names: Vec<String> = (1..=players).map(|i| format!("player-{}", i)).collect();
    for name in &names {
        ledger.deposit(name, balance);
    }

    let sweeper = {
        let tiles = tiles.clone();
        let period = config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                tiles.sweep_idle();
            }
        })
    };

    let mut open_hands = Vec::new();
    for _ in 0..rounds {
        let round = engine.current_round()?;
        info!(number = round.number, seed_hash = %round.commitment.server_seed_hash, "Betting open");

        for (i, name) in names.iter().enumerate() {
            let seed = SeedPair::generate(name.as_str(), round.number);
            match play_mines_hand(&tiles, name, seed, 1.0, 1 + i % 3, i % 2 == 1) {
                Ok(Some(key)) => open_hands.push(key),
                Ok(None) => {}
                Err(e) => warn!(player_id = %name, "Mines hand failed: {}", e),
            }
        }

        for (i, name) in names.iter().enumerate() {
            if let Err(e) = engine.place_bet(name, 1.0 + i as f64) {
                warn!(player_id = %name, "Bet rejected: {}", e);
            }
        }
        sleep(config.betting_window()).await;

        engine.start_flying()?;
        let mut cashouts = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let engine = engine.clone();
            let name = name.clone();
            let target = 1.2 + 0.4 * i as f64;
            cashouts.push(tokio::spawn(async move {
                sleep(engine.crash_delay(target)).await;
                match engine.cash_out(&name, target) {
                    Ok(bet) => debug!(player_id = %name, payout = ?bet.payout, "Cashed out"),
                    Err(e) => debug!(player_id = %name, "Cash-out missed: {}", e),
                }
            }));
        }

        let mut ticker = interval(Duration::from_millis(50));
        while !engine.should_crash() {
            ticker.tick().await;
        }
        let settlement = engine.finalize_round()?;
        for task in cashouts {
            task.abort();
        }

        println!(
            "round {} crashed at {:.2}x: {} cashed out, {} lost",
            settlement.number,
            settlement.crash_point,
            settlement.winners.len(),
            settlement.losers.len()
        );
        sleep(config.intermission()).await;
    }

    sweeper.abort();
    for key in &open_hands {
        if let Err(e) = tiles.abandon(key) {
            debug!(session = %key, "Hand already closed: {}", e);
        }
    }

    println!("history: {:?}", engine.recent_crash_points());
    for name in &names {
        let stats = ledger.stats(name);
        println!(
            "{}: balance {:.2}, wagered {:.2}, profit {:.2}",
            name,
            ledger.balance(name).unwrap_or_default(),
            stats.wagered,
            stats.profit
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairplay::ManualClock;

    fn tiles() -> (TileEngine, Arc<InMemoryLedger>, Arc<ManualClock>) {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.deposit("player-1", 10.0);
        let clock = Arc::new(ManualClock::default());
        let tiles = TileEngine::new(EngineConfig::default().tiles, ledger.clone(), clock.clone());
        (tiles, ledger, clock)
    }

    /// First nonce whose mines layout does (or does not) put a trap on cell 0.
    fn seed_with_first_cell_trap(trapped: bool) -> SeedPair {
        let layout = LayoutConfig::mines(3, EngineConfig::default().tiles.house_edge).unwrap();
        (0..1_000)
            .map(|nonce| SeedPair::from_parts("5e".repeat(32), "demo", nonce).unwrap())
            .find(|seed| derive_trap_layout(seed, &layout).unwrap()[0].contains(&0) == trapped)
            .unwrap()
    }

    #[test]
    fn test_mines_hand_cashes_out() {
        let (tiles, ledger, _) = tiles();
        let open = play_mines_hand(&tiles, "player-1", seed_with_first_cell_trap(false), 1.0, 1, false).unwrap();
        assert!(open.is_none());
        assert_eq!(tiles.active_sessions(), 0);
        assert!(ledger.balance("player-1").unwrap() > 10.0);
    }

    #[test]
    fn test_mines_hand_bust_closes_session() {
        let (tiles, ledger, _) = tiles();
        let open = play_mines_hand(&tiles, "player-1", seed_with_first_cell_trap(true), 1.0, 1, false).unwrap();
        assert!(open.is_none());
        assert_eq!(tiles.active_sessions(), 0);
        assert_eq!(ledger.balance("player-1"), Some(9.0));
    }

    #[test]
    fn test_walked_away_hand_is_swept_when_idle() {
        let (tiles, ledger, clock) = tiles();
        let key = play_mines_hand(&tiles, "player-1", seed_with_first_cell_trap(false), 1.0, 1, true)
            .unwrap()
            .unwrap();
        assert_eq!(tiles.active_sessions(), 1);

        clock.advance(EngineConfig::default().tiles.idle_timeout() + chrono::Duration::seconds(1));
        let swept = tiles.sweep_idle();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].key, key);
        assert!(tiles.abandon(&key).is_err());
        assert_eq!(ledger.balance("player-1"), Some(9.0));
    }
}
