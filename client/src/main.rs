use clap::Parser;
use client::game::{run_game_logic, run_player};
use client::network::Client;
use log::{error, info};
use shared::Role;

#[derive(Parser, Debug)]
#[command(author, version, about = "Reference bot for the turn orchestrator", long_about = None)]
struct Args {
    /// Orchestrator address to connect to
    #[arg(short = 'a', long, default_value = "127.0.0.1:4242")]
    address: String,

    /// One of: player, "special player", visualization, "game logic"
    #[arg(short = 'r', long, default_value = "player")]
    role: Role,

    #[arg(short = 'n', long, default_value = "bot")]
    nickname: String,
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    info!("Connecting to {} as {} ({})", args.address, args.nickname, args.role);
    let mut client = Client::connect(&args.address).await?;
    client.send_login(args.role, &args.nickname).await?;

    match args.role {
        Role::GameLogic => {
            let summary = run_game_logic(&mut client).await?;
            info!(
                "Game logic done after {} turns: {}",
                summary.player_actions_per_turn.len(),
                summary.kick_reason
            );
        }
        _ => {
            let summary = run_player(&mut client).await?;
            info!(
                "Done after {} turns (winner={:?}): {}",
                summary.turns_seen, summary.winner_player_id, summary.kick_reason
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Args::parse()).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
