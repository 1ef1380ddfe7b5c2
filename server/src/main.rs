use clap::Parser;
use log::{error, info, LevelFilter};
use server::config::Config;
use server::network::{Server, SessionExit};
use server::prompt::{run_prompt, PromptExit};
use std::future::pending;
use tokio::io::BufReader;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about = "Orchestrator of turn-based network games")]
struct Args {
    /// TCP port to listen on
    #[clap(long, default_value = "4242")]
    port: u16,
    /// Maximum number of turns of the game
    #[clap(long = "nb-turns-max", default_value = "100")]
    nb_turns_max: u32,
    /// Maximum number of players
    #[clap(long = "nb-players-max", default_value = "4")]
    nb_players_max: usize,
    /// Maximum number of special players
    #[clap(long = "nb-splayers-max", default_value = "0")]
    nb_special_players_max: usize,
    /// Maximum number of visualizations
    #[clap(long = "nb-visus-max", default_value = "1")]
    nb_visus_max: usize,
    /// Milliseconds before the first turn
    #[clap(long = "delay-first-turn", default_value = "1000")]
    delay_first_turn: f64,
    /// Milliseconds between two turns
    #[clap(long = "delay-turns", default_value = "1000")]
    delay_turns: f64,
    /// Start the game as soon as all expected clients are connected
    #[clap(long)]
    autostart: bool,
    /// Start a new turn as soon as every player has answered
    #[clap(long)]
    fast: bool,
    /// Disable the interactive prompt
    #[clap(long = "no-prompt")]
    no_prompt: bool,
    /// Only log errors
    #[clap(long, conflicts_with_all = ["verbose", "debug"])]
    quiet: bool,
    /// Log debug messages
    #[clap(long)]
    verbose: bool,
    /// Log everything
    #[clap(long)]
    debug: bool,
}

impl Args {
    fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else if self.debug {
            LevelFilter::Trace
        } else if self.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }

    fn config(&self) -> Config {
        Config {
            port: self.port,
            nb_turns_max: self.nb_turns_max,
            nb_players_max: self.nb_players_max,
            nb_special_players_max: self.nb_special_players_max,
            nb_visus_max: self.nb_visus_max,
            delay_first_turn_ms: self.delay_first_turn,
            delay_turns_ms: self.delay_turns,
            autostart: self.autostart,
            fast: self.fast,
            ..Config::default()
        }
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        Err(e) => {
            error!("Cannot listen to SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level())
        .parse_default_env()
        .init();

    let config = args.config();
    if let Err(e) = config.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let mut server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Cannot listen incoming connections: {}", e);
            std::process::exit(1);
        }
    };

    let prompt_state = server.state();
    let no_prompt = args.no_prompt;
    let prompt_quit = async move {
        if no_prompt {
            return pending().await;
        }
        let stdin = BufReader::new(tokio::io::stdin());
        match run_prompt(stdin, tokio::io::stdout(), prompt_state).await {
            PromptExit::Quit => {}
            PromptExit::EndOfInput => pending().await,
        }
    };

    let exit_code = tokio::select! {
        exit = server.wait_exit() => match exit {
            Some(SessionExit::GameFinished) | None => 0,
            Some(failed @ SessionExit::GameLogicFailed(_)) => {
                error!("Game logic failed. Aborting.");
                failed.exit_code()
            }
        },
        _ = terminate_signal() => {
            info!("SIGTERM received. Aborting.");
            1
        }
        _ = prompt_quit => 0,
    };

    server.shutdown().await;
    std::process::exit(exit_code);
}
