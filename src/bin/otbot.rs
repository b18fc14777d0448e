use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use otbot::codec::Position;
use otbot::config::{self, Config};
use otbot::daemon::{self, Request};
use otbot::error::{Error, Result};
use otbot::supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "otbot", about = "MITM automation proxy for Open Tibia style game clients")]
struct Cli {
    /// Data directory (recordings, tasks, settings, control socket)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the proxy, task host, and control daemon
    Start {
        /// Upstream game server (IPv4)
        #[arg(long, default_value = config::DEFAULT_SERVER_HOST)]
        server: String,
        #[arg(long, default_value_t = config::DEFAULT_LOGIN_PORT)]
        login_port: u16,
        #[arg(long, default_value_t = config::DEFAULT_GAME_PORT)]
        game_port: u16,
    },

    /// Walk in a direction (n/s/e/w/ne/se/sw/nw)
    Walk {
        direction: String,
        #[arg(default_value_t = 1)]
        steps: u32,
    },
    /// Turn to face a direction
    Turn { direction: String },
    /// Say something in game
    Say { text: Vec<String> },
    /// Attack a creature by ID (decimal or 0x-hex)
    Attack {
        #[arg(value_parser = parse_creature_id)]
        creature_id: u32,
    },
    /// Follow a creature by ID
    Follow {
        #[arg(value_parser = parse_creature_id)]
        creature_id: u32,
    },
    /// Stop walking
    Stop,
    /// Use an item on the map or in a container
    UseItem {
        x: u16,
        y: u16,
        z: u8,
        item_id: u16,
        #[arg(default_value_t = 0)]
        stack_pos: u8,
        #[arg(default_value_t = 0)]
        index: u8,
    },
    /// Move an item between positions
    #[command(name = "move-item")]
    MoveItem {
        from_x: u16,
        from_y: u16,
        from_z: u8,
        item_id: u16,
        stack_pos: u8,
        to_x: u16,
        to_y: u16,
        to_z: u8,
        #[arg(default_value_t = 1)]
        count: u8,
    },
    /// Look at a position
    LookAt {
        x: u16,
        y: u16,
        z: u8,
        item_id: u16,
        #[arg(default_value_t = 0)]
        stack_pos: u8,
    },
    /// Set fight/chase/safe modes
    SetFightModes { fight: u8, chase: u8, safe: u8 },
    /// Log out of the game
    Logout,

    /// Enable or disable an automation task (on/off)
    ToggleAction { name: String, state: String },
    /// Reload an automation task from disk and restart it
    RestartAction { name: String },
    /// List automation tasks
    ListActions,

    /// Begin recording waypoints under a name
    StartRecording { name: String },
    /// Stop the active recording
    StopRecording {
        #[arg(long)]
        discard: bool,
    },
    /// Play a recording through the cavebot
    PlayRecording {
        name: String,
        #[arg(long = "loop")]
        looped: bool,
    },
    /// Stop playback
    StopPlayback,
    /// List saved recordings
    ListRecordings,
    /// Delete a recording
    DeleteRecording { name: String },

    /// Show the live bot status
    Status,
}

fn parse_creature_id(value: &str) -> std::result::Result<u32, String> {
    let parsed = if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        value.parse()
    };
    parsed.map_err(|_| format!("invalid creature id: {value}"))
}

fn parse_on_off(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => Err(Error::Setup(format!("expected on/off, got: {other}"))),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = cli.data_dir.unwrap_or_else(Config::default_data_dir);

    if let Err(e) = run(cli.command, data_dir).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Command, data_dir: PathBuf) -> Result<()> {
    match command {
        Command::Start {
            server,
            login_port,
            game_port,
        } => {
            let mut config = Config::new(server, data_dir);
            config.login_port = login_port;
            config.game_port = game_port;
            let socket_path = config.control_socket_path();

            let supervisor = Supervisor::new(config)?;
            let control = tokio::spawn(daemon::run_control_listener(
                supervisor.clone(),
                socket_path,
            ));
            let result = supervisor.run().await;
            control.abort();
            result
        }
        other => {
            let request = build_request(other)?;
            let socket_path = data_dir.join("otbot.sock");
            let response = daemon::send_request(&socket_path, &request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
    }
}

fn build_request(command: Command) -> Result<Request> {
    Ok(match command {
        Command::Start { .. } => unreachable!("handled by the caller"),
        Command::Walk { direction, steps } => Request::Walk { direction, steps },
        Command::Turn { direction } => Request::Turn { direction },
        Command::Say { text } => Request::Say {
            text: text.join(" "),
        },
        Command::Attack { creature_id } => Request::Attack { creature_id },
        Command::Follow { creature_id } => Request::Follow { creature_id },
        Command::Stop => Request::StopWalk,
        Command::UseItem {
            x,
            y,
            z,
            item_id,
            stack_pos,
            index,
        } => Request::UseItem {
            pos: Position::new(x, y, z),
            item_id,
            stack_pos,
            index,
        },
        Command::MoveItem {
            from_x,
            from_y,
            from_z,
            item_id,
            stack_pos,
            to_x,
            to_y,
            to_z,
            count,
        } => Request::MoveItem {
            from: Position::new(from_x, from_y, from_z),
            item_id,
            stack_pos,
            to: Position::new(to_x, to_y, to_z),
            count,
        },
        Command::LookAt {
            x,
            y,
            z,
            item_id,
            stack_pos,
        } => Request::LookAt {
            pos: Position::new(x, y, z),
            item_id,
            stack_pos,
        },
        Command::SetFightModes { fight, chase, safe } => {
            Request::SetFightModes { fight, chase, safe }
        }
        Command::Logout => Request::Logout,
        Command::ToggleAction { name, state } => Request::ToggleAction {
            name,
            enabled: parse_on_off(&state)?,
        },
        Command::RestartAction { name } => Request::RestartAction { name },
        Command::ListActions => Request::ListActions,
        Command::StartRecording { name } => Request::StartRecording { name },
        Command::StopRecording { discard } => Request::StopRecording { discard },
        Command::PlayRecording { name, looped } => Request::PlayRecording { name, looped },
        Command::StopPlayback => Request::StopPlayback,
        Command::ListRecordings => Request::ListRecordings,
        Command::DeleteRecording { name } => Request::DeleteRecording { name },
        Command::Status => Request::GetStatus,
    })
}
