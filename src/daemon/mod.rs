//! Local control surface: a Unix socket speaking one JSON
//! request/response pair per line. The CLI subcommands are thin clients
//! of this; the dashboard talks to the same socket.

pub mod protocol;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::codec::Direction;
use crate::error::{Error, Result};
use crate::supervisor::Supervisor;

pub use protocol::{Request, Response};

/// Serve control requests until aborted.
pub async fn run_control_listener(supervisor: Arc<Supervisor>, socket_path: PathBuf) -> Result<()> {
    let _ = std::fs::remove_file(&socket_path);
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(&socket_path)
        .map_err(|e| Error::Setup(format!("cannot bind control socket: {e}")))?;
    info!(path = %socket_path.display(), "control socket listening");

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let supervisor = supervisor.clone();
                tokio::spawn(handle_client(stream, supervisor));
            }
            Err(e) => warn!(error = %e, "control accept failed"),
        }
    }
}

async fn handle_client(stream: UnixStream, supervisor: Arc<Supervisor>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle_request(&supervisor, request).await,
            Err(e) => Response::err(format!("bad request: {e}")),
        };
        let json = match serde_json::to_string(&response) {
            Ok(json) => json,
            Err(e) => {
                debug!(error = %e, "unserializable response");
                continue;
            }
        };
        if writer.write_all(json.as_bytes()).await.is_err()
            || writer.write_all(b"\n").await.is_err()
        {
            break;
        }
    }
}

async fn handle_request(supervisor: &Supervisor, request: Request) -> Response {
    match request {
        Request::Walk { direction, steps } => {
            let Some(direction) = Direction::parse(&direction) else {
                return Response::err(format!("unknown direction: {direction}"));
            };
            into_response(supervisor.walk(direction, steps).await)
        }
        Request::Turn { direction } => {
            let Some(direction) = Direction::parse(&direction) else {
                return Response::err(format!("unknown direction: {direction}"));
            };
            into_response(supervisor.bot().turn(direction))
        }
        Request::Say { text } => into_response(supervisor.bot().say(&text)),
        Request::Attack { creature_id } => into_response(supervisor.bot().attack(creature_id)),
        Request::Follow { creature_id } => into_response(supervisor.bot().follow(creature_id)),
        Request::StopWalk => into_response(supervisor.bot().stop_walk()),
        Request::Ping => into_response(supervisor.ping()),
        Request::UseItem {
            pos,
            item_id,
            stack_pos,
            index,
        } => into_response(supervisor.bot().use_item(pos, item_id, stack_pos, index)),
        Request::MoveItem {
            from,
            item_id,
            stack_pos,
            to,
            count,
        } => into_response(supervisor.move_item(from, item_id, stack_pos, to, count)),
        Request::LookAt {
            pos,
            item_id,
            stack_pos,
        } => into_response(supervisor.look_at(pos, item_id, stack_pos)),
        Request::SetFightModes { fight, chase, safe } => {
            into_response(supervisor.set_fight_modes(fight, chase, safe))
        }
        Request::Logout => into_response(supervisor.logout()),

        Request::ToggleAction { name, enabled } => {
            into_response(supervisor.host().toggle(&name, enabled))
        }
        Request::RestartAction { name } => into_response(supervisor.host().restart(&name)),
        Request::ListActions => match serde_json::to_value(supervisor.host().list()) {
            Ok(actions) => Response::ok(actions),
            Err(e) => Response::err(e.to_string()),
        },

        Request::StartRecording { name } => into_response(supervisor.start_recording(&name)),
        Request::StopRecording { discard } => match supervisor.stop_recording(discard) {
            Ok(Some(count)) => Response::ok(serde_json::json!({ "waypoints": count })),
            Ok(None) => Response::ok(serde_json::json!({ "saved": false })),
            Err(e) => Response::err(e.to_string()),
        },
        Request::PlayRecording { name, looped } => match supervisor.play_recording(&name, looped)
        {
            Ok(nodes) => Response::ok(serde_json::json!({ "nodes": nodes })),
            Err(e) => Response::err(e.to_string()),
        },
        Request::StopPlayback => {
            Response::ok(serde_json::json!({ "stopped": supervisor.stop_playback() }))
        }
        Request::ListRecordings => match serde_json::to_value(supervisor.recordings().list()) {
            Ok(list) => Response::ok(list),
            Err(e) => Response::err(e.to_string()),
        },
        Request::DeleteRecording { name } => match supervisor.recordings().delete(&name) {
            Ok(deleted) => Response::ok(serde_json::json!({ "deleted": deleted })),
            Err(e) => Response::err(e.to_string()),
        },

        Request::GetStatus => Response::ok(supervisor.status_json()),
    }
}

fn into_response(result: Result<()>) -> Response {
    match result {
        Ok(()) => Response::ok_empty(),
        Err(e) => Response::err(e.to_string()),
    }
}

/// Client side: send one request, read one response.
pub async fn send_request(socket_path: &Path, request: &Request) -> Result<Response> {
    let stream = UnixStream::connect(socket_path).await.map_err(|e| {
        Error::Setup(format!(
            "cannot reach the bot at {} ({e}); is `otbot start` running?",
            socket_path.display()
        ))
    })?;
    let (reader, mut writer) = stream.into_split();

    let json = serde_json::to_string(request)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    let mut lines = BufReader::new(reader).lines();
    match lines.next_line().await? {
        Some(line) => Ok(serde_json::from_str(&line)?),
        None => Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "daemon closed without responding",
        ))),
    }
}
