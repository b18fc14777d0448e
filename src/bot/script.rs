//! Lua tasklet runtime.
//!
//! Each task is a Lua file defining `run(bot)`. The host wraps `run` in
//! a coroutine and drives it from a tokio task: `bot.sleep(secs)` yields
//! the requested delay to Rust, which sleeps asynchronously — so every
//! sleep is a cancellation point, and aborting the driver kills the task
//! between (never inside) its steps. Reload is re-reading the file and
//! rebuilding the coroutine, which is what makes on-disk edits visible
//! on restart.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mlua::{Function, Lua, Table, ThreadStatus};
use tracing::{debug, info};

use crate::bot::BotContext;
use crate::codec::{Direction, Position};
use crate::error::{Error, Result};
use crate::state::world::MONSTER_ID_MIN;

/// Bounded per-task log, surfaced through the daemon.
pub type LogRing = Arc<Mutex<VecDeque<String>>>;

pub const LOG_RING_CAPACITY: usize = 100;

pub fn new_log_ring() -> LogRing {
    Arc::new(Mutex::new(VecDeque::with_capacity(LOG_RING_CAPACITY)))
}

pub fn push_log(ring: &LogRing, line: impl Into<String>) {
    let mut ring = ring.lock().unwrap();
    if ring.len() == LOG_RING_CAPACITY {
        ring.pop_front();
    }
    ring.push_back(line.into());
}

/// Run one task script to completion (most loop forever and end only by
/// abort). Lua errors propagate out so the host can log them; peer
/// tasks are unaffected.
pub async fn run_task_script(
    name: &str,
    source: &str,
    bot: BotContext,
    log: LogRing,
) -> Result<()> {
    let lua = Lua::new();
    let bot_table = build_bot_table(&lua, bot, name, log)?;

    lua.load(source).set_name(name).exec()?;
    let run_fn: Function = lua
        .globals()
        .get("run")
        .map_err(|_| Error::Task(format!("task '{name}' defines no run(bot) function")))?;

    let thread = lua.create_thread(run_fn)?;
    let mut first = true;
    loop {
        if thread.status() != ThreadStatus::Resumable {
            break;
        }
        let yielded: Option<f64> = if first {
            first = false;
            thread.resume(bot_table.clone())?
        } else {
            thread.resume(())?
        };
        if thread.status() != ThreadStatus::Resumable {
            break; // run() returned
        }
        let secs = yielded.unwrap_or(0.0).max(0.0);
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }
    debug!(task = name, "task script returned");
    Ok(())
}

/// The `bot` API handed to scripts. Mirrors what the tasklets actually
/// use: world reads, injection helpers, logging, and the lure flag.
fn build_bot_table(lua: &Lua, bot: BotContext, name: &str, log: LogRing) -> Result<Table> {
    let table = lua.create_table()?;

    // sleep must yield from the task coroutine, so it is Lua, not Rust.
    let sleep_fn: Function = lua
        .load("return function(secs) return coroutine.yield(secs or 0) end")
        .eval()?;
    table.set("sleep", sleep_fn)?;

    {
        let task = name.to_string();
        let log = log.clone();
        table.set(
            "log",
            lua.create_function(move |_, message: String| {
                info!(task = %task, "{message}");
                push_log(&log, message);
                Ok(())
            })?,
        )?;
    }

    {
        let bot = bot.clone();
        table.set(
            "is_connected",
            lua.create_function(move |_, ()| Ok(bot.is_connected()))?,
        )?;
    }

    {
        let bot = bot.clone();
        table.set(
            "position",
            lua.create_function(move |_, ()| {
                let pos = bot.position();
                Ok((pos.x, pos.y, pos.z))
            })?,
        )?;
    }

    // Scalar world reads.
    {
        let bot = bot.clone();
        table.set(
            "stats",
            lua.create_function(move |lua, ()| {
                let stats = lua.create_table()?;
                let world = bot.world().read();
                stats.set("hp", world.hp)?;
                stats.set("max_hp", world.max_hp)?;
                stats.set("mana", world.mana)?;
                stats.set("max_mana", world.max_mana)?;
                stats.set("level", world.level)?;
                stats.set("capacity", world.capacity)?;
                stats.set("soul", world.soul)?;
                Ok(stats)
            })?,
        )?;
    }

    {
        let bot = bot.clone();
        table.set(
            "creatures",
            lua.create_function(move |lua, ()| {
                let list = lua.create_table()?;
                let world = bot.world().read();
                for (index, (id, info)) in world.creatures().iter().enumerate() {
                    let entry = lua.create_table()?;
                    entry.set("id", *id)?;
                    entry.set("health", info.health)?;
                    entry.set("x", info.x)?;
                    entry.set("y", info.y)?;
                    entry.set("z", info.z)?;
                    entry.set("name", info.name.clone())?;
                    entry.set("is_monster", *id >= MONSTER_ID_MIN)?;
                    list.set(index + 1, entry)?;
                }
                Ok(list)
            })?,
        )?;
    }

    {
        let bot = bot.clone();
        table.set(
            "attack_target",
            lua.create_function(move |_, ()| Ok(bot.world().read().attack_target_id))?,
        )?;
    }

    {
        let bot = bot.clone();
        table.set(
            "lure_active",
            lua.create_function(move |_, ()| Ok(bot.world().read().lure_active))?,
        )?;
    }

    {
        let bot = bot.clone();
        table.set(
            "set_attack_target",
            lua.create_function(move |_, id: u32| {
                bot.world().write().attack_target_id = id;
                Ok(())
            })?,
        )?;
    }

    // Injection helpers. Failures (not logged in yet) are soft.
    {
        let bot = bot.clone();
        table.set(
            "say",
            lua.create_function(move |_, text: String| {
                let _ = bot.say(&text);
                Ok(())
            })?,
        )?;
    }

    {
        let bot = bot.clone();
        table.set(
            "walk",
            lua.create_function(move |_, direction: String| {
                let Some(direction) = Direction::parse(&direction) else {
                    return Err(mlua::Error::RuntimeError(format!(
                        "unknown direction: {direction}"
                    )));
                };
                let _ = bot.walk(direction);
                Ok(())
            })?,
        )?;
    }

    {
        let bot = bot.clone();
        table.set(
            "attack",
            lua.create_function(move |_, id: u32| {
                let _ = bot.attack(id);
                Ok(())
            })?,
        )?;
    }

    {
        let bot = bot.clone();
        table.set(
            "stop_walk",
            lua.create_function(move |_, ()| {
                let _ = bot.stop_walk();
                Ok(())
            })?,
        )?;
    }

    {
        let bot = bot.clone();
        table.set(
            "use_item",
            lua.create_function(
                move |_, (x, y, z, item_id, stack_pos, index): (u16, u16, u8, u16, u8, u8)| {
                    let _ = bot.use_item(Position::new(x, y, z), item_id, stack_pos, index);
                    Ok(())
                },
            )?,
        )?;
    }

    {
        let bot = bot.clone();
        table.set(
            "inject",
            lua.create_function(move |_, payload: mlua::String| {
                let _ = bot.inject(payload.as_bytes().to_vec());
                Ok(())
            })?,
        )?;
    }

    Ok(table)
}
