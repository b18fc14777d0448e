use std::sync::Arc;

use crate::codec::{builders, Direction, Position};
use crate::error::Result;
use crate::protocol::RelayHandle;
use crate::state::SharedWorld;

pub type Injector = Arc<dyn Fn(Vec<u8>) -> Result<()> + Send + Sync>;
pub type ConnectedProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// What an automation task (or the playback engine) sees of the bot:
/// read access to the world plus the injection path to the server.
#[derive(Clone)]
pub struct BotContext {
    world: SharedWorld,
    injector: Injector,
    connected: ConnectedProbe,
}

impl BotContext {
    pub fn new(world: SharedWorld, injector: Injector, connected: ConnectedProbe) -> Self {
        Self {
            world,
            injector,
            connected,
        }
    }

    /// The production wiring: injections and connectivity go through the
    /// game relay.
    pub fn from_relay(world: SharedWorld, relay: RelayHandle) -> Self {
        let inject_handle = relay.clone();
        let probe_handle = relay;
        Self {
            world,
            injector: Arc::new(move |payload| inject_handle.inject_to_server(payload)),
            connected: Arc::new(move || probe_handle.logged_in()),
        }
    }

    pub fn world(&self) -> &SharedWorld {
        &self.world
    }

    pub fn is_connected(&self) -> bool {
        (self.connected)()
    }

    pub fn position(&self) -> Position {
        self.world.position()
    }

    /// Queue a raw payload for injection into the server stream.
    pub fn inject(&self, payload: Vec<u8>) -> Result<()> {
        (self.injector)(payload)
    }

    pub fn walk(&self, direction: Direction) -> Result<()> {
        self.inject(builders::walk(direction))
    }

    pub fn turn(&self, direction: Direction) -> Result<()> {
        self.inject(builders::turn(direction))
    }

    pub fn stop_walk(&self) -> Result<()> {
        self.inject(builders::stop_walk())
    }

    pub fn say(&self, text: &str) -> Result<()> {
        self.inject(builders::say(text))
    }

    pub fn attack(&self, creature_id: u32) -> Result<()> {
        self.inject(builders::attack(creature_id))
    }

    pub fn follow(&self, creature_id: u32) -> Result<()> {
        self.inject(builders::follow(creature_id))
    }

    pub fn use_item(&self, pos: Position, item_id: u16, stack_pos: u8, index: u8) -> Result<()> {
        self.inject(builders::use_item(pos, item_id, stack_pos, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// A context whose injections land in a shared vec.
    fn collecting_context(
        world: SharedWorld,
    ) -> (BotContext, Arc<Mutex<Vec<Vec<u8>>>>) {
        let sent: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = sent.clone();
        let context = BotContext::new(
            world,
            Arc::new(move |payload| {
                sink.lock().unwrap().push(payload);
                Ok(())
            }),
            Arc::new(|| true),
        );
        (context, sent)
    }

    #[test]
    fn test_helpers_inject_built_packets() {
        let world = SharedWorld::new();
        let (context, sent) = collecting_context(world);

        context.walk(Direction::North).unwrap();
        context.say("hi").unwrap();
        context.attack(0x4000_0001).unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0], vec![0x65]);
        assert_eq!(sent[1][0], 0x96);
        assert_eq!(sent[2][0], 0xA1);
    }
}
