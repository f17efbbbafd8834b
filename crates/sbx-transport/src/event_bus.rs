//! Event bus (C3): maps `event_name -> handler set` and dispatches each
//! inbound frame to handlers registered by `msg_type` and by `channel`.
//!
//! Per `spec.md` §4.3, dispatch iterates a snapshot so a handler that
//! registers/unregisters another handler mid-dispatch can't corrupt the
//! iteration, and a handler that panics is caught and logged rather than
//! aborting the remaining handlers for that frame.

use sbx_wire::Frame;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

pub type Handler = Box<dyn FnMut(&Frame) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// A handler registration key: either a `msg_type` or a `channel` name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    MsgType(String),
    Channel(String),
}

#[derive(Default)]
pub struct EventBus {
    handlers: HashMap<Key, Vec<(HandlerId, Handler)>>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, key: Key, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers.entry(key).or_default().push((id, handler));
        id
    }

    pub fn off(&mut self, id: HandlerId) {
        for handlers in self.handlers.values_mut() {
            handlers.retain(|(existing, _)| *existing != id);
        }
    }

    pub fn off_all(&mut self, key: &Key) {
        self.handlers.remove(key);
    }

    /// Dispatch `frame` to every handler registered for its `msg_type`, then
    /// every handler registered for its `channel`. Each runs exactly once.
    pub fn dispatch(&mut self, frame: &Frame) {
        self.dispatch_key(&Key::MsgType(frame.msg_type.clone()), frame);
        if !frame.channel.is_empty() {
            self.dispatch_key(&Key::Channel(frame.channel.clone()), frame);
        }
    }

    fn dispatch_key(&mut self, key: &Key, frame: &Frame) {
        let Some(handlers) = self.handlers.get_mut(key) else {
            return;
        };
        // Snapshot the ids so a handler registering/unregistering mid-pass
        // doesn't change which handlers this dispatch reaches.
        let ids: Vec<HandlerId> = handlers.iter().map(|(id, _)| *id).collect();
        for id in ids {
            let Some(handlers) = self.handlers.get_mut(key) else {
                break;
            };
            let Some((_, handler)) = handlers.iter_mut().find(|(hid, _)| *hid == id) else {
                continue;
            };
            // A throwing handler must not prevent others from running.
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(frame)));
            if let Err(payload) = result {
                tracing::warn!(
                    key = ?key,
                    "event handler panicked, isolating from remaining handlers: {:?}",
                    panic_message(&payload)
                );
            }
        }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbx_wire::Payload;
    use std::sync::{Arc, Mutex};

    fn frame(channel: &str, msg_type: &str) -> Frame {
        Frame::data(channel, msg_type, Payload::Empty)
    }

    #[test]
    fn dispatches_to_both_msg_type_and_channel_handlers_once_each() {
        let mut bus = EventBus::new();
        let type_calls = Arc::new(Mutex::new(0));
        let chan_calls = Arc::new(Mutex::new(0));

        {
            let c = Arc::clone(&type_calls);
            bus.on(
                Key::MsgType("file:changed".to_owned()),
                Box::new(move |_| *c.lock().unwrap() += 1),
            );
        }
        {
            let c = Arc::clone(&chan_calls);
            bus.on(
                Key::Channel("watcher:1".to_owned()),
                Box::new(move |_| *c.lock().unwrap() += 1),
            );
        }

        bus.dispatch(&frame("watcher:1", "file:changed"));

        assert_eq!(*type_calls.lock().unwrap(), 1);
        assert_eq!(*chan_calls.lock().unwrap(), 1);
    }

    #[test]
    fn off_removes_only_the_targeted_handler() {
        let mut bus = EventBus::new();
        let calls = Arc::new(Mutex::new(0));
        let c1 = Arc::clone(&calls);
        let id1 = bus.on(
            Key::MsgType("signal".to_owned()),
            Box::new(move |_| *c1.lock().unwrap() += 1),
        );
        let c2 = Arc::clone(&calls);
        bus.on(
            Key::MsgType("signal".to_owned()),
            Box::new(move |_| *c2.lock().unwrap() += 1),
        );

        bus.off(id1);
        bus.dispatch(&frame("signals", "signal"));

        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn off_all_clears_every_handler_for_the_event() {
        let mut bus = EventBus::new();
        let calls = Arc::new(Mutex::new(0));
        for _ in 0..3 {
            let c = Arc::clone(&calls);
            bus.on(
                Key::MsgType("terminal:output".to_owned()),
                Box::new(move |_| *c.lock().unwrap() += 1),
            );
        }

        bus.off_all(&Key::MsgType("terminal:output".to_owned()));
        bus.dispatch(&frame("terminal:1", "terminal:output"));

        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn a_panicking_handler_does_not_block_the_others() {
        let mut bus = EventBus::new();
        let calls = Arc::new(Mutex::new(0));

        bus.on(
            Key::MsgType("terminal:output".to_owned()),
            Box::new(|_| panic!("boom")),
        );
        let c = Arc::clone(&calls);
        bus.on(
            Key::MsgType("terminal:output".to_owned()),
            Box::new(move |_| *c.lock().unwrap() += 1),
        );

        bus.dispatch(&frame("terminal:1", "terminal:output"));

        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
