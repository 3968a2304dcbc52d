use log::{debug, warn};

use crate::event::{Event, EventKind};

pub type Listener = Box<dyn FnMut(&Event) -> anyhow::Result<()> + Send>;

struct Subscription {
    name: String,
    /// `None` subscribes to every event kind.
    filter: Option<EventKind>,
    listener: Listener,
}

/// Input fusion bus: merges events from named sources into one stream and
/// fans each event out synchronously, in registration order, to the
/// subscribers of its kind plus every wildcard subscriber.
///
/// The bus is a demultiplexer, not a queue: there is no buffering, and
/// delivery happens on the thread the source published from. A listener
/// that returns an error is logged and does not block its siblings.
pub struct FusionBus {
    sources: Vec<String>,
    subscriptions: Vec<Subscription>,
}

impl Default for FusionBus {
    fn default() -> Self {
        Self::new()
    }
}

impl FusionBus {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            subscriptions: Vec::new(),
        }
    }

    /// Registers a named source. The source's lifetime stays with the
    /// caller; the bus only tracks whether its events are forwarded.
    pub fn register_source(&mut self, name: &str) -> bool {
        if self.is_registered(name) {
            warn!("Source {} already registered", name);
            return false;
        }
        debug!("Source registered: {}", name);
        self.sources.push(name.to_string());
        true
    }

    /// Stops delivery for a source without freeing it.
    pub fn unregister_source(&mut self, name: &str) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s != name);
        if self.sources.len() == before {
            warn!("Unregister of unknown source {}", name);
            return false;
        }
        debug!("Source unregistered: {}", name);
        true
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.sources.iter().any(|s| s == name)
    }

    pub fn subscribe(&mut self, name: &str, kind: EventKind, listener: Listener) {
        self.subscriptions.push(Subscription {
            name: name.to_string(),
            filter: Some(kind),
            listener,
        });
    }

    /// Wildcard subscription: receives every event from every source.
    pub fn subscribe_all(&mut self, name: &str, listener: Listener) {
        self.subscriptions.push(Subscription {
            name: name.to_string(),
            filter: None,
            listener,
        });
    }

    pub fn unsubscribe(&mut self, name: &str) {
        self.subscriptions.retain(|s| s.name != name);
    }

    /// Delivers `event` to matching subscribers; returns how many were
    /// reached. Events from unregistered sources are dropped.
    pub fn publish(&mut self, event: &Event) -> usize {
        if let Some(source) = event.source() {
            if !self.is_registered(source) {
                debug!("Dropping event from unregistered source {}", source);
                return 0;
            }
        }
        let kind = event.kind();
        let mut delivered = 0;
        for sub in self.subscriptions.iter_mut() {
            if sub.filter.map_or(true, |f| f == kind) {
                if let Err(e) = (sub.listener)(event) {
                    warn!("Listener {} failed on {:?} event: {}", sub.name, kind, e);
                }
                delivered += 1;
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TransportState;
    use std::sync::{Arc, Mutex};

    fn note(source: &str, note: u8) -> Event {
        Event::Note {
            note,
            velocity: 100,
            channel: 0,
            source: source.to_string(),
        }
    }

    #[test]
    fn fan_out_in_registration_order() {
        let mut bus = FusionBus::new();
        bus.register_source("midi");
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let order = order.clone();
            bus.subscribe(
                name,
                EventKind::Note,
                Box::new(move |_| {
                    order.lock().unwrap().push(name);
                    Ok(())
                }),
            );
        }
        assert_eq!(bus.publish(&note("midi", 60)), 3);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn kind_filter_and_wildcard_see_the_right_events() {
        let mut bus = FusionBus::new();
        bus.register_source("midi");
        let notes = Arc::new(Mutex::new(0));
        let all = Arc::new(Mutex::new(0));
        {
            let notes = notes.clone();
            bus.subscribe(
                "notes-only",
                EventKind::Note,
                Box::new(move |_| {
                    *notes.lock().unwrap() += 1;
                    Ok(())
                }),
            );
            let all = all.clone();
            bus.subscribe_all(
                "everything",
                Box::new(move |_| {
                    *all.lock().unwrap() += 1;
                    Ok(())
                }),
            );
        }
        bus.publish(&note("midi", 60));
        bus.publish(&Event::Transport {
            state: TransportState::Play,
            bpm: None,
            source: "midi".to_string(),
        });
        assert_eq!(*notes.lock().unwrap(), 1);
        assert_eq!(*all.lock().unwrap(), 2);
    }

    #[test]
    fn unregistered_source_is_dropped() {
        let mut bus = FusionBus::new();
        bus.register_source("midi");
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        bus.subscribe(
            "notes",
            EventKind::Note,
            Box::new(move |_| {
                *c.lock().unwrap() += 1;
                Ok(())
            }),
        );
        assert_eq!(bus.publish(&note("unknown", 60)), 0);
        bus.unregister_source("midi");
        assert_eq!(bus.publish(&note("midi", 60)), 0);
        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[test]
    fn duplicate_registration_is_refused() {
        let mut bus = FusionBus::new();
        assert!(bus.register_source("midi"));
        assert!(!bus.register_source("midi"));
        assert!(bus.unregister_source("midi"));
        assert!(!bus.unregister_source("midi"));
    }

    #[test]
    fn failing_listener_does_not_block_siblings() {
        let mut bus = FusionBus::new();
        bus.register_source("midi");
        let reached = Arc::new(Mutex::new(false));
        bus.subscribe(
            "bad",
            EventKind::Note,
            Box::new(|_| Err(anyhow::anyhow!("listener error"))),
        );
        let r = reached.clone();
        bus.subscribe(
            "good",
            EventKind::Note,
            Box::new(move |_| {
                *r.lock().unwrap() = true;
                Ok(())
            }),
        );
        assert_eq!(bus.publish(&note("midi", 60)), 2);
        assert!(*reached.lock().unwrap());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut bus = FusionBus::new();
        bus.register_source("midi");
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        bus.subscribe_all(
            "observer",
            Box::new(move |_| {
                *c.lock().unwrap() += 1;
                Ok(())
            }),
        );
        bus.publish(&note("midi", 60));
        bus.unsubscribe("observer");
        bus.publish(&note("midi", 61));
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
