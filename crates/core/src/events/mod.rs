use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::{NoteLength, Pitch, Position, Result};

/// Identifier of a voice: the player, a creature or a landmark.
pub type SourceId = String;

/// A note that has started sounding. Never mutated after emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEvent {
    pub pitch: Pitch,
    pub length: NoteLength,
    /// Session time the note started, in milliseconds.
    pub timestamp_ms: f64,
    pub source_id: SourceId,
    pub source_position: Option<Position>,
}

/// Anything that wants to hear every note played in the session.
pub trait NoteListener: Send {
    fn on_note_captured(&mut self, event: &NoteEvent) -> Result<()>;

    /// Called when the session tempo changes.
    fn on_tempo_changed(&mut self, _tempo: f64) {}
}

/// Shared, lockable handle to a listener registered on a [`NoteEventBus`].
pub type SharedListener = Arc<Mutex<dyn NoteListener>>;

/// Fan-out of note events to the listeners of one puzzle session.
///
/// The bus belongs to the session; dropping or clearing it on reset is the
/// only way listeners are released in bulk.
#[derive(Default)]
pub struct NoteEventBus {
    listeners: Vec<SharedListener>,
}

impl NoteEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener. Registering the same handle twice has no effect.
    pub fn register(&mut self, listener: SharedListener) {
        if !self.contains(&listener) {
            self.listeners.push(listener);
        }
    }

    /// Removes a listener. Unknown handles are ignored.
    pub fn unregister(&mut self, listener: &SharedListener) {
        self.listeners.retain(|existing| !same_listener(existing, listener));
    }

    pub fn contains(&self, listener: &SharedListener) -> bool {
        self.listeners
            .iter()
            .any(|existing| same_listener(existing, listener))
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    /// Delivers `event` to every listener in registration order and returns
    /// how many accepted it. A failing listener is logged and skipped.
    pub fn emit(&self, event: &NoteEvent) -> usize {
        let mut delivered = 0;
        for (index, listener) in self.listeners.iter().enumerate() {
            let outcome = match listener.lock() {
                Ok(mut guard) => guard.on_note_captured(event),
                Err(_) => Err(crate::ResoundError::ListenerPoisoned(index.to_string())),
            };
            match outcome {
                Ok(()) => delivered += 1,
                Err(err) => tracing::warn!(
                    listener = index,
                    source = %event.source_id,
                    error = %err,
                    "note listener failed"
                ),
            }
        }
        delivered
    }

    /// Tells every listener about a new tempo. Returns how many were reached;
    /// poisoned listeners are logged and skipped.
    pub fn broadcast_tempo(&self, tempo: f64) -> usize {
        let mut reached = 0;
        for (index, listener) in self.listeners.iter().enumerate() {
            match listener.lock() {
                Ok(mut guard) => {
                    guard.on_tempo_changed(tempo);
                    reached += 1;
                }
                Err(_) => tracing::warn!(listener = index, tempo, "note listener poisoned"),
            }
        }
        reached
    }
}

impl std::fmt::Debug for NoteEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteEventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

fn same_listener(a: &SharedListener, b: &SharedListener) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResoundError;

    #[derive(Default)]
    struct Collector {
        heard: Vec<String>,
    }

    impl NoteListener for Collector {
        fn on_note_captured(&mut self, event: &NoteEvent) -> Result<()> {
            self.heard.push(event.pitch.to_string());
            Ok(())
        }
    }

    struct Failing;

    impl NoteListener for Failing {
        fn on_note_captured(&mut self, _event: &NoteEvent) -> Result<()> {
            Err(ResoundError::msg("listener exploded"))
        }
    }

    fn event(pitch: &str) -> NoteEvent {
        NoteEvent {
            pitch: Pitch::name(pitch),
            length: NoteLength::QUARTER,
            timestamp_ms: 0.0,
            source_id: "creature-1".to_string(),
            source_position: None,
        }
    }

    #[test]
    fn tempo_changes_reach_every_listener() {
        #[derive(Default)]
        struct TempoWatcher {
            tempo: Option<f64>,
        }

        impl NoteListener for TempoWatcher {
            fn on_note_captured(&mut self, _event: &NoteEvent) -> Result<()> {
                Ok(())
            }

            fn on_tempo_changed(&mut self, tempo: f64) {
                self.tempo = Some(tempo);
            }
        }

        let mut bus = NoteEventBus::new();
        let watcher = Arc::new(Mutex::new(TempoWatcher::default()));
        bus.register(Arc::new(Mutex::new(Collector::default())));
        bus.register(watcher.clone());

        assert_eq!(bus.broadcast_tempo(90.0), 2);
        assert_eq!(watcher.lock().unwrap().tempo, Some(90.0));
    }

    #[test]
    fn registration_is_idempotent() {
        let mut bus = NoteEventBus::new();
        let collector = Arc::new(Mutex::new(Collector::default()));
        let handle: SharedListener = collector.clone();

        bus.register(handle.clone());
        bus.register(handle.clone());
        assert_eq!(bus.len(), 1);

        bus.emit(&event("C4"));
        assert_eq!(collector.lock().unwrap().heard, vec!["C4"]);

        bus.unregister(&handle);
        bus.unregister(&handle);
        assert!(bus.is_empty());
        assert_eq!(bus.emit(&event("D4")), 0);
    }

    #[test]
    fn failing_listener_does_not_block_others() {
        let mut bus = NoteEventBus::new();
        let before = Arc::new(Mutex::new(Collector::default()));
        let after = Arc::new(Mutex::new(Collector::default()));
        bus.register(before.clone());
        bus.register(Arc::new(Mutex::new(Failing)));
        bus.register(after.clone());

        assert_eq!(bus.emit(&event("E4")), 2);
        assert_eq!(before.lock().unwrap().heard, vec!["E4"]);
        assert_eq!(after.lock().unwrap().heard, vec!["E4"]);
    }

    #[test]
    fn poisoned_listener_is_skipped() {
        let mut bus = NoteEventBus::new();
        let poisoned = Arc::new(Mutex::new(Collector::default()));
        let healthy = Arc::new(Mutex::new(Collector::default()));
        {
            let poisoned = poisoned.clone();
            let _ = std::thread::spawn(move || {
                let _guard = poisoned.lock().unwrap();
                panic!("poison the lock");
            })
            .join();
        }
        bus.register(poisoned);
        bus.register(healthy.clone());

        assert_eq!(bus.emit(&event("G4")), 1);
        assert_eq!(healthy.lock().unwrap().heard, vec!["G4"]);
    }

    #[test]
    fn delivers_in_registration_order() {
        struct Tagger {
            tag: &'static str,
            log: Arc<Mutex<Vec<&'static str>>>,
        }
        impl NoteListener for Tagger {
            fn on_note_captured(&mut self, _event: &NoteEvent) -> Result<()> {
                self.log.lock().unwrap().push(self.tag);
                Ok(())
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = NoteEventBus::new();
        for tag in ["gate", "recorder", "fountain"] {
            bus.register(Arc::new(Mutex::new(Tagger {
                tag,
                log: log.clone(),
            })));
        }
        bus.emit(&event("A4"));
        assert_eq!(*log.lock().unwrap(), vec!["gate", "recorder", "fountain"]);
    }
}
