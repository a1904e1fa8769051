//! Typed incremental-unit pub/sub runtime.
//!
//! Every message that crosses a module boundary is an [`Iu`]: a typed
//! payload plus a small header identifying its producer, its place in that
//! producer's own sequence, and (optionally) the upstream unit it was
//! derived from. Modules subscribe to each other by IU kind; delivery runs
//! over a bounded queue whose overflow behavior (drop-oldest vs
//! bounded-blocking) is chosen per subscription.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

pub mod queue;

pub use queue::{Backpressure, QueueReceiver, QueueSender};

/// Monotonic id, unique per producer, of one emitted [`Iu`].
pub type UnitId = u64;

/// Header carried by every IU regardless of payload: who made it, where it
/// sits in that producer's own stream, and what it was derived from.
#[derive(Debug, Clone)]
pub struct IuHeader {
    pub creator: &'static str,
    pub id: UnitId,
    pub created_at_ms: i64,
    /// Previous IU emitted by the same creator, if any.
    pub previous: Option<UnitId>,
    /// Upstream IU this one was derived/grounded from, if any.
    pub grounded_in: Option<UnitId>,
}

/// Which of the three independent VAD aggregator detectors an edge belongs
/// to (see `duet-vad`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VadKind {
    Turn,
    Ipu,
    Fast,
}

impl VadKind {
    pub fn event_name(self) -> &'static str {
        match self {
            VadKind::Turn => "vad_turn_change",
            VadKind::Ipu => "vad_ipu_change",
            VadKind::Fast => "vad_fast_change",
        }
    }
}

/// One recorded query to the remote turn-relevance predictor.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TrpSample {
    pub trp: f32,
    pub utterance: String,
    pub time_ms: i64,
    pub prediction_time_ms: i64,
}

/// Concrete IU payload kinds consumed/produced by the core (§3).
#[derive(Debug, Clone)]
pub enum Iu {
    /// One acoustic chunk, 10/20/30 ms of PCM.
    AudioFrame {
        header: IuHeader,
        bytes: Arc<[u8]>,
        sample_rate: u32,
        sample_width: u8,
        nframes: usize,
    },
    /// Per-frame speech/non-speech classification.
    VadFrame { header: IuHeader, is_speaking: bool },
    /// A smoothed aggregator state edge.
    VadState {
        header: IuHeader,
        kind: VadKind,
        active: bool,
        probability: f32,
    },
    /// Incremental transcript update.
    Asr {
        header: IuHeader,
        text: String,
        stability: f32,
        is_final: bool,
    },
    /// A request to speak, or (dispatch=false) to abort current speech.
    TextRequest {
        header: IuHeader,
        payload: String,
        dispatch: bool,
    },
    /// Feedback from the dispatch/TTS pipeline.
    DispatchProgress {
        header: IuHeader,
        completion: f32,
        is_dispatching: bool,
        completion_words: String,
    },
}

impl Iu {
    pub fn header(&self) -> &IuHeader {
        match self {
            Iu::AudioFrame { header, .. }
            | Iu::VadFrame { header, .. }
            | Iu::VadState { header, .. }
            | Iu::Asr { header, .. }
            | Iu::TextRequest { header, .. }
            | Iu::DispatchProgress { header, .. } => header,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Iu::AudioFrame { .. } => "audio_frame",
            Iu::VadFrame { .. } => "vad_frame",
            Iu::VadState { .. } => "vad_state",
            Iu::Asr { .. } => "asr",
            Iu::TextRequest { .. } => "text_request",
            Iu::DispatchProgress { .. } => "dispatch_progress",
        }
    }
}

/// Allocates monotonically increasing [`UnitId`]s and headers for one
/// producer. Modules own one of these and stamp every IU they emit.
pub struct IuProducer {
    creator: &'static str,
    next_id: AtomicU64,
    last_id: AtomicU64,
}

impl IuProducer {
    pub fn new(creator: &'static str) -> Self {
        Self {
            creator,
            next_id: AtomicU64::new(0),
            last_id: AtomicU64::new(0),
        }
    }

    /// Stamp a new header, linking it to the last one this producer made.
    pub fn header(&self, created_at_ms: i64, grounded_in: Option<UnitId>) -> IuHeader {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = if id == 0 {
            None
        } else {
            Some(self.last_id.load(Ordering::Relaxed))
        };
        self.last_id.store(id, Ordering::Relaxed);
        IuHeader {
            creator: self.creator,
            id,
            created_at_ms,
            previous,
            grounded_in,
        }
    }
}

/// A module's named, synchronous event callbacks (e.g. `vad_turn_change`).
/// Callbacks run inline on the producing module's worker and must not
/// block; long work belongs on the subscriber's own queue.
#[derive(Default)]
pub struct EventCallbacks<T> {
    callbacks: std::sync::Mutex<std::collections::HashMap<&'static str, Vec<Arc<dyn Fn(&T) + Send + Sync>>>>,
}

impl<T> EventCallbacks<T> {
    pub fn new() -> Self {
        Self {
            callbacks: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn subscribe(&self, event: &'static str, callback: Arc<dyn Fn(&T) + Send + Sync>) {
        self.callbacks
            .lock()
            .expect("event callback registry poisoned")
            .entry(event)
            .or_default()
            .push(callback);
    }

    /// Invoke every callback registered for `event` with `payload`.
    pub fn emit(&self, event: &'static str, payload: &T) {
        let callbacks = self.callbacks.lock().expect("event callback registry poisoned");
        if let Some(list) = callbacks.get(event) {
            for callback in list {
                callback(payload);
            }
        }
    }
}

/// Lifecycle every module obeys: `setup` is idempotent, `run` starts the
/// worker, `stop` signals shutdown and joins. A module must remain safe to
/// stop at any time; partially processed IUs may be discarded.
#[async_trait::async_trait]
pub trait Module: Send {
    fn setup(&mut self) {}
    async fn run(&mut self);
    async fn stop(&mut self);
}

/// Builds a bounded channel pair for one subscription, with the overflow
/// policy chosen at creation time as spec'd: drop-oldest for audio-rate
/// streams, bounded-blocking for control streams.
pub fn channel<T: Send + 'static>(capacity: usize, policy: Backpressure) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        QueueSender::new(tx, policy),
        QueueReceiver::new(rx),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_links_to_previous() {
        let producer = IuProducer::new("vad");
        let h0 = producer.header(0, None);
        let h1 = producer.header(1, None);
        assert_eq!(h0.previous, None);
        assert_eq!(h1.previous, Some(0));
        assert_eq!(h1.id, 1);
    }

    #[test]
    fn iu_kind_is_stable_per_variant() {
        let header = IuProducer::new("asr").header(0, None);
        let iu = Iu::Asr {
            header,
            text: "hi".into(),
            stability: 0.5,
            is_final: false,
        };
        assert_eq!(iu.kind(), "asr");
    }

    #[test]
    fn event_callbacks_invoke_all_subscribers() {
        let bus: EventCallbacks<bool> = EventCallbacks::new();
        let hits = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let hits_a = hits.clone();
        bus.subscribe("vad_turn_change", Arc::new(move |_| {
            hits_a.fetch_add(1, Ordering::Relaxed);
        }));
        let hits_b = hits.clone();
        bus.subscribe("vad_turn_change", Arc::new(move |_| {
            hits_b.fetch_add(1, Ordering::Relaxed);
        }));
        bus.emit("vad_turn_change", &true);
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn event_callbacks_ignore_unrelated_topics() {
        let bus: EventCallbacks<bool> = EventCallbacks::new();
        bus.subscribe("vad_turn_change", Arc::new(|_| panic!("should not fire")));
        bus.emit("vad_ipu_change", &true);
    }
}
