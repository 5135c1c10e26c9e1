//! Background dictation listener.
//!
//! One long-lived worker thread loops: block until signaled to listen,
//! capture a phrase, transcribe it, hand the result back to the control
//! thread, block again. The listen intent can be set and cleared from the
//! control thread; clearing it cancels a pending listen but never an
//! in-progress capture. Results travel over a channel drained by the
//! application's message pump; the worker never touches shared UI state.

pub mod transcriber;

use std::sync::{Arc, Condvar, Mutex};
use tokio::sync::mpsc::UnboundedSender;

use transcriber::{TranscriptionError, TranscriptionSource};

/// Progress and results from the listener worker.
#[derive(Debug, Clone)]
pub enum AudioEvent {
    Listening,
    Transcribing,
    Transcript(String),
    Failed(TranscriptionError),
}

/// Settable flag the worker blocks on between phrases.
#[derive(Default)]
struct ListenIntent {
    flag: Mutex<bool>,
    signal: Condvar,
}

impl ListenIntent {
    fn wait(&self) {
        let mut flag = self.flag.lock().unwrap();
        while !*flag {
            flag = self.signal.wait(flag).unwrap();
        }
    }

    /// Returns true when the intent was newly set.
    fn set(&self) -> bool {
        let mut flag = self.flag.lock().unwrap();
        let was_set = *flag;
        *flag = true;
        self.signal.notify_one();
        !was_set
    }

    fn clear(&self) {
        *self.flag.lock().unwrap() = false;
    }
}

/// Control-thread handle to the listener worker.
pub struct AudioHandler {
    intent: Arc<ListenIntent>,
}

impl AudioHandler {
    /// Spawn the listener thread. The transcription source is constructed
    /// inside the thread so implementations may hold thread-bound state
    /// (the blocking HTTP client, device handles).
    pub fn spawn<S, F>(make_source: F, events: UnboundedSender<AudioEvent>) -> Self
    where
        S: TranscriptionSource,
        F: FnOnce() -> S + Send + 'static,
    {
        let intent = Arc::new(ListenIntent::default());
        let worker_intent = Arc::clone(&intent);

        std::thread::Builder::new()
            .name("audio-listener".to_string())
            .spawn(move || listener_loop(make_source(), worker_intent, events))
            .expect("failed to spawn audio listener thread");

        Self { intent }
    }

    /// Signal the worker to start listening. Returns true when this call
    /// set the intent (it was not already listening).
    pub fn request_listen(&self) -> bool {
        self.intent.set()
    }

    /// Withdraw a pending listen intent. An in-progress capture runs to
    /// completion; only the blocked wait is cancelled.
    pub fn cancel_listen(&self) {
        self.intent.clear();
    }
}

fn listener_loop<S: TranscriptionSource>(
    mut source: S,
    intent: Arc<ListenIntent>,
    events: UnboundedSender<AudioEvent>,
) {
    loop {
        intent.wait();

        if events.send(AudioEvent::Listening).is_err() {
            return;
        }

        let clip = match source.capture() {
            Ok(clip) => clip,
            Err(e) => {
                tracing::warn!(error = %e, "Audio capture failed");
                intent.clear();
                if events.send(AudioEvent::Failed(e)).is_err() {
                    return;
                }
                continue;
            }
        };

        // The phrase is in hand; stop listening while we transcribe.
        intent.clear();
        if events.send(AudioEvent::Transcribing).is_err() {
            return;
        }

        let event = match source.transcribe(clip) {
            Ok(text) => {
                tracing::info!(text = %text, "Transcription received");
                AudioEvent::Transcript(text)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Transcription failed");
                AudioEvent::Failed(e)
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
}
