//! Status observer actor.
//!
//! Receives table snapshots from the runner on a fixed cadence and renders
//! them. The observer never touches the table: it only sees the immutable
//! snapshots it is sent, so rendering can never slow a seat down.

use std::sync::{Arc, Mutex, PoisonError};

use acton_reactive::prelude::*;
use tracing::debug;

use contention_kernel::{FinalReport, TableSnapshot};

use crate::render::{render_board, render_final};

/// A snapshot to render as one board frame.
#[derive(Debug, Clone)]
pub struct StatusFrame {
    pub snapshot: TableSnapshot,
}

/// The final report, rendered once at shutdown.
#[derive(Debug, Clone)]
pub struct FinalStatus {
    pub report: FinalReport,
}

/// Where rendered frames go.
#[derive(Debug, Clone, Default)]
pub enum FrameSink {
    /// Print to standard output
    #[default]
    Stdout,
    /// Collect in memory
    Buffer(Arc<Mutex<Vec<String>>>),
    /// Count frames without printing
    Discard,
}

impl FrameSink {
    /// In-memory sink plus a handle to read it back.
    pub fn buffer() -> (Self, Arc<Mutex<Vec<String>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        (Self::Buffer(Arc::clone(&frames)), frames)
    }

    fn write(&self, text: String) {
        match self {
            Self::Stdout => println!("{}", text),
            Self::Buffer(frames) => frames
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(text),
            Self::Discard => {}
        }
    }
}

/// State for the status observer actor.
#[derive(Default, Clone)]
pub struct StatusObserverState {
    pub sink: FrameSink,
    /// Frames rendered so far
    pub frames: usize,
    /// Most seats seen Waiting in one frame
    pub peak_waiting: usize,
}

impl std::fmt::Debug for StatusObserverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusObserverState")
            .field("frames", &self.frames)
            .field("peak_waiting", &self.peak_waiting)
            .finish()
    }
}

/// Actor that renders [`StatusFrame`]s and the [`FinalStatus`].
pub struct StatusObserver {
    sink: FrameSink,
}

impl StatusObserver {
    pub fn new(sink: FrameSink) -> Self {
        Self { sink }
    }

    /// Spawn the observer in the runtime.
    pub async fn spawn(self, runtime: &mut ActorRuntime) -> ActorHandle {
        let mut actor =
            runtime.new_actor_with_name::<StatusObserverState>("StatusObserver".to_string());
        actor.model.sink = self.sink;

        actor.mutate_on::<StatusFrame>(|actor, context| {
            let snapshot = &context.message().snapshot;
            actor.model.frames += 1;
            actor.model.peak_waiting = actor.model.peak_waiting.max(snapshot.waiting_count());
            actor.model.sink.write(render_board(snapshot));
            Reply::ready()
        });

        actor.act_on::<FinalStatus>(|actor, context| {
            debug!(
                frames = actor.model.frames,
                peak_waiting = actor.model.peak_waiting,
                "Rendering final status"
            );
            actor.model.sink.write(render_final(&context.message().report));
            Reply::ready()
        });

        actor.start().await
    }
}
