//! Cancellation and Level Monitoring
//!
//! Long-running control loops stop through an explicit [`CancellationToken`]
//! rather than a process-wide flag. The audio thread never looks at it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::engine::EngineControl;
use crate::error::{EngineError, EngineResult, TransportError};
use crate::message::Event;

/// Shared stop request for control-thread waits and loops
///
/// A child token is cancelled together with its parent, but cancelling
/// the child leaves the parent alone.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    parent: Option<Arc<CancellationToken>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also observes every cancellation of `self`
    pub fn child_token(&self) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::new(self.clone())),
        }
    }

    /// Request cancellation; every clone and child observes it
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.parent.as_ref().is_some_and(|parent| parent.is_cancelled())
    }
}

/// Background thread that polls the engine for levels
///
/// Emits [`Event::Levels`] or [`Event::Error`] every interval and a final
/// [`Event::Stopped`].
pub struct LevelMonitor {
    token: CancellationToken,
    wake: Sender<()>,
    events: Receiver<Event>,
    thread: Option<JoinHandle<()>>,
}

impl LevelMonitor {
    /// Start polling `control` every `interval`, waiting at most `timeout`
    /// for each reading
    ///
    /// The monitor's token is a child of the control's: cancelling the
    /// control stops the monitor, and [`stop`](Self::stop) also ends a
    /// reading that is still waiting for the audio thread.
    pub fn spawn(control: EngineControl, interval: Duration, timeout: Duration) -> EngineResult<Self> {
        let token = control.token().child_token();
        let control = control.with_cancellation(token.clone());
        let (wake, wake_receiver) = bounded::<()>(1);
        let (event_sender, events) = unbounded::<Event>();

        let thread_token = token.clone();
        let thread = thread::Builder::new()
            .name("bandguard-levels".into())
            .spawn(move || {
                Self::run(control, interval, timeout, thread_token, wake_receiver, event_sender);
            })
            .map_err(|e| EngineError::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            token,
            wake,
            events,
            thread: Some(thread),
        })
    }

    fn run(
        control: EngineControl,
        interval: Duration,
        timeout: Duration,
        token: CancellationToken,
        wake: Receiver<()>,
        events: Sender<Event>,
    ) {
        info!("Level monitor started");
        while !token.is_cancelled() {
            let event = match control.get_levels(timeout) {
                Ok(levels) => Event::Levels(levels),
                Err(EngineError::Transport(TransportError::Cancelled)) => break,
                Err(e) => {
                    warn!("Level read failed: {}", e);
                    Event::error(e)
                }
            };
            if events.send(event).is_err() {
                debug!("Level monitor has no listener");
                break;
            }
            match wake.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        let _ = events.send(Event::Stopped);
        info!("Level monitor stopped");
    }

    /// Receiver of the monitor's events
    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }

    /// Cancel the token and wait for the thread to finish
    pub fn stop(&mut self) {
        self.token.cancel();
        let _ = self.wake.try_send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Level monitor thread panicked");
            }
        }
    }
}

impl Drop for LevelMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpeakerConfig;
    use crate::engine::SpeakerEngine;

    #[test]
    fn test_token_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_child_token_follows_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        let grandchild = child.child_token();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled(), "grandchild follows child");
        assert!(!parent.is_cancelled(), "child does not cancel parent");

        let other = parent.child_token();
        parent.cancel();
        assert!(other.is_cancelled(), "child follows parent");
    }

    #[test]
    fn test_stop_ends_pending_read() {
        // No audio thread: the second reading waits for the full timeout
        let (_engine, control) = SpeakerEngine::new(&SpeakerConfig::default()).unwrap();
        let mut monitor =
            LevelMonitor::spawn(control.clone(), Duration::from_millis(1), Duration::from_secs(5)).unwrap();
        let event = monitor.events().recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, Event::Levels(_)), "got {:?}", event);
        thread::sleep(Duration::from_millis(50));

        let start = std::time::Instant::now();
        monitor.stop();
        assert!(start.elapsed() < Duration::from_secs(1), "stop took {:?}", start.elapsed());
        assert!(!monitor.is_running());
        assert!(!control.token().is_cancelled(), "control stays usable");
    }

    #[test]
    fn test_control_cancel_stops_monitor() {
        let (_engine, control) = SpeakerEngine::new(&SpeakerConfig::default()).unwrap();
        let monitor = LevelMonitor::spawn(control.clone(), Duration::from_millis(1), Duration::from_secs(5)).unwrap();
        control.cancel();
        let stopped = monitor
            .events()
            .iter()
            .any(|event| matches!(event, Event::Stopped));
        assert!(stopped);
    }

    #[test]
    fn test_monitor_reports_levels() {
        let (mut engine, control) = SpeakerEngine::new(&SpeakerConfig::default()).unwrap();
        engine.update_metrics(48000.0, 64).unwrap();

        let stop = CancellationToken::new();
        let audio_stop = stop.clone();
        let audio = thread::spawn(move || {
            let input = vec![0.1_f32; 64];
            let inputs = [input.as_slice(), input.as_slice()];
            let mut buffers = vec![vec![0.0_f32; 64]; 3];
            while !audio_stop.is_cancelled() {
                let mut outputs: Vec<&mut [f32]> = buffers.iter_mut().map(|b| b.as_mut_slice()).collect();
                engine.process(64, &inputs, &mut outputs).unwrap();
                thread::sleep(Duration::from_millis(1));
            }
        });

        let mut monitor =
            LevelMonitor::spawn(control, Duration::from_millis(5), Duration::from_millis(500)).unwrap();
        let event = monitor.events().recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, Event::Levels(_)), "got {:?}", event);

        monitor.stop();
        assert!(!monitor.is_running());
        let last = monitor.events().try_iter().last();
        assert!(matches!(last, Some(Event::Stopped)), "got {:?}", last);

        stop.cancel();
        audio.join().unwrap();
    }

    #[test]
    fn test_monitor_reports_timeouts() {
        // No audio thread: after the first exchange nothing is consumed
        let (_engine, control) = SpeakerEngine::new(&SpeakerConfig::default()).unwrap();
        let monitor = LevelMonitor::spawn(control, Duration::from_millis(1), Duration::from_millis(10)).unwrap();

        let timed_out = monitor
            .events()
            .iter()
            .take(5)
            .any(|event| matches!(event, Event::Error { .. }));
        assert!(timed_out);
    }
}
