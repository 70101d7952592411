//! Spinner animation for progress lines.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const SPINNER_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Time per spinner frame.
const FRAME_DURATION: Duration = Duration::from_millis(80);

/// Interval between forced animation refreshes while an operation runs.
pub const ANIMATION_REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Time-based spinner: the frame advances with wall time, so refreshes at any
/// cadence produce smooth motion.
pub struct ProgressAnimator {
    started: Instant,
}

impl ProgressAnimator {
    pub fn new() -> ProgressAnimator {
        ProgressAnimator {
            started: Instant::now(),
        }
    }

    pub fn reset(&mut self) {
        self.started = Instant::now();
    }

    pub fn current_frame(&self) -> &'static str {
        let elapsed = self.started.elapsed();
        let index = (elapsed.as_millis() / FRAME_DURATION.as_millis()) as usize;
        SPINNER_FRAMES[index % SPINNER_FRAMES.len()]
    }
}

impl Default for ProgressAnimator {
    fn default() -> Self {
        ProgressAnimator::new()
    }
}

/// Lightweight timer thread that fires a refresh callback at a fixed cadence
/// until stopped. One timer runs per operation so the spinner stays live
/// through long single-file transfers.
pub struct AnimationTimer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AnimationTimer {
    /// Spawns the timer thread; `refresh` runs every tick.
    pub fn start(refresh: impl Fn() + Send + 'static) -> AnimationTimer {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("progress-anim".to_string())
            .spawn(move || {
                while !stop_for_thread.load(Ordering::Relaxed) {
                    std::thread::sleep(ANIMATION_REFRESH_INTERVAL);
                    if stop_for_thread.load(Ordering::Relaxed) {
                        break;
                    }
                    refresh();
                }
            })
            .expect("failed to spawn animation timer");
        AnimationTimer {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AnimationTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
