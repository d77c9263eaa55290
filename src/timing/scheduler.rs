use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::CancellationToken;
use crate::audio::{AudioSink, Volume};
use crate::events::{Action, Millis, PinId, Timeline};
use crate::hardware::{AssetStore, DigitalOutputPort, Level};

/// Capability handles a run actuates.
#[derive(Clone)]
pub struct Hardware {
    pub pins: Arc<dyn DigitalOutputPort>,
    pub audio: Arc<dyn AudioSink>,
    pub assets: Arc<dyn AssetStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    pub drain_poll_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            drain_poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

/// Pins written during one run; all of them are forced low when it ends.
#[derive(Default)]
struct PinBook {
    configured: BTreeSet<PinId>,
}

impl PinBook {
    fn set(&mut self, pins: &dyn DigitalOutputPort, pin: PinId, level: Level) {
        if !self.configured.contains(&pin) {
            if let Err(e) = pins.configure_as_output(pin) {
                warn!(pin, error = %e, "failed to configure output");
                return;
            }
            self.configured.insert(pin);
        }

        match pins.set_level(pin, level) {
            Ok(()) => debug!(pin, ?level, "pin set"),
            Err(e) => warn!(pin, ?level, error = %e, "pin write failed"),
        }
    }

    fn release(&self, pins: &dyn DigitalOutputPort) {
        for &pin in &self.configured {
            if let Err(e) = pins.set_level(pin, Level::Off) {
                warn!(pin, error = %e, "failed to release pin");
            }
        }
    }
}

fn play(hw: &Hardware, asset: &str, volume: u32) {
    let volume = Volume::from_percent(volume);
    let result = hw
        .assets
        .locate(asset)
        .map_err(Into::into)
        .and_then(|path| hw.audio.play(&path, volume));

    match result {
        Ok(()) => info!(asset, volume = volume.percent(), "audio started"),
        Err(e) => warn!(asset, error = %e, "skipping audio"),
    }
}

/// Waits for playback to end, then removes every asset the timeline names.
fn drain(timeline: &Timeline, hw: &Hardware, cancel: &CancellationToken, settings: &SchedulerSettings) {
    while hw.audio.is_busy() {
        if cancel.is_cancelled() {
            info!("drain interrupted, stopping playback");
            hw.audio.stop_all();
            break;
        }
        thread::sleep(settings.drain_poll_interval);
    }

    for asset in timeline.assets() {
        match hw.assets.delete(asset) {
            Ok(()) => debug!(asset, "removed played asset"),
            Err(e) => warn!(asset, error = %e, "failed to remove asset"),
        }
    }
}

/// Walks `timeline` against the wall clock, dispatching each entry once its
/// time has passed.
///
/// The token is polled before every due entry; when set, audio is stopped,
/// every pin touched so far is driven low and the run ends without the
/// drain/delete phase.
pub fn run(
    timeline: &Timeline,
    hw: &Hardware,
    cancel: &CancellationToken,
    settings: &SchedulerSettings,
) -> RunOutcome {
    let started = Instant::now();
    let events = timeline.events();
    let mut pins = PinBook::default();
    let mut next = 0;

    info!(entries = events.len(), stop_at = timeline.stop_at(), "timeline started");

    loop {
        let elapsed = started.elapsed().as_millis() as Millis;

        while let Some(event) = events.get(next) {
            if cancel.is_cancelled() {
                info!(elapsed, "timeline cancelled");
                hw.audio.stop_all();
                pins.release(hw.pins.as_ref());
                return RunOutcome::Cancelled;
            }
            if event.at > elapsed {
                break;
            }
            next += 1;

            for action in &event.actions {
                match action {
                    Action::PinOn(pin) => pins.set(hw.pins.as_ref(), *pin, Level::On),
                    Action::PinOff(pin) => pins.set(hw.pins.as_ref(), *pin, Level::Off),
                    Action::PlayAudio { asset, volume } => play(hw, asset, *volume),
                    Action::Stop => {
                        info!(at = event.at, "stop reached, draining");
                        drain(timeline, hw, cancel, settings);
                        pins.release(hw.pins.as_ref());
                        info!(elapsed = started.elapsed().as_millis() as Millis, "timeline completed");
                        return RunOutcome::Completed;
                    }
                }
            }
        }

        if next >= events.len() {
            // Unreachable for compiled timelines, which always end in Stop.
            pins.release(hw.pins.as_ref());
            return RunOutcome::Completed;
        }

        thread::sleep(settings.poll_interval);
    }
}
