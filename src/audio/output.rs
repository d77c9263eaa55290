use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::{Receiver, Sender};
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Producer, Split},
};
use thiserror::Error;
use tracing::{error, info, warn};

use super::{AudioSink, Voice, Volume};
use crate::hardware::ActuationError;

const COMMAND_QUEUE: usize = 64;

#[derive(Debug, Error)]
pub enum AudioInitError {
    #[error("no default output device")]
    NoDevice,
    #[error(transparent)]
    Config(#[from] cpal::DefaultStreamConfigError),
    #[error(transparent)]
    Build(#[from] cpal::BuildStreamError),
    #[error(transparent)]
    Play(#[from] cpal::PlayStreamError),
    #[error("failed to start audio thread: {0}")]
    Thread(#[from] std::io::Error),
    #[error("audio thread exited during start-up")]
    ThreadExited,
}

enum AudioCommand {
    Play(Voice),
    StopAll,
}

/// Lives inside the output callback. `active` counts voices that are queued
/// or still sounding.
struct Mixer {
    consumer: HeapCons<AudioCommand>,
    voices: Vec<Voice>,
    active: Arc<AtomicUsize>,
    channels: usize,
}

impl Mixer {
    fn render(&mut self, data: &mut [f32]) {
        while let Some(command) = self.consumer.try_pop() {
            match command {
                AudioCommand::Play(voice) => self.voices.push(voice),
                AudioCommand::StopAll => {
                    let dropped = self.voices.len();
                    self.voices.clear();
                    self.active.fetch_sub(dropped, Ordering::AcqRel);
                }
            }
        }

        for frame in data.chunks_mut(self.channels.max(1)) {
            let mut sample = 0.0;
            for voice in &mut self.voices {
                if let Some(s) = voice.next_sample() {
                    sample += s;
                }
            }
            frame.fill(sample.clamp(-1.0, 1.0));
        }

        let before = self.voices.len();
        self.voices.retain(|v| !v.is_finished());
        let finished = before - self.voices.len();
        if finished > 0 {
            self.active.fetch_sub(finished, Ordering::AcqRel);
        }
    }
}

/// Work for the audio thread. Decoding happens there so a long asset never
/// holds up the timeline that asked for it.
enum LoadRequest {
    Play { path: PathBuf, gain: f32 },
    StopAll,
}

/// Plays assets on the default output device.
///
/// The cpal stream is owned by a dedicated thread and lives until this handle
/// is dropped. That thread decodes requested assets and hands the voices to
/// the callback through a lock-free ring.
pub struct DeviceAudio {
    requests: Sender<LoadRequest>,
    active: Arc<AtomicUsize>,
}

impl DeviceAudio {
    pub fn open() -> Result<Self, AudioInitError> {
        let ring = HeapRb::<AudioCommand>::new(COMMAND_QUEUE);
        let (producer, consumer) = ring.split();
        let active = Arc::new(AtomicUsize::new(0));

        let (ready_tx, ready_rx) = crossbeam::channel::bounded(1);
        let (requests, request_rx) = crossbeam::channel::unbounded();

        let thread_active = active.clone();
        std::thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                audio_thread(producer, consumer, thread_active, ready_tx, request_rx);
            })?;

        ready_rx.recv().map_err(|_| AudioInitError::ThreadExited)??;

        Ok(Self { requests, active })
    }
}

fn audio_thread(
    producer: HeapProd<AudioCommand>,
    consumer: HeapCons<AudioCommand>,
    active: Arc<AtomicUsize>,
    ready_tx: Sender<Result<(), AudioInitError>>,
    request_rx: Receiver<LoadRequest>,
) {
    let (stream, sample_rate) = match build_stream(consumer, active.clone()) {
        Ok(opened) => {
            let _ = ready_tx.send(Ok(()));
            opened
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let mut loader = Loader {
        producer,
        active,
        sample_rate,
    };
    // Runs until the owning `DeviceAudio` drops its sender.
    for request in request_rx {
        loader.handle(request);
    }
    drop(stream);
}

struct Loader {
    producer: HeapProd<AudioCommand>,
    active: Arc<AtomicUsize>,
    sample_rate: u32,
}

impl Loader {
    /// `play` counted the voice as active before queueing it; any failure here
    /// gives that count back.
    fn handle(&mut self, request: LoadRequest) {
        let command = match request {
            LoadRequest::Play { path, gain } => match Voice::load(&path, gain, self.sample_rate) {
                Ok(voice) => AudioCommand::Play(voice),
                Err(e) => {
                    warn!(error = %e, "skipping audio asset");
                    self.active.fetch_sub(1, Ordering::AcqRel);
                    return;
                }
            },
            LoadRequest::StopAll => AudioCommand::StopAll,
        };

        let playing = matches!(command, AudioCommand::Play(_));
        if self.producer.try_push(command).is_err() {
            warn!(error = %ActuationError::QueueFull, "dropping audio command");
            if playing {
                self.active.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }
}

fn build_stream(
    consumer: HeapCons<AudioCommand>,
    active: Arc<AtomicUsize>,
) -> Result<(cpal::Stream, u32), AudioInitError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(AudioInitError::NoDevice)?;
    let config = device.default_output_config()?;
    let stream_config: cpal::StreamConfig = config.into();

    let channels = stream_config.channels as usize;
    let sample_rate = stream_config.sample_rate;
    info!(channels, sample_rate, "audio output opened");

    let mut mixer = Mixer {
        consumer,
        voices: Vec::new(),
        active,
        channels,
    };

    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            mixer.render(data);
        },
        |err| error!(%err, "audio stream error"),
        None,
    )?;

    stream.play()?;

    Ok((stream, sample_rate))
}

impl AudioSink for DeviceAudio {
    /// Checks the asset and queues it; decoding happens on the audio thread.
    fn play(&self, path: &Path, volume: Volume) -> Result<(), ActuationError> {
        Voice::check_playable(path)?;

        self.active.fetch_add(1, Ordering::AcqRel);
        let request = LoadRequest::Play {
            path: path.to_path_buf(),
            gain: volume.gain(),
        };
        if self.requests.send(request).is_err() {
            self.active.fetch_sub(1, Ordering::AcqRel);
            return Err(ActuationError::QueueFull);
        }
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.active.load(Ordering::Acquire) > 0
    }

    fn stop_all(&self) {
        if self.requests.send(LoadRequest::StopAll).is_err() {
            warn!("audio thread is gone, nothing to stop");
        }
    }
}
