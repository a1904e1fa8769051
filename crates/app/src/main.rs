//! `duet` binary: wires the incremental dataflow runtime, CNS, and
//! policy loop into a runnable process. Microphone capture, ASR
//! transport, and TTS synthesis are out of scope (spec.md §1) — external
//! collaborators feed audio/ASR IUs in and consume `TextRequest` IUs out;
//! this binary drives that handoff from stdin lines standing in for a
//! finished ASR transcript, one line per simulated user turn, through the
//! real frame classifier and VAD aggregator rather than around them.

mod config;
mod error;
mod logging;
mod pipeline;
mod wiring;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use duet_cns::Cns;
use duet_iu::{Backpressure, Iu, IuProducer};
use duet_policy::FrontalCortex;

use config::Config;
use error::Result;
use wiring::AnyPolicy;

#[derive(Parser, Debug)]
#[command(name = "duet", author, version, about = "Real-time spoken dialog turn-taking engine")]
struct Cli {
    /// Path to a TOML config file; defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for rolling log files.
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Where to write the session recording on shutdown.
    #[arg(long)]
    session_output: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(path) = &cli.session_output {
        config.session_output_path = path.display().to_string();
    }
    config.validate()?;
    Ok(config)
}

/// Drains the dispatch queue, standing in for the TTS pipeline: logs every
/// `TextRequest` IU instead of speaking it. Runs on its own OS thread so
/// `blocking_recv` is safe to call (never enters the tokio runtime).
fn spawn_dispatch_sink(mut receiver: duet_iu::QueueReceiver<Iu>) {
    std::thread::spawn(move || {
        while let Some(iu) = receiver.blocking_recv() {
            if let Iu::TextRequest { payload, dispatch, .. } = iu {
                if dispatch {
                    tracing::info!(text = %payload, "agent speaking");
                } else {
                    tracing::info!("agent speech aborted");
                }
            }
        }
    });
}

/// Everything the CNS/policy side of the engine needs, all synchronous and
/// run from a dedicated thread that never enters the tokio runtime — this
/// is what makes `Cns::emit`'s bounded, blocking dispatch send safe to call.
struct CnsWorker {
    cns: Arc<Cns>,
    frontal_cortex: FrontalCortex<AnyPolicy>,
    vad_rx: duet_iu::QueueReceiver<Iu>,
    asr_rx: duet_iu::QueueReceiver<Iu>,
    loop_time_ms: i64,
}

impl CnsWorker {
    fn run(mut self, start_time_ms: i64) -> Arc<Cns> {
        self.frontal_cortex.start(start_time_ms);
        let mut now_ms = start_time_ms;
        loop {
            while let Some(iu) = self.vad_rx.try_recv() {
                if let Iu::VadState { kind, active, .. } = iu {
                    self.cns.vad_callback(kind, active, now_ms);
                }
            }
            while let Some(iu) = self.asr_rx.try_recv() {
                if let Iu::Asr { text, is_final, .. } = iu {
                    self.cns.asr_update(now_ms, &text, is_final);
                }
            }

            if self.frontal_cortex.tick(now_ms) {
                tracing::info!("dialog ended");
                break;
            }

            std::thread::sleep(std::time::Duration::from_millis(self.loop_time_ms.max(0) as u64));
            now_ms += self.loop_time_ms;
        }
        self.cns
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let _log_guard = logging::init_logging(&cli.log_dir, &config.log_level);
    logging::prune_old_logs(&cli.log_dir, 14);

    tracing::info!(policy = ?config.policy, "starting duet engine");

    let start_time_ms: i64 = 0;

    let (dispatch_tx, dispatch_rx) = duet_iu::channel(8, Backpressure::Blocking);
    spawn_dispatch_sink(dispatch_rx);

    let (audio_tx, audio_rx) = duet_iu::channel(64, Backpressure::DropOldest);
    let (vad_tx, vad_rx) = duet_iu::channel(16, Backpressure::Blocking);
    let (asr_tx, asr_rx) = duet_iu::channel(16, Backpressure::Blocking);

    let (classifier_config, aggregator_config) = wiring::build_vad_configs(&config);
    let mut vad_pipeline = pipeline::VadPipelineModule::new(classifier_config, aggregator_config, audio_rx, vad_tx)?;
    duet_iu::Module::setup(&mut vad_pipeline);

    let cns = Arc::new(Cns::new(start_time_ms, dispatch_tx));
    let frontal_cortex = wiring::build_frontal_cortex(Arc::clone(&cns), &config);

    let worker = CnsWorker {
        cns: Arc::clone(&cns),
        frontal_cortex,
        vad_rx,
        asr_rx,
        loop_time_ms: config.loop_time_ms,
    };
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let worker_handle = std::thread::spawn(move || {
        let cns = worker.run(start_time_ms);
        let _ = shutdown_tx.send(());
        cns
    });

    let vad_task = tokio::spawn(async move {
        duet_iu::Module::run(&mut vad_pipeline).await;
    });

    let stdin_lines = spawn_stdin_reader();
    let producer = IuProducer::new("simulated_user");
    let (speech_frames, silence_frames) = pipeline::turn_frame_counts(config.chunk_time_ms, &aggregator_config);

    let mut now_ms = start_time_ms;
    loop {
        match shutdown_rx.try_recv() {
            Ok(_) | Err(tokio::sync::oneshot::error::TryRecvError::Closed) => break,
            Err(tokio::sync::oneshot::error::TryRecvError::Empty) => {}
        }

        while let Ok(line) = stdin_lines.try_recv() {
            pipeline::synthetic_turn_frames(
                &audio_tx,
                &asr_tx,
                &producer,
                now_ms,
                &line,
                config.sample_rate,
                config.chunk_time_ms,
                speech_frames,
                silence_frames,
            )
            .await;
        }

        tokio::time::sleep(std::time::Duration::from_millis(config.chunk_time_ms as u64)).await;
        now_ms += config.chunk_time_ms as i64;
    }

    drop(audio_tx);
    let _ = vad_task.await;
    let cns = worker_handle.join().expect("cns worker thread panicked");

    let record = duet_recorder::SessionRecord::capture(&cns, serde_json::to_value(&config).unwrap_or_default());
    record.save(std::path::Path::new(&config.session_output_path))?;

    Ok(())
}

fn spawn_stdin_reader() -> crossbeam_channel::Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines().map_while(std::result::Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
