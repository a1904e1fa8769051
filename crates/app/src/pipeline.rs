//! Wires `duet_vad`'s frame classifier and hysteresis aggregator into the
//! module runtime (§4.1/§4.2/§4.3): an async [`VadPipelineModule`] consumes
//! `AudioFrame` IUs off a bounded queue and emits `VadState` edges onto
//! another, exactly the producer/consumer shape every other module in this
//! crate is specified to use. Microphone capture is out of scope (spec.md
//! §1), so [`synthetic_turn_frames`] stands in for it: it turns one
//! simulated user turn into a plausible speech-then-silence frame sequence
//! so the real classifier/aggregator are exercised rather than bypassed.

use duet_iu::{Iu, IuHeader, IuProducer, Module, QueueReceiver, QueueSender};
use duet_vad::{FrameClassifier, FrameClassifierConfig, VadAggregator, VadAggregatorConfig};

pub struct VadPipelineModule {
    classifier: FrameClassifier,
    aggregator: VadAggregator,
    input: QueueReceiver<Iu>,
    output: QueueSender<Iu>,
    producer: IuProducer,
}

impl VadPipelineModule {
    pub fn new(
        classifier_config: FrameClassifierConfig,
        aggregator_config: VadAggregatorConfig,
        input: QueueReceiver<Iu>,
        output: QueueSender<Iu>,
    ) -> duet_vad::Result<Self> {
        Ok(Self {
            classifier: FrameClassifier::new(classifier_config)?,
            aggregator: VadAggregator::new(aggregator_config),
            input,
            output,
            producer: IuProducer::new("vad_pipeline"),
        })
    }

    fn samples_from_bytes(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }
}

#[async_trait::async_trait]
impl Module for VadPipelineModule {
    async fn run(&mut self) {
        while let Some(iu) = self.input.recv().await {
            let Iu::AudioFrame { header, bytes, .. } = iu else {
                continue;
            };
            let samples = Self::samples_from_bytes(&bytes);
            let is_speaking = match self.classifier.classify(&samples) {
                Ok(speaking) => speaking,
                Err(err) => {
                    tracing::warn!(?err, "frame classifier rejected frame, treated as silence");
                    false
                }
            };
            for edge in self.aggregator.process_frame(is_speaking) {
                let out_header: IuHeader = self.producer.header(header.created_at_ms, Some(header.id));
                let state = Iu::VadState {
                    header: out_header,
                    kind: edge.kind,
                    active: edge.active,
                    probability: edge.probability,
                };
                if !self.output.send(state).await {
                    tracing::debug!("vad state channel closed, edge dropped");
                }
            }
        }
    }

    async fn stop(&mut self) {
        tracing::debug!("vad pipeline module stopped");
    }
}

fn frame_samples(sample_rate: u32, frame_ms: u32) -> usize {
    (sample_rate as usize * frame_ms as usize) / 1000
}

/// Tiny deterministic generator standing in for a microphone: loud enough
/// noise to read as speech to an energy-based classifier, seeded from the
/// caller's clock so repeated turns don't replay bit-identical frames.
struct Lcg(u64);

impl Lcg {
    fn next_sample(&mut self) -> i16 {
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 48) as u16 as i16
    }
}

fn speech_frame_bytes(sample_rate: u32, frame_ms: u32, rng: &mut Lcg) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frame_samples(sample_rate, frame_ms) * 2);
    for _ in 0..frame_samples(sample_rate, frame_ms) {
        bytes.extend_from_slice(&rng.next_sample().to_le_bytes());
    }
    bytes
}

fn silence_frame_bytes(sample_rate: u32, frame_ms: u32) -> Vec<u8> {
    vec![0u8; frame_samples(sample_rate, frame_ms) * 2]
}

/// Push one simulated user turn through the real pipeline: `speech_frames`
/// frames of synthetic "voice", the ASR final for `text`, then
/// `silence_frames` frames of silence — enough for the aggregator's
/// onset/offset windows to actually cross threshold rather than being
/// short-circuited.
#[allow(clippy::too_many_arguments)]
pub async fn synthetic_turn_frames(
    audio_tx: &QueueSender<Iu>,
    asr_tx: &QueueSender<Iu>,
    producer: &IuProducer,
    now_ms: i64,
    text: &str,
    sample_rate: u32,
    frame_ms: u32,
    speech_frames: usize,
    silence_frames: usize,
) {
    let mut rng = Lcg(now_ms as u64 ^ 0x9E37_79B9_7F4A_7C15);
    let nframes = frame_samples(sample_rate, frame_ms);

    for _ in 0..speech_frames {
        let bytes = speech_frame_bytes(sample_rate, frame_ms, &mut rng);
        let header = producer.header(now_ms, None);
        audio_tx
            .send(Iu::AudioFrame {
                header,
                bytes: bytes.into(),
                sample_rate,
                sample_width: 2,
                nframes,
            })
            .await;
    }

    let asr_header = producer.header(now_ms, None);
    asr_tx
        .send(Iu::Asr {
            header: asr_header,
            text: text.to_string(),
            stability: 1.0,
            is_final: true,
        })
        .await;

    for _ in 0..silence_frames {
        let bytes = silence_frame_bytes(sample_rate, frame_ms);
        let header = producer.header(now_ms, None);
        audio_tx
            .send(Iu::AudioFrame {
                header,
                bytes: bytes.into(),
                sample_rate,
                sample_width: 2,
                nframes,
            })
            .await;
    }
}

/// How many frames of synthetic speech/silence are needed to cross every
/// detector's onset/offset window with margin, given the aggregator config
/// actually in use.
pub fn turn_frame_counts(frame_ms: u32, aggregator_config: &VadAggregatorConfig) -> (usize, usize) {
    let longest_onset_ms = aggregator_config
        .turn
        .onset_ms
        .max(aggregator_config.ipu.onset_ms)
        .max(aggregator_config.fast.onset_ms);
    let longest_offset_ms = aggregator_config
        .turn
        .offset_ms
        .max(aggregator_config.ipu.offset_ms)
        .max(aggregator_config.fast.offset_ms);
    let frames_for = |ms: u32| (ms as usize).div_ceil(frame_ms as usize) + 5;
    (frames_for(longest_onset_ms), frames_for(longest_offset_ms))
}
