use super::block::EncodedFrame;
use super::delta::{DeltaOptimizer, OptimizeConfig};
use super::error::EncodeError;
use super::timing::{frame_delays, total_duration_sec};
use super::writer::{assemble, compress_frame, EncodeConfig};
use crate::core::capture::{Frame, FrameSampler, Selection};
use crate::core::progress::{ProgressReporter, Stage};
use crate::core::quantize::{Palette, PaletteConfig, QuantizedFrames, Quantizer};
use log::{debug, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 编码结果（还未持久化）
#[derive(Debug, Clone)]
pub struct EncodedGif {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub frame_count: usize,
    pub duration_sec: f64,
}

/// 四阶段编码器：extracting → encoding → optimizing → compressing
///
/// Each stage reports through the shared [`ProgressReporter`]. Cancellation
/// is checked between sampled frames and at every stage boundary; CPU-bound
/// work inside a stage runs on the blocking pool and finishes before the
/// check.
pub struct StageEncoder {
    reporter: Arc<ProgressReporter>,
    cancel: CancellationToken,
    quantizer: Arc<Quantizer>,
    optimize: OptimizeConfig,
    encode: EncodeConfig,
}

impl StageEncoder {
    pub fn new(
        reporter: Arc<ProgressReporter>,
        cancel: CancellationToken,
        palette: PaletteConfig,
        optimize: OptimizeConfig,
        encode: EncodeConfig,
    ) -> Self {
        Self {
            reporter,
            cancel,
            quantizer: Arc::new(Quantizer::new(palette)),
            optimize,
            encode,
        }
    }

    fn checkpoint(&self) -> Result<(), EncodeError> {
        if self.cancel.is_cancelled() {
            return Err(EncodeError::Cancelled);
        }
        Ok(())
    }

    /// extracting: pulls every frame out of the sampler.
    ///
    /// Percent is capped at 99 here; the stage reaches 100 once
    /// [`StageEncoder::quantize`] is done.
    pub async fn extract(&self, sampler: &mut FrameSampler) -> Result<Vec<Frame>, EncodeError> {
        let scheduled = sampler.scheduled().max(1);
        let mut frames = Vec::with_capacity(sampler.scheduled());

        self.reporter
            .report(Stage::Extracting, 0.0, format!("Sampling {} frames", sampler.scheduled()));

        while let Some(next) = sampler.next_frame().await {
            frames.push(next?);
            let percent = (sampler.processed() as f64 / scheduled as f64 * 100.0).min(99.0);
            self.reporter.report(
                Stage::Extracting,
                percent,
                format!("Captured frame {}/{}", sampler.processed(), scheduled),
            );
        }

        self.checkpoint()?;
        debug!(
            "Extracted {} frames ({} skipped of {})",
            frames.len(),
            sampler.skipped(),
            sampler.scheduled()
        );
        Ok(frames)
    }

    /// Validates and quantizes the captured frames, closing the extracting stage.
    pub async fn quantize(
        &self,
        frames: Vec<Frame>,
        selection: &Selection,
    ) -> Result<QuantizedFrames, EncodeError> {
        validate_frames(&frames, selection)?;
        self.checkpoint()?;

        let quantizer = self.quantizer.clone();
        let count = frames.len();
        // 量化后原始 RGBA 帧即被释放
        let quantized = tokio::task::spawn_blocking(move || quantizer.quantize(&frames)).await?;

        self.reporter.complete_stage(
            Stage::Extracting,
            format!("Quantized {} frames", count),
        );
        Ok(quantized)
    }

    /// encoding: per-frame timing plus control/descriptor blocks.
    pub fn encode_frames(
        &self,
        quantized: QuantizedFrames,
        frame_rate: f64,
    ) -> Result<(Vec<EncodedFrame>, Option<Palette>), EncodeError> {
        self.checkpoint()?;
        let QuantizedFrames {
            global_palette,
            frames,
        } = quantized;
        if frames.is_empty() {
            return Err(EncodeError::NoFrames);
        }

        let total = frames.len();
        self.reporter
            .report(Stage::Encoding, 0.0, format!("Encoding {} frames", total));

        let timestamps: Vec<f64> = frames.iter().map(|f| f.timestamp_sec).collect();
        let delays = frame_delays(&timestamps, frame_rate, self.encode.min_delay_cs);

        let mut encoded = Vec::with_capacity(total);
        for (i, (frame, delay)) in frames.into_iter().zip(delays).enumerate() {
            encoded.push(EncodedFrame::from_palette_frame(
                frame,
                delay,
                global_palette.as_ref(),
            ));
            self.reporter.report(
                Stage::Encoding,
                (i + 1) as f64 / total as f64 * 100.0,
                format!("Encoded frame {}/{}", i + 1, total),
            );
        }

        self.reporter
            .complete_stage(Stage::Encoding, format!("Encoded {} frames", total));
        Ok((encoded, global_palette))
    }

    /// optimizing: inter-frame delta; a no-op still closes the stage at 100.
    pub async fn optimize(
        &self,
        frames: Vec<EncodedFrame>,
        global: Option<Palette>,
    ) -> Result<(Vec<EncodedFrame>, Option<Palette>), EncodeError> {
        self.checkpoint()?;
        let optimizer = DeltaOptimizer::new(self.optimize.clone());

        if let Some(reason) = optimizer.skip_reason(&frames) {
            self.reporter
                .complete_stage(Stage::Optimizing, format!("Optimization skipped: {}", reason));
            return Ok((frames, global));
        }

        self.reporter
            .report(Stage::Optimizing, 0.0, "Removing unchanged regions");
        let reporter = self.reporter.clone();
        let (frames, stats, global) = tokio::task::spawn_blocking(move || {
            let (frames, stats) = optimizer.optimize(frames, global.as_ref(), |done, total| {
                reporter.report(
                    Stage::Optimizing,
                    done as f64 / total as f64 * 100.0,
                    format!("Optimized frame {}/{}", done, total),
                );
            });
            (frames, stats, global)
        })
        .await?;

        self.reporter.complete_stage(
            Stage::Optimizing,
            format!(
                "Optimized: {} merged, {} patched, {} cropped",
                stats.merged, stats.patched, stats.cropped
            ),
        );
        Ok((frames, global))
    }

    /// compressing: LZW per frame, then the final byte stream.
    pub async fn compress(
        &self,
        frames: Vec<EncodedFrame>,
        global: Option<Palette>,
        selection: &Selection,
    ) -> Result<EncodedGif, EncodeError> {
        self.checkpoint()?;
        if frames.is_empty() {
            return Err(EncodeError::NoFrames);
        }

        self.reporter
            .report(Stage::Compressing, 0.0, "Compressing frame data");
        let reporter = self.reporter.clone();
        let repeat = self.encode.repeat;
        let (width, height) = (selection.output_width, selection.output_height);

        let (bytes, frame_count, duration_sec) = tokio::task::spawn_blocking(move || {
            let total = frames.len();
            let mut compressed = Vec::with_capacity(total);
            for (i, frame) in frames.iter().enumerate() {
                compressed.push(compress_frame(frame, global.as_ref())?);
                // 最后 1% 留给组装
                reporter.report(
                    Stage::Compressing,
                    (i + 1) as f64 / total as f64 * 99.0,
                    format!("Compressed frame {}/{}", i + 1, total),
                );
            }

            let bytes = assemble(
                width as u16,
                height as u16,
                global.as_ref(),
                repeat,
                &frames,
                compressed,
            )?;
            let delays: Vec<u16> = frames.iter().map(|f| f.delay_cs).collect();
            Ok::<_, EncodeError>((bytes, total, total_duration_sec(&delays)))
        })
        .await??;

        self.reporter.complete_stage(
            Stage::Compressing,
            format!("GIF ready: {} frames, {} bytes", frame_count, bytes.len()),
        );
        info!(
            "🖼️ Encoded GIF {}x{}: {} frames, {:.2}s, {} bytes",
            width,
            height,
            frame_count,
            duration_sec,
            bytes.len()
        );

        Ok(EncodedGif {
            bytes,
            width,
            height,
            frame_count,
            duration_sec,
        })
    }

    /// Runs every stage after extraction.
    pub async fn encode(&self, frames: Vec<Frame>, selection: &Selection) -> Result<EncodedGif, EncodeError> {
        let quantized = self.quantize(frames, selection).await?;
        let (encoded, global) = self.encode_frames(quantized, selection.frame_rate)?;
        let (optimized, global) = self.optimize(encoded, global).await?;
        self.compress(optimized, global, selection).await
    }
}

/// 帧数为零或尺寸不一致都是致命错误
pub fn validate_frames(frames: &[Frame], selection: &Selection) -> Result<(), EncodeError> {
    if frames.is_empty() {
        return Err(EncodeError::NoFrames);
    }
    for frame in frames {
        if frame.width != selection.output_width
            || frame.height != selection.output_height
            || !frame.is_well_formed()
        {
            return Err(EncodeError::DimensionMismatch {
                index: frame.index,
                expected_width: selection.output_width,
                expected_height: selection.output_height,
                actual_width: frame.width,
                actual_height: frame.height,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::capture::{CaptureConfig, MockVideoSource};
    use crate::core::progress::{JobEvent, ProgressConfig};
    use crate::core::quantize::PaletteMode;
    use tokio::sync::broadcast;

    fn encoder_with(
        palette: PaletteConfig,
        optimize: OptimizeConfig,
    ) -> (StageEncoder, Arc<ProgressReporter>, CancellationToken) {
        let reporter = Arc::new(ProgressReporter::new(
            "test-job",
            &ProgressConfig {
                throttle_ms: 0,
                channel_capacity: 4096,
            },
        ));
        let cancel = CancellationToken::new();
        let encoder = StageEncoder::new(
            reporter.clone(),
            cancel.clone(),
            palette,
            optimize,
            EncodeConfig::default(),
        );
        (encoder, reporter, cancel)
    }

    fn drain(rx: &mut broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn decode_frame_count(bytes: &[u8]) -> usize {
        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::Indexed);
        let mut decoder = options.read_info(bytes).unwrap();
        let mut count = 0;
        while decoder.read_next_frame().unwrap().is_some() {
            count += 1;
        }
        count
    }

    async fn sample(source: Arc<MockVideoSource>, selection: &Selection, encoder: &StageEncoder) -> Vec<Frame> {
        let mut sampler = FrameSampler::begin(
            source,
            selection,
            &CaptureConfig::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        let frames = encoder.extract(&mut sampler).await.unwrap();
        sampler.release().await.unwrap();
        frames
    }

    #[tokio::test]
    async fn test_full_encode_reports_every_stage() {
        let (encoder, reporter, _) = encoder_with(PaletteConfig::default(), OptimizeConfig::default());
        let mut rx = reporter.subscribe();
        let source = Arc::new(MockVideoSource::new("mock", 5.0));
        let selection = Selection::new(0.0, 1.0, 10.0, 32, 24);

        let frames = sample(source, &selection, &encoder).await;
        let gif = encoder.encode(frames, &selection).await.unwrap();

        assert_eq!(&gif.bytes[..6], b"GIF89a");
        assert_eq!(gif.frame_count, 10);
        assert!((gif.duration_sec - 1.0).abs() < 1e-9);
        assert_eq!(decode_frame_count(&gif.bytes), 10);

        let progress: Vec<(Stage, u8)> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                JobEvent::Progress(p) => Some((p.stage, p.percent)),
                _ => None,
            })
            .collect();

        for pair in progress.windows(2) {
            assert!(pair[0].0 <= pair[1].0);
            if pair[0].0 == pair[1].0 {
                assert!(pair[0].1 <= pair[1].1);
            }
        }
        for stage in Stage::ALL {
            assert!(progress.contains(&(stage, 100)), "missing 100% for {}", stage);
        }
        assert_eq!(progress.last(), Some(&(Stage::Compressing, 100)));
    }

    #[tokio::test]
    async fn test_local_palette_mode() {
        let palette = PaletteConfig {
            mode: PaletteMode::Local,
            max_colors: 64,
            ..Default::default()
        };
        let (encoder, _, _) = encoder_with(palette, OptimizeConfig::default());
        let source = Arc::new(MockVideoSource::new("mock", 5.0));
        let selection = Selection::new(1.0, 1.5, 10.0, 16, 12);

        let frames = sample(source, &selection, &encoder).await;
        let gif = encoder.encode(frames, &selection).await.unwrap();

        assert_eq!(decode_frame_count(&gif.bytes), 5);
    }

    #[tokio::test]
    async fn test_no_frames_fails() {
        let (encoder, _, _) = encoder_with(PaletteConfig::default(), OptimizeConfig::default());
        let selection = Selection::new(0.0, 1.0, 10.0, 16, 16);

        let result = encoder.encode(Vec::new(), &selection).await;
        assert!(matches!(result, Err(EncodeError::NoFrames)));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails() {
        let (encoder, _, _) = encoder_with(PaletteConfig::default(), OptimizeConfig::default());
        let selection = Selection::new(0.0, 1.0, 10.0, 16, 16);
        let frames = vec![
            Frame::new(0, 0.0, 16, 16, vec![0; 16 * 16 * 4]),
            Frame::new(1, 0.1, 8, 8, vec![0; 8 * 8 * 4]),
        ];

        let result = encoder.encode(frames, &selection).await;
        assert!(matches!(
            result,
            Err(EncodeError::DimensionMismatch { index: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_short_clip_still_closes_optimizing() {
        let (encoder, reporter, _) = encoder_with(PaletteConfig::default(), OptimizeConfig::default());
        let mut rx = reporter.subscribe();
        let selection = Selection::new(0.0, 0.2, 10.0, 8, 8);
        let frames = vec![
            Frame::new(0, 0.0, 8, 8, vec![200; 8 * 8 * 4]),
            Frame::new(1, 0.1, 8, 8, vec![100; 8 * 8 * 4]),
        ];

        let gif = encoder.encode(frames, &selection).await.unwrap();
        assert_eq!(gif.frame_count, 2);

        let optimizing: Vec<JobEvent> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, JobEvent::Progress(p) if p.stage == Stage::Optimizing))
            .collect();
        assert_eq!(optimizing.len(), 1);
        match &optimizing[0] {
            JobEvent::Progress(p) => assert_eq!(p.percent, 100),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_between_stages() {
        let (encoder, _, cancel) = encoder_with(PaletteConfig::default(), OptimizeConfig::default());
        let selection = Selection::new(0.0, 0.3, 10.0, 8, 8);
        let frames: Vec<Frame> = (0..3)
            .map(|i| Frame::new(i, i as f64 * 0.1, 8, 8, vec![i as u8 * 40; 8 * 8 * 4]))
            .collect();

        let quantized = encoder.quantize(frames, &selection).await.unwrap();
        cancel.cancel();
        let result = encoder.encode_frames(quantized, selection.frame_rate);
        assert!(matches!(result, Err(EncodeError::Cancelled)));
    }
}
