use async_trait::async_trait;
use rollcall_core::{AnalyzerError, DetectionResult, FaceAnalyzer, FrameRef};
use rollcall_hw::Frame;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("inference did not finish within {0:?}")]
    Timeout(Duration),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Async face inference used by the scan loop and registration.
#[async_trait]
pub trait Inference: Send + Sync {
    /// All faces in `frame`, via the fast detector.
    async fn detect(&self, frame: Frame) -> Result<Vec<DetectionResult>, EngineError>;

    /// The most confident face across `frames`, via the accurate detector.
    async fn detect_best(&self, frames: Vec<Frame>)
        -> Result<Option<DetectionResult>, EngineError>;
}

/// Messages sent to the engine thread.
enum EngineRequest {
    Detect {
        frame: Frame,
        reply: oneshot::Sender<Result<Vec<DetectionResult>, EngineError>>,
    },
    DetectBest {
        frames: Vec<Frame>,
        reply: oneshot::Sender<Result<Option<DetectionResult>, EngineError>>,
    },
}

impl EngineRequest {
    fn abandoned(&self) -> bool {
        match self {
            EngineRequest::Detect { reply, .. } => reply.is_closed(),
            EngineRequest::DetectBest { reply, .. } => reply.is_closed(),
        }
    }
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
}

impl EngineHandle {
    /// Queue a request and wait for its reply, both bounded by the timeout.
    ///
    /// Giving up drops the reply receiver, which tells the engine thread
    /// to skip the request if it has not started yet.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = async {
            self.tx
                .send(build(reply_tx))
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            match reply_rx.await {
                Ok(result) => result,
                Err(_) => Err::<T, EngineError>(EngineError::ChannelClosed),
            }
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| EngineError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl Inference for EngineHandle {
    async fn detect(&self, frame: Frame) -> Result<Vec<DetectionResult>, EngineError> {
        self.request(|reply| EngineRequest::Detect { frame, reply }).await
    }

    async fn detect_best(
        &self,
        frames: Vec<Frame>,
    ) -> Result<Option<DetectionResult>, EngineError> {
        self.request(|reply| EngineRequest::DetectBest { frames, reply })
            .await
    }
}

/// Spawn the engine on a dedicated OS thread that owns `analyzer`.
///
/// Requests are served one at a time. Each call, queueing included, is
/// bounded by `timeout` on the caller's side.
pub fn spawn_engine<A>(mut analyzer: A, timeout: Duration) -> std::io::Result<EngineHandle>
where
    A: FaceAnalyzer + Send + 'static,
{
    // One request may wait while another runs
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(1);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                if req.abandoned() {
                    tracing::debug!("caller gave up before inference started; skipping");
                    continue;
                }
                match req {
                    EngineRequest::Detect { frame, reply } => {
                        let result = analyzer
                            .detect(FrameRef::new(&frame.data, frame.width, frame.height))
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::DetectBest { frames, reply } => {
                        let _ = reply.send(run_detect_best(&mut analyzer, &frames));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx, timeout })
}

/// Run the accurate detector on every frame and keep the highest-confidence face.
fn run_detect_best<A: FaceAnalyzer>(
    analyzer: &mut A,
    frames: &[Frame],
) -> Result<Option<DetectionResult>, EngineError> {
    let mut best: Option<DetectionResult> = None;

    for (i, frame) in frames.iter().enumerate() {
        let Some(found) =
            analyzer.detect_single(FrameRef::new(&frame.data, frame.width, frame.height))?
        else {
            continue;
        };
        let is_better = best
            .as_ref()
            .map_or(true, |b| found.bounding_box.confidence > b.bounding_box.confidence);
        if is_better {
            tracing::debug!(frame = i, confidence = found.bounding_box.confidence, "best face so far");
            best = Some(found);
        }
    }

    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{BoundingBox, Descriptor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    /// Reports one face whose confidence is the frame's first byte / 255.
    struct BrightnessAnalyzer {
        delay: Duration,
    }

    fn result_for(frame: FrameRef<'_>) -> Option<DetectionResult> {
        let first = *frame.rgb.first()?;
        if first == 0 {
            return None;
        }
        Some(DetectionResult {
            bounding_box: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 1.0,
                height: 1.0,
                confidence: first as f32 / 255.0,
            },
            landmarks: None,
            descriptor: Descriptor(vec![first as f32]),
        })
    }

    impl FaceAnalyzer for BrightnessAnalyzer {
        fn detect(&mut self, frame: FrameRef<'_>) -> Result<Vec<DetectionResult>, AnalyzerError> {
            std::thread::sleep(self.delay);
            Ok(result_for(frame).into_iter().collect())
        }

        fn detect_single(
            &mut self,
            frame: FrameRef<'_>,
        ) -> Result<Option<DetectionResult>, AnalyzerError> {
            Ok(result_for(frame))
        }
    }

    /// Sleeps through every pass, tracking how many run and how many overlap.
    struct StalledAnalyzer {
        delay: Duration,
        passes: Arc<AtomicUsize>,
        running: Arc<AtomicUsize>,
        max_running: Arc<AtomicUsize>,
    }

    impl FaceAnalyzer for StalledAnalyzer {
        fn detect(&mut self, _frame: FrameRef<'_>) -> Result<Vec<DetectionResult>, AnalyzerError> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        fn detect_single(
            &mut self,
            frame: FrameRef<'_>,
        ) -> Result<Option<DetectionResult>, AnalyzerError> {
            Ok(self.detect(frame)?.into_iter().next())
        }
    }

    fn frame(value: u8) -> Frame {
        Frame {
            data: vec![value; 2 * 2 * 3],
            width: 2,
            height: 2,
            timestamp: std::time::Instant::now(),
            sequence: 0,
            is_dark: false,
        }
    }

    #[tokio::test]
    async fn test_detect_round_trip() {
        let engine = spawn_engine(
            BrightnessAnalyzer { delay: Duration::ZERO },
            Duration::from_secs(5),
        )
        .unwrap();

        let faces = engine.detect(frame(51)).await.unwrap();
        assert_eq!(faces.len(), 1);
        assert!((faces[0].bounding_box.confidence - 0.2).abs() < 1e-6);

        assert!(engine.detect(frame(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_detect_best_picks_most_confident() {
        let engine = spawn_engine(
            BrightnessAnalyzer { delay: Duration::ZERO },
            Duration::from_secs(5),
        )
        .unwrap();

        let best = engine
            .detect_best(vec![frame(10), frame(0), frame(200), frame(90)])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.descriptor, Descriptor(vec![200.0]));

        let none = engine.detect_best(vec![frame(0), frame(0)]).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_slow_inference_times_out() {
        let engine = spawn_engine(
            BrightnessAnalyzer { delay: Duration::from_millis(300) },
            Duration::from_millis(20),
        )
        .unwrap();

        let err = engine.detect(frame(100)).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_stalled_engine_stays_bounded() {
        let passes = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));
        let timeout = Duration::from_millis(50);
        let engine = spawn_engine(
            StalledAnalyzer {
                delay: Duration::from_millis(1500),
                passes: Arc::clone(&passes),
                running: Arc::new(AtomicUsize::new(0)),
                max_running: Arc::clone(&max_running),
            },
            timeout,
        )
        .unwrap();

        // Every call gives up on time, including those that cannot even queue
        for _ in 0..6 {
            let started = Instant::now();
            let err = engine.detect(frame(100)).await.unwrap_err();
            assert!(matches!(err, EngineError::Timeout(_)));
            assert!(started.elapsed() < Duration::from_millis(500));
        }

        // Abandoned requests are skipped once the first pass ends
        tokio::time::sleep(Duration::from_millis(1800)).await;
        assert_eq!(passes.load(Ordering::SeqCst), 1);
        assert_eq!(max_running.load(Ordering::SeqCst), 1);
    }
}
