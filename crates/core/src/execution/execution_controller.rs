use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use crate::classification::domain::face_normalizer::NormalizedTensor;
use crate::classification::domain::sequence_model::{
    ClassifierOutput, InferenceError, SequenceModel,
};
use crate::execution::domain::device::Device;
use crate::execution::domain::model_factory::ModelFactory;
use crate::execution::infrastructure::execution_provider::select_primary_device;
use crate::shared::constants::DEFAULT_IDLE_TIMEOUT_SECS;
use crate::shared::prediction_error::PredictionError;

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Resident model is dropped once idle for strictly longer than this.
    pub idle_timeout: Duration,
    /// How often the reaper thread checks for idleness.
    pub reap_interval: Duration,
    /// Never place the model on the accelerator.
    pub force_cpu: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            reap_interval: Duration::from_secs(10),
            force_cpu: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelState {
    Unloaded,
    Loading,
    Resident(Device),
}

struct Resident {
    model: Box<dyn SequenceModel>,
    device: Device,
    last_used: Instant,
}

/// Owns the classifier's lifecycle: lazy load, accelerator → CPU fallback
/// and idle eviction.
///
/// One lock covers load, inference and eviction. Concurrent cold starts
/// therefore build the model once, and eviction never races an in-flight
/// inference.
pub struct ExecutionController {
    factory: Box<dyn ModelFactory>,
    config: ControllerConfig,
    primary_device: Device,
    slot: Mutex<Option<Resident>>,
    loading: AtomicBool,
}

impl ExecutionController {
    /// Create a controller, probing the primary device once.
    pub fn new(factory: Box<dyn ModelFactory>, config: ControllerConfig) -> Self {
        let device = select_primary_device(config.force_cpu);
        Self::with_primary_device(factory, config, device)
    }

    pub fn with_primary_device(
        factory: Box<dyn ModelFactory>,
        config: ControllerConfig,
        primary_device: Device,
    ) -> Self {
        Self {
            factory,
            config,
            primary_device,
            slot: Mutex::new(None),
            loading: AtomicBool::new(false),
        }
    }

    pub fn primary_device(&self) -> Device {
        self.primary_device
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn state(&self) -> ModelState {
        if self.loading.load(Ordering::Acquire) {
            return ModelState::Loading;
        }
        match self.lock().as_ref() {
            Some(resident) => ModelState::Resident(resident.device),
            None => ModelState::Unloaded,
        }
    }

    /// Load the model on the primary device if nothing is resident.
    pub fn load(&self) -> Result<(), PredictionError> {
        let mut slot = self.lock();
        if slot.is_none() {
            *slot = Some(self.construct(self.primary_device)?);
        }
        Ok(())
    }

    /// Run one inference, loading the model first if needed.
    ///
    /// A resource-exhaustion failure on the accelerator drops that model,
    /// loads on CPU and retries once.
    pub fn infer(&self, input: &NormalizedTensor) -> Result<ClassifierOutput, PredictionError> {
        let mut slot = self.lock();
        let mut fell_back = false;

        loop {
            if slot.is_none() {
                let device = if fell_back {
                    Device::Cpu
                } else {
                    self.primary_device
                };
                let resident = self.construct(device).map_err(|e| {
                    if fell_back {
                        PredictionError::InferenceFailed(format!("CPU fallback failed: {e}"))
                    } else {
                        e
                    }
                })?;
                *slot = Some(resident);
            }
            let Some(resident) = slot.as_mut() else {
                return Err(PredictionError::ModelLoadFailed(
                    "model slot empty after load".into(),
                ));
            };

            let result = resident.model.infer(input);
            resident.last_used = Instant::now();

            match result {
                Ok(output) => return Ok(output),
                Err(InferenceError::ResourceExhausted(msg))
                    if resident.device.is_accelerator() && !fell_back =>
                {
                    log::warn!(
                        "Inference exhausted accelerator resources ({msg}); retrying on CPU"
                    );
                    *slot = None;
                    fell_back = true;
                }
                Err(e) => return Err(PredictionError::InferenceFailed(e.to_string())),
            }
        }
    }

    /// Evict the model if it has been idle longer than the configured delay.
    pub fn evict_if_idle(&self) -> bool {
        self.evict_if_idle_at(Instant::now())
    }

    /// [`evict_if_idle`](Self::evict_if_idle) against an explicit clock.
    pub fn evict_if_idle_at(&self, now: Instant) -> bool {
        let mut slot = self.lock();
        let idle = match slot.as_ref() {
            Some(resident) => now.saturating_duration_since(resident.last_used),
            None => return false,
        };
        if idle > self.config.idle_timeout {
            *slot = None;
            log::info!("Classifier evicted after {:.0}s idle", idle.as_secs_f64());
            true
        } else {
            false
        }
    }

    /// Start a background thread that calls [`evict_if_idle`](Self::evict_if_idle)
    /// every `reap_interval`.
    ///
    /// The thread exits when the returned handle is dropped or the controller
    /// itself is gone.
    pub fn spawn_reaper(self: &Arc<Self>) -> IdleReaper {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let controller: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.reap_interval;

        let handle = std::thread::spawn(move || loop {
            match shutdown_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    let Some(controller) = controller.upgrade() else {
                        break;
                    };
                    controller.evict_if_idle();
                }
                _ => break,
            }
        });

        IdleReaper {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    fn construct(&self, device: Device) -> Result<Resident, PredictionError> {
        self.loading.store(true, Ordering::Release);
        let started = Instant::now();
        let result = self.factory.load(device);
        self.loading.store(false, Ordering::Release);

        match result {
            Ok(model) => {
                log::info!(
                    "Classifier loaded on {device} in {:.2}s",
                    started.elapsed().as_secs_f64()
                );
                Ok(Resident {
                    model,
                    device,
                    last_used: Instant::now(),
                })
            }
            Err(e) => {
                log::error!("Classifier failed to load on {device}: {e}");
                Err(PredictionError::ModelLoadFailed(e.to_string()))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Resident>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the eviction thread; stops and joins it on drop.
pub struct IdleReaper {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl IdleReaper {
    #[cfg(test)]
    fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::domain::classifier_head::RawScores;
    use ndarray::{Array4, ArrayD, IxDyn};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    type Script = Arc<Mutex<VecDeque<Result<(), InferenceError>>>>;

    struct StubModel {
        script: Script,
        calls: Arc<AtomicUsize>,
    }

    impl SequenceModel for StubModel {
        fn infer(&mut self, _input: &NormalizedTensor) -> Result<ClassifierOutput, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))?;
            Ok(ClassifierOutput {
                feature_map: ArrayD::zeros(IxDyn(&[1, 4])),
                scores: RawScores([0.2, 0.8]),
            })
        }
    }

    #[derive(Default)]
    struct StubFactory {
        script: Script,
        loads: Arc<Mutex<Vec<Device>>>,
        fail_loads: Arc<AtomicUsize>,
        load_delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    impl ModelFactory for StubFactory {
        fn load(
            &self,
            device: Device,
        ) -> Result<Box<dyn SequenceModel>, Box<dyn std::error::Error>> {
            std::thread::sleep(self.load_delay);
            self.loads.lock().unwrap().push(device);
            if self.fail_loads.load(Ordering::SeqCst) > 0 {
                self.fail_loads.fetch_sub(1, Ordering::SeqCst);
                return Err("weights missing".into());
            }
            Ok(Box::new(StubModel {
                script: self.script.clone(),
                calls: self.calls.clone(),
            }))
        }
    }

    struct Harness {
        controller: Arc<ExecutionController>,
        script: Script,
        loads: Arc<Mutex<Vec<Device>>>,
        fail_loads: Arc<AtomicUsize>,
        calls: Arc<AtomicUsize>,
    }

    fn harness(primary: Device, config: ControllerConfig, load_delay: Duration) -> Harness {
        let factory = StubFactory {
            load_delay,
            ..Default::default()
        };
        let script = factory.script.clone();
        let loads = factory.loads.clone();
        let fail_loads = factory.fail_loads.clone();
        let calls = factory.calls.clone();
        Harness {
            controller: Arc::new(ExecutionController::with_primary_device(
                Box::new(factory),
                config,
                primary,
            )),
            script,
            loads,
            fail_loads,
            calls,
        }
    }

    fn accelerator_harness() -> Harness {
        harness(Device::Accelerator, ControllerConfig::default(), Duration::ZERO)
    }

    fn input() -> NormalizedTensor {
        NormalizedTensor::from_array(Array4::zeros((2, 3, 4, 4))).unwrap()
    }

    fn oom() -> Result<(), InferenceError> {
        Err(InferenceError::ResourceExhausted("out of memory".into()))
    }

    #[test]
    fn test_cold_start_loads_once_and_reuses() {
        let h = accelerator_harness();
        assert_eq!(h.controller.state(), ModelState::Unloaded);
        h.controller.infer(&input()).unwrap();
        h.controller.infer(&input()).unwrap();
        assert_eq!(*h.loads.lock().unwrap(), vec![Device::Accelerator]);
        assert_eq!(h.controller.state(), ModelState::Resident(Device::Accelerator));
    }

    #[test]
    fn test_explicit_load_is_resident_immediately() {
        let h = accelerator_harness();
        h.controller.load().unwrap();
        assert_eq!(h.controller.state(), ModelState::Resident(Device::Accelerator));
        h.controller.load().unwrap();
        assert_eq!(*h.loads.lock().unwrap(), vec![Device::Accelerator]);
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_resource_exhaustion_falls_back_to_cpu_once() {
        let h = accelerator_harness();
        h.script.lock().unwrap().push_back(oom());

        let out = h.controller.infer(&input()).unwrap();
        assert_eq!(out.scores, RawScores([0.2, 0.8]));
        assert_eq!(*h.loads.lock().unwrap(), vec![Device::Accelerator, Device::Cpu]);
        assert_eq!(h.controller.state(), ModelState::Resident(Device::Cpu));
    }

    #[test]
    fn test_second_exhaustion_is_inference_failure() {
        let h = accelerator_harness();
        h.script.lock().unwrap().extend([oom(), oom()]);

        let err = h.controller.infer(&input()).unwrap_err();
        assert!(matches!(err, PredictionError::InferenceFailed(_)));
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.loads.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_other_failures_are_not_retried() {
        let h = accelerator_harness();
        h.script
            .lock()
            .unwrap()
            .push_back(Err(InferenceError::Failed("bad input".into())));

        let err = h.controller.infer(&input()).unwrap_err();
        assert_eq!(err, PredictionError::InferenceFailed("bad input".into()));
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exhaustion_on_cpu_primary_is_not_retried() {
        let h = harness(Device::Cpu, ControllerConfig::default(), Duration::ZERO);
        h.script.lock().unwrap().push_back(oom());

        assert!(matches!(
            h.controller.infer(&input()),
            Err(PredictionError::InferenceFailed(_))
        ));
        assert_eq!(*h.loads.lock().unwrap(), vec![Device::Cpu]);
    }

    #[test]
    fn test_failed_fallback_load_is_inference_failure() {
        let h = accelerator_harness();
        h.script.lock().unwrap().push_back(oom());
        h.controller.load().unwrap();
        h.fail_loads.store(1, Ordering::SeqCst);

        let err = h.controller.infer(&input()).unwrap_err();
        assert!(
            matches!(err, PredictionError::InferenceFailed(ref m) if m.contains("weights missing"))
        );
        assert_eq!(h.controller.state(), ModelState::Unloaded);
    }

    #[test]
    fn test_load_failure_returns_to_unloaded_and_retries() {
        let h = accelerator_harness();
        h.fail_loads.store(1, Ordering::SeqCst);

        let err = h.controller.infer(&input()).unwrap_err();
        assert!(matches!(err, PredictionError::ModelLoadFailed(_)));
        assert_eq!(h.controller.state(), ModelState::Unloaded);

        h.controller.infer(&input()).unwrap();
        assert_eq!(h.loads.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_eviction_only_after_delay() {
        let config = ControllerConfig {
            idle_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        let h = harness(Device::Accelerator, config, Duration::ZERO);
        h.controller.load().unwrap();
        let loaded = Instant::now();
        assert_eq!(h.controller.state(), ModelState::Resident(Device::Accelerator));

        assert!(!h.controller.evict_if_idle_at(loaded));
        assert!(!h.controller.evict_if_idle_at(loaded + Duration::from_secs(30)));
        assert_eq!(h.controller.state(), ModelState::Resident(Device::Accelerator));
        assert!(h.controller.evict_if_idle_at(loaded + Duration::from_secs(61)));
        assert_eq!(h.controller.state(), ModelState::Unloaded);
        assert!(!h.controller.evict_if_idle_at(loaded + Duration::from_secs(120)));

        h.controller.infer(&input()).unwrap();
        assert_eq!(h.loads.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_next_cold_load_after_fallback_uses_primary() {
        let h = accelerator_harness();
        h.script.lock().unwrap().push_back(oom());
        h.controller.infer(&input()).unwrap();
        assert!(h
            .controller
            .evict_if_idle_at(Instant::now() + Duration::from_secs(3600)));
        h.controller.infer(&input()).unwrap();
        assert_eq!(
            *h.loads.lock().unwrap(),
            vec![Device::Accelerator, Device::Cpu, Device::Accelerator]
        );
    }

    #[test]
    fn test_concurrent_cold_starts_load_once() {
        let h = harness(
            Device::Accelerator,
            ControllerConfig::default(),
            Duration::from_millis(50),
        );
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let controller = h.controller.clone();
                std::thread::spawn(move || controller.infer(&input()).is_ok())
            })
            .collect();
        for t in threads {
            assert!(t.join().unwrap());
        }
        assert_eq!(h.loads.lock().unwrap().len(), 1);
        assert_eq!(h.calls.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_reaper_evicts_idle_model() {
        let config = ControllerConfig {
            idle_timeout: Duration::from_millis(20),
            reap_interval: Duration::from_millis(10),
            force_cpu: false,
        };
        let h = harness(Device::Cpu, config, Duration::ZERO);
        let _reaper = h.controller.spawn_reaper();
        h.controller.infer(&input()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while h.controller.state() != ModelState::Unloaded && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(h.controller.state(), ModelState::Unloaded);
    }

    #[test]
    fn test_reaper_stops_when_controller_dropped() {
        let config = ControllerConfig {
            reap_interval: Duration::from_millis(5),
            ..Default::default()
        };
        let h = harness(Device::Cpu, config, Duration::ZERO);
        let reaper = h.controller.spawn_reaper();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!reaper.is_finished());

        drop(h);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !reaper.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(reaper.is_finished());
    }

    #[test]
    fn test_dropping_reaper_stops_thread_while_controller_lives() {
        let config = ControllerConfig {
            reap_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let h = harness(Device::Cpu, config, Duration::ZERO);
        let reaper = h.controller.spawn_reaper();
        let started = Instant::now();
        drop(reaper);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(Arc::strong_count(&h.controller), 1);
    }
}
