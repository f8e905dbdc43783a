//! Continuous sampling of the shared ADC on a single cooperative dispatcher.
//!
//! Host lifecycle callbacks and sampling steps share one FIFO queue. A sampling
//! step takes one averaged reading and then re-enqueues itself, so host work
//! queued behind it still gets its turn between readings.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;

use crate::bus::PeripheralManager;
use crate::device::{Device, DEFAULT_ITERATIONS};
use crate::registry::SharedRegistry;
use crate::tracing::prelude::*;
use crate::{Error, Result};

pub const DEFAULT_CHANNEL: u8 = 0;

/// Which input to sample and how many conversions to average per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerConfig {
    pub channel: u8,
    pub iterations: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL,
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

/// One averaged reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Milliseconds since sampling started.
    pub elapsed_ms: u64,
    /// Mean of the raw conversions, in `0.0..=4095.0`.
    pub value: f64,
}

/// Receives every sample in the order it was taken.
pub trait SampleSink {
    fn emit(&mut self, sample: Sample);
}

/// Logs each sample under the `ADC` target as `<elapsed_ms>\t<value>`.
///
/// The value always carries a fractional part, e.g. `512.0`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl SampleSink for LogSink {
    fn emit(&mut self, sample: Sample) {
        info!(target: "ADC", "{}\t{:?}", sample.elapsed_ms, sample.value);
    }
}

impl SampleSink for Vec<Sample> {
    fn emit(&mut self, sample: Sample) {
        self.push(sample);
    }
}

/// A unit of work for the [`Dispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Work {
    /// Host says the activity started.
    Start,
    /// Host says the activity stopped.
    Stop,
    /// Take one sample, then re-enqueue.
    Sample,
}

/// Single-consumer FIFO of [`Work`], serviced on one thread.
///
/// Other threads hand work in through a [`Remote`]; it joins the back of the
/// queue before the next item runs.
#[derive(Debug)]
pub struct Dispatcher {
    queue: VecDeque<Work>,
    inbox: Receiver<Work>,
    remote: Sender<Work>,
}

/// Posts [`Work`] to a [`Dispatcher`] from any thread.
#[derive(Debug, Clone)]
pub struct Remote {
    tx: Sender<Work>,
}

impl Remote {
    /// Returns `false` if the dispatcher is gone.
    pub fn post(&self, work: Work) -> bool {
        self.tx.send(work).is_ok()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (remote, inbox) = mpsc::channel();

        Self {
            queue: VecDeque::new(),
            inbox,
            remote,
        }
    }

    pub fn remote(&self) -> Remote {
        Remote {
            tx: self.remote.clone(),
        }
    }

    pub fn post(&mut self, work: Work) {
        self.queue.push_back(work);
    }

    /// Drops every queued sampling step. Lifecycle work stays queued.
    pub fn remove_samples(&mut self) {
        self.queue.retain(|work| *work != Work::Sample);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn collect_remote(&mut self) {
        self.queue.extend(self.inbox.try_iter());
    }

    /// Runs the oldest queued item. Returns `false` if the queue was empty.
    pub fn run_once<F, S>(&mut self, sampler: &mut Sampler<'_, F, S>) -> bool
    where
        F: PeripheralManager + Clone,
        S: SampleSink,
    {
        self.collect_remote();

        let Some(work) = self.queue.pop_front() else {
            return false;
        };

        match work {
            Work::Start => sampler.on_start(self),
            Work::Stop => sampler.on_stop(self),
            Work::Sample => sampler.step(self),
        }

        true
    }

    /// Runs at most `limit` items and returns how many ran.
    pub fn run_for<F, S>(&mut self, sampler: &mut Sampler<'_, F, S>, limit: usize) -> usize
    where
        F: PeripheralManager + Clone,
        S: SampleSink,
    {
        let mut ran = 0;
        while ran < limit && self.run_once(sampler) {
            ran += 1;
        }
        ran
    }

    /// Runs until the queue is empty. While sampling is active this only
    /// returns once a [`Work::Stop`] has been processed.
    pub fn run_until_idle<F, S>(&mut self, sampler: &mut Sampler<'_, F, S>)
    where
        F: PeripheralManager + Clone,
        S: SampleSink,
    {
        while self.run_once(sampler) {}
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Running,
    /// Started, but the shared device could not be acquired.
    Error,
}

/// Drives continuous sampling of the shared ADC between host start and stop.
pub struct Sampler<'r, F: PeripheralManager + Clone, S: SampleSink> {
    registry: &'r SharedRegistry<F>,
    sink: S,
    config: SamplerConfig,
    state: State,
    adc: Option<Arc<Device<F>>>,
    started: Instant,
    last_error: Option<Error>,
}

impl<'r, F: PeripheralManager + Clone, S: SampleSink> Sampler<'r, F, S> {
    /// Creates an idle sampler. Fails if `config` names a channel the ADC
    /// does not have or asks for zero iterations.
    pub fn new(registry: &'r SharedRegistry<F>, sink: S, config: SamplerConfig) -> Result<Self> {
        mcp3204::Channel::try_from(config.channel)?;
        if config.iterations == 0 {
            return Err(Error::InvalidIterations);
        }

        Ok(Self {
            registry,
            sink,
            config,
            state: State::Idle,
            adc: None,
            started: Instant::now(),
            last_error: None,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// The most recent I/O failure, if any, since the last start.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Acquires the shared device and queues the first sampling step.
    pub fn on_start(&mut self, dispatcher: &mut Dispatcher) {
        if self.state != State::Idle {
            warn!(state = ?self.state, "Sampler already started");
            return;
        }

        self.started = Instant::now();
        self.last_error = None;

        match self.registry.acquire() {
            Ok(adc) => {
                self.adc = Some(adc);
                self.state = State::Running;
                info!(channel = self.config.channel, iterations = self.config.iterations, "Sampling started");
            }
            Err(err) => {
                error!(%err, "Failed to acquire ADC");
                self.last_error = Some(err);
                self.state = State::Error;
            }
        }

        dispatcher.post(Work::Sample);
    }

    /// Releases the shared device and drops every queued sampling step.
    pub fn on_stop(&mut self, dispatcher: &mut Dispatcher) {
        if self.adc.take().is_some() {
            if let Err(err) = self.registry.release() {
                error!(%err, "Failed to release ADC");
                self.last_error = Some(err);
            }
        }

        dispatcher.remove_samples();

        if self.state != State::Idle {
            info!("Sampling stopped");
        }
        self.state = State::Idle;
    }

    fn step(&mut self, dispatcher: &mut Dispatcher) {
        // Coalesce with any duplicate step still queued.
        dispatcher.remove_samples();

        if self.state == State::Idle {
            return;
        }

        if let Some(adc) = &self.adc {
            match adc.sample_with(self.config.channel, self.config.iterations) {
                Ok(value) => {
                    let elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    self.sink.emit(Sample { elapsed_ms, value });
                }
                Err(err) if err.is_io() => {
                    error!(%err, "Failed to sample ADC");
                    self.last_error = Some(err);
                }
                Err(err) => panic!("ADC misuse while sampling: {err}"),
            }
        }

        dispatcher.post(Work::Sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockManager;
    use tracing_test::traced_test;

    fn sampler<'r>(registry: &'r SharedRegistry<MockManager>) -> Sampler<'r, MockManager, Vec<Sample>> {
        Sampler::new(registry, Vec::new(), SamplerConfig::default()).unwrap()
    }

    #[test]
    fn samples_until_stopped() {
        let mock = MockManager::new();
        let registry = SharedRegistry::new(mock.clone());
        let mut sampler = sampler(&registry);
        let mut dispatcher = Dispatcher::new();

        dispatcher.post(Work::Start);
        assert_eq!(dispatcher.run_for(&mut sampler, 6), 6);
        assert_eq!(sampler.state(), State::Running);
        assert_eq!(sampler.sink().len(), 5);

        dispatcher.post(Work::Stop);
        dispatcher.run_until_idle(&mut sampler);
        let taken = sampler.sink().len();
        assert!(taken >= 5);

        assert_eq!(dispatcher.pending(), 0);
        assert!(!dispatcher.run_once(&mut sampler));
        assert_eq!(sampler.sink().len(), taken);
        assert_eq!(sampler.state(), State::Idle);

        assert_eq!(mock.opened().len(), 1);
        assert_eq!(mock.closes(), 1);
        assert_eq!(registry.ref_count(), 0);
    }

    #[test]
    fn stop_called_directly_drains_queue() {
        let mock = MockManager::new();
        let registry = SharedRegistry::new(mock.clone());
        let mut sampler = sampler(&registry);
        let mut dispatcher = Dispatcher::new();

        sampler.on_start(&mut dispatcher);
        dispatcher.run_for(&mut sampler, 3);
        sampler.on_stop(&mut dispatcher);

        assert_eq!(dispatcher.pending(), 0);
        assert_eq!(sampler.sink().len(), 3);
        assert_eq!(mock.closes(), 1);
    }

    #[test]
    fn timestamps_are_ordered_and_values_averaged() {
        let mock = MockManager::new();
        // 10 conversions per sample: five of 0x100 and five of 0x300 average to 512.
        mock.script((0..20).map(|i| if i % 2 == 0 { [0, 0x01, 0x00] } else { [0, 0x03, 0x00] }));
        let registry = SharedRegistry::new(mock.clone());
        let mut sampler = sampler(&registry);
        let mut dispatcher = Dispatcher::new();

        dispatcher.post(Work::Start);
        dispatcher.run_for(&mut sampler, 3);

        let samples = sampler.sink();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].value, 512.0);
        assert_eq!(samples[1].value, 512.0);
        assert!(samples.windows(2).all(|pair| pair[0].elapsed_ms <= pair[1].elapsed_ms));
        assert!(mock.sent().iter().all(|command| *command == [0x06, 0x00, 0x00]));
    }

    #[test]
    fn restart_opens_a_new_session() {
        let mock = MockManager::new();
        let registry = SharedRegistry::new(mock.clone());
        let mut sampler = sampler(&registry);
        let mut dispatcher = Dispatcher::new();

        for _ in 0..2 {
            dispatcher.post(Work::Start);
            dispatcher.run_for(&mut sampler, 3);
            dispatcher.post(Work::Stop);
            dispatcher.run_until_idle(&mut sampler);
        }

        assert_eq!(mock.opened().len(), 2);
        assert_eq!(mock.closes(), 2);
        assert_eq!(sampler.sink().len(), 2 * 3);
    }

    #[test]
    fn duplicate_start_is_ignored() {
        let mock = MockManager::new();
        let registry = SharedRegistry::new(mock.clone());
        let mut sampler = sampler(&registry);
        let mut dispatcher = Dispatcher::new();

        sampler.on_start(&mut dispatcher);
        sampler.on_start(&mut dispatcher);

        assert_eq!(registry.ref_count(), 1);
        assert_eq!(dispatcher.pending(), 1);

        sampler.on_stop(&mut dispatcher);
        assert_eq!(registry.ref_count(), 0);
    }

    #[test]
    fn transfer_errors_do_not_stop_the_loop() {
        let mock = MockManager::new();
        let registry = SharedRegistry::new(mock.clone());
        let mut sampler = sampler(&registry);
        let mut dispatcher = Dispatcher::new();

        sampler.on_start(&mut dispatcher);
        mock.fail_transfer(true);
        dispatcher.run_for(&mut sampler, 3);

        assert!(sampler.sink().is_empty());
        assert!(sampler.last_error().is_some_and(Error::is_io));
        assert_eq!(dispatcher.pending(), 1);

        mock.fail_transfer(false);
        dispatcher.run_for(&mut sampler, 2);
        assert_eq!(sampler.sink().len(), 2);

        sampler.on_stop(&mut dispatcher);
    }

    #[test]
    fn failed_acquire_keeps_polling_without_samples() {
        let mock = MockManager::new();
        mock.fail_open(true);
        let registry = SharedRegistry::new(mock.clone());
        let mut sampler = sampler(&registry);
        let mut dispatcher = Dispatcher::new();

        sampler.on_start(&mut dispatcher);
        assert_eq!(sampler.state(), State::Error);
        dispatcher.run_for(&mut sampler, 4);
        assert!(sampler.sink().is_empty());
        assert_eq!(dispatcher.pending(), 1);

        sampler.on_stop(&mut dispatcher);
        assert_eq!(sampler.state(), State::Idle);
        assert_eq!(dispatcher.pending(), 0);
        assert_eq!(registry.ref_count(), 0);
        assert_eq!(mock.closes(), 0);
    }

    #[test]
    fn shared_device_outlives_sampler_while_others_hold_it() {
        let mock = MockManager::new();
        let registry = SharedRegistry::new(mock.clone());
        let other = registry.acquire().unwrap();
        let mut sampler = sampler(&registry);
        let mut dispatcher = Dispatcher::new();

        sampler.on_start(&mut dispatcher);
        dispatcher.run_for(&mut sampler, 2);
        sampler.on_stop(&mut dispatcher);

        assert!(other.is_open());
        assert_eq!(registry.ref_count(), 1);
        assert_eq!(mock.closes(), 0);

        registry.release().unwrap();
        assert_eq!(mock.closes(), 1);
    }

    #[test]
    #[traced_test]
    fn log_sink_writes_tab_separated_reals() {
        let mut sink = LogSink;

        sink.emit(Sample { elapsed_ms: 7, value: 512.0 });
        sink.emit(Sample { elapsed_ms: 8, value: 1024.0 / 3.0 });

        assert!(logs_contain("ADC"));
        assert!(logs_contain("7\t512.0"));
        assert!(logs_contain("8\t341.3333333333333"));
    }

    #[test]
    fn remote_stop_ends_the_loop() {
        let mock = MockManager::new();
        let registry = SharedRegistry::new(mock.clone());
        let mut sampler = sampler(&registry);
        let mut dispatcher = Dispatcher::new();

        dispatcher.remote().post(Work::Start);
        dispatcher.run_for(&mut sampler, 3);
        assert_eq!(sampler.state(), State::Running);

        let remote = dispatcher.remote();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(5));
            assert!(remote.post(Work::Stop));
        });

        dispatcher.run_until_idle(&mut sampler);
        stopper.join().unwrap();

        let taken = sampler.sink().len();
        assert!(taken >= 2);
        assert!(!dispatcher.run_once(&mut sampler));
        assert_eq!(sampler.sink().len(), taken);
        assert_eq!(sampler.state(), State::Idle);
        assert_eq!(mock.closes(), 1);
    }

    #[test]
    fn remote_post_fails_after_dispatcher_is_gone() {
        let remote = Dispatcher::new().remote();
        assert!(!remote.post(Work::Start));
    }

    #[test]
    fn rejects_bad_config() {
        let registry = SharedRegistry::new(MockManager::new());

        let bad_channel = SamplerConfig { channel: 4, ..SamplerConfig::default() };
        assert!(matches!(
            Sampler::new(&registry, Vec::<Sample>::new(), bad_channel),
            Err(Error::InvalidChannel(4))
        ));

        let no_iterations = SamplerConfig { iterations: 0, ..SamplerConfig::default() };
        assert!(matches!(
            Sampler::new(&registry, Vec::<Sample>::new(), no_iterations),
            Err(Error::InvalidIterations)
        ));
    }
}
