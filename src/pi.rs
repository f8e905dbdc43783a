use adc_sampler::raspberry_pi;
use adc_sampler::tracing::prelude::*;
use adc_sampler::{Dispatcher, LogSink, Remote, Sampler, SamplerConfig, Work};
use tokio::runtime::{self, Runtime};
use tokio::signal::unix::{self, SignalKind};

fn main() -> Result<(), anyhow::Error> {
    adc_sampler::tracing::init_stdout();

    let config = SamplerConfig::default();
    let mut sampler = Sampler::new(raspberry_pi::shared(), LogSink, config)?;
    let mut dispatcher = Dispatcher::new();

    stop_on_signal(dispatcher.remote())?;

    info!(?config, "Starting ADC sampling, interrupt to exit");
    dispatcher.post(Work::Start);

    // Sampling re-enqueues itself, so this returns once a signal posts Stop.
    dispatcher.run_until_idle(&mut sampler);

    info!("Exiting.");
    Ok(())
}

/// Posts [`Work::Stop`] on the first SIGINT or SIGTERM.
fn stop_on_signal(remote: Remote) -> Result<(), anyhow::Error> {
    let runtime: Runtime = runtime::Builder::new_current_thread().enable_io().build()?;

    let (mut sigint, mut sigterm) = {
        let _guard = runtime.enter();
        (
            unix::signal(SignalKind::interrupt())?,
            unix::signal(SignalKind::terminate())?,
        )
    };

    std::thread::spawn(move || {
        runtime.block_on(async {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("Received SIGINT.");
                },
                _ = sigterm.recv() => {
                    info!("Received SIGTERM.");
                },
            }
        });

        remote.post(Work::Stop);
    });

    Ok(())
}
