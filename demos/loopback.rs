//! Two node CSMA/CA exchange over a simulated medium
//!
//! Runs a sender and a receiver MAC on an in-memory channel, optionally in
//! quiet period mode with a primary user appearing on the starting channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{debug, info, warn};

use structopt::StructOpt;

use qpcsma::prelude::*;
use qpcsma::sim::{Air, AirPhy};

#[derive(Debug, StructOpt)]
struct Options {
    #[structopt(long, default_value = "10")]
    /// Number of packets to send
    pub count: usize,

    #[structopt(long, default_value = "250ms")]
    /// Interval between packets
    pub interval: humantime::Duration,

    #[structopt(long)]
    /// Run the quiet period MAC
    pub quiet: bool,

    #[structopt(long, use_delimiter = true, default_value = "915000000,925000000")]
    /// Channels in Hz, the first is the starting frequency
    pub channels: Vec<u64>,

    #[structopt(long)]
    /// Bring up a primary user on the starting channel after this delay
    pub primary_after: Option<humantime::Duration>,

    #[structopt(long)]
    /// Append TX / RX frames to this file
    pub mac_log: Option<String>,

    #[structopt(long)]
    /// Append received payloads to this file
    pub rx_data_log: Option<String>,

    #[structopt(long, default_value = "info")]
    /// Configure log level
    pub log_level: simplelog::LevelFilter,
}

fn start(air: &Arc<Air>, opts: &Options, address: Address) -> anyhow::Result<(MacHandle, JoinHandle<()>)> {
    let freq = *opts.channels.first().ok_or_else(|| anyhow::anyhow!("No channels configured"))?;

    let mut config = match opts.quiet {
        true => MacConfig {
            quiet: Some(QuietConfig::default().with_channels(&opts.channels).map_err(|e| anyhow::anyhow!("{}", e))?),
            ..MacConfig::quiet_period()
        },
        false => MacConfig::default(),
    };

    config.address = address;
    config.center_freq = Some(freq);

    // Only the receiver logs
    if address == Address(0x02) {
        config.log = LogConfig {
            mac_log: opts.mac_log.clone(),
            rx_data_log: opts.rx_data_log.clone(),
        };
    }

    let phy: AirPhy = air.phy();

    let (handle, join) = match opts.quiet {
        true => {
            let mac = Mac::new_quiet(phy, SystemTimer::new(), config)
                .map_err(|e| anyhow::anyhow!("Error initialising MAC: {:?}", e))?;
            air.attach(mac.phy(), mac.handle());
            (mac.handle(), mac.spawn()?)
        }
        false => {
            let mac = Mac::new_csma(phy, SystemTimer::new(), config)
                .map_err(|e| anyhow::anyhow!("Error initialising MAC: {:?}", e))?;
            air.attach(mac.phy(), mac.handle());
            (mac.handle(), mac.spawn()?)
        }
    };

    handle.set_upward(move |u| info!("{}: {}", address, u));

    Ok((handle, join))
}

fn main() -> anyhow::Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    // Bind exit handler
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    // Load options
    let opts = Options::from_args();

    // Initialise logging
    let _ = simplelog::SimpleLogger::init(opts.log_level, simplelog::Config::default());

    info!("Starting loopback (quiet period: {})", opts.quiet);

    let air = Air::new();
    air.set_channels(&opts.channels);

    let (tx, tx_join) = start(&air, &opts, Address(0x01))?;
    let (rx, rx_join) = start(&air, &opts, Address(0x02))?;

    let started = Instant::now();
    let mut primary = false;

    for i in 0..opts.count {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        if let Some(after) = &opts.primary_after {
            if !primary && started.elapsed() >= **after {
                warn!("Primary user active on {} Hz", opts.channels[0]);
                air.set_power_db(opts.channels[0], -40.0);
                primary = true;
            }
        }

        let data = format!("packet {}", i);
        debug!("Queueing '{}'", data);

        if let Err(e) = tx.new_packet(rx.address(), data.into_bytes()) {
            warn!("Failed to queue packet {}: {:?}", i, e);
        }

        thread::sleep(*opts.interval);
    }

    // Allow the last exchange to complete
    while running.load(Ordering::SeqCst) && tx.queue_len() > 0 {
        thread::sleep(std::time::Duration::from_millis(50));
    }

    tx.stop();
    rx.stop();

    let _ = tx_join.join();
    let _ = rx_join.join();

    let s = tx.stats();
    info!(
        "Sender: {} delivered, {} dropped, {} collisions, {} quiet periods, {} retunes",
        s.delivered, s.dropped, s.collisions, s.quiet_periods, s.retunes
    );
    info!("Receiver: {:?}", rx.stats());
    info!("Air: {} transmissions", air.transmissions());

    Ok(())
}
