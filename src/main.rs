use anyhow::{bail, Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::sync::mpsc::{channel, Receiver};
use std::{
    ops::Deref,
    panic,
    time::{Duration, Instant},
};
use svbms_lib::device::{BmsDevice, DeviceEvent, EventSink};
use svbms_lib::protocol::{Command, Frame, FrameConfig};
use svbms_lib::response::ResponseFrame;
use svbms_lib::serialport::SerialTransport;
use svbms_lib::Error;

mod commandline;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

/// Polls the port until a frame is delivered or `timeout` elapses.
fn wait_for_frame<S: EventSink>(
    bms: &mut BmsDevice<SerialTransport, S>,
    events: &Receiver<DeviceEvent>,
    timeout: Duration,
) -> Result<Frame> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if bms.poll() == 0 {
            std::thread::sleep(POLL_INTERVAL);
        }
        while let Ok(event) = events.try_recv() {
            match event {
                DeviceEvent::Frame { frame, .. } => return Ok(frame),
                DeviceEvent::Error(Error::Protocol(err)) => {
                    debug!("Incomplete response: {err}")
                }
                DeviceEvent::Error(err) => return Err(err).context("Cannot receive response"),
            }
        }
    }
    let pending = bms.receiver().buffered().len();
    bms.reset();
    bail!(
        "No valid response within {} ({pending} bytes discarded)",
        humantime::format_duration(timeout)
    )
}

fn print_response(
    command: Command,
    frame: &Frame,
    config: &FrameConfig,
    json: bool,
) -> Result<()> {
    println!("{command}: {}", frame.printable());
    let response = match ResponseFrame::parse(frame, config) {
        Ok(response) => response,
        Err(err) => {
            warn!("Cannot decode response to {command}: {err}");
            return Ok(());
        }
    };
    if let Err(err) = response.check_return_code() {
        warn!("{command}: {err}");
    }
    if json {
        println!(
            "{}",
            serde_json::to_string(&response).with_context(|| "Cannot serialize response")?
        );
    } else {
        println!("{response:?}");
        println!("INFO: {:?}", String::from_utf8_lossy(&response.info));
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let config = args.frame_config();
    let port = args.port_config();
    let transport = SerialTransport::open(&port)
        .with_context(|| format!("Cannot open serial port '{}'", args.device))?;

    let (sender, events) = channel();
    let mut bms = BmsDevice::new(transport, sender, config).with_receiver(args.receiver());

    for command in args.command.commands() {
        let written = bms
            .execute(command)
            .with_context(|| format!("Cannot send {command} request"))?;
        trace!("{written} bytes sent");
        let frame = wait_for_frame(&mut bms, &events, args.timeout)
            .with_context(|| format!("Cannot get {command}"))?;
        print_response(command, &frame, &config, args.json)?;
    }

    Ok(())
}
