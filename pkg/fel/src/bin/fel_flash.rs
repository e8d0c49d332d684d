//! CLI entry point for flashing a Cubietruck's NAND over FEL.
//!
//! Usage:
//! cargo run --bin fel_flash -- flash-nand --blobs=/opt/cubietruck-fw

#[macro_use]
extern crate macros;
extern crate fel;
extern crate usb;

use std::path::PathBuf;
use std::time::Duration;

use common::async_std::task;
use common::errors::*;
use fel::{EventSink, Event, FsBlobProvider};

const VENDOR_ID: u16 = 0x1f3a;
const PRODUCT_ID: u16 = 0xefe8;

const REENUMERATION_TOTAL: Duration = Duration::from_secs(20);
const REENUMERATION_FIRST_WAIT: Duration = Duration::from_secs(1);
const REENUMERATION_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Args)]
struct Args {
    #[arg(positional)]
    action: String,

    blobs: PathBuf,

    usb: usb::DeviceSelector,

    #[arg(default = false)]
    urb_trace: bool,

    #[arg(default = 60000)]
    timeout_ms: u32,
}

async fn print_events(receiver: common::async_std::channel::Receiver<Event>) {
    while let Ok(event) = receiver.recv().await {
        match event {
            Event::Urb(index) => println!("urb #{}", index),
            Event::Progress(percent) => println!("progress: {}%", percent),
            Event::Status(text) => println!("status: {}", text),
            Event::Error(text) => eprintln!("error: {}", text),
        }
    }
}

async fn flash_nand(args: &Args, events: &EventSink) -> Result<()> {
    let blobs = FsBlobProvider::new(args.blobs.clone());
    let ctx = usb::Context::create()?;

    let info = args
        .usb
        .find(&ctx, VENDOR_ID, PRODUCT_ID)
        .await?
        .ok_or_else(|| err_msg("No FEL device found"))?;
    let mut device = info.open().await?;
    device.set_timeout_ms(args.timeout_ms);

    events.status("stage1: starting");
    fel::orchestrator::run_stage1(&device, &blobs, events).await?;

    device.close()?;
    events.status("stage1: done, waiting for re-enumeration");

    fel::orchestrator::wait_for_reenumeration(
        || {
            let selector = args.usb.clone();
            async move {
                let ctx = usb::Context::create()?;
                Ok(selector.find(&ctx, VENDOR_ID, PRODUCT_ID).await?.is_some())
            }
        },
        events,
        REENUMERATION_TOTAL,
        REENUMERATION_FIRST_WAIT,
        REENUMERATION_POLL_INTERVAL,
    )
    .await?;

    let info = args
        .usb
        .find(&ctx, VENDOR_ID, PRODUCT_ID)
        .await?
        .ok_or_else(|| err_msg("Device vanished after re-enumerating"))?;
    let mut device = info.open().await?;
    device.set_timeout_ms(args.timeout_ms);

    events.status("stage2: starting");
    fel::orchestrator::run_stage2(&device, &blobs, events).await?;
    device.close()?;

    Ok(())
}

async fn run() -> Result<()> {
    let args = common::args::parse_args::<Args>()?;
    let (events, receiver) = EventSink::channel(args.urb_trace);
    let printer = task::spawn(print_events(receiver));

    let result = match args.action.as_str() {
        "flash-nand" => flash_nand(&args, &events).await,
        other => Err(format_err!("Unknown action: {}", other)),
    };

    if let Err(ref e) = result {
        events.error(format!("{}", e));
    }

    drop(events);
    printer.await;

    result
}

fn main() -> Result<()> {
    let result = task::block_on(run());
    if let Err(ref e) = result {
        eprintln!("fel_flash: {}", e);
        std::process::exit(1);
    }
    Ok(())
}
