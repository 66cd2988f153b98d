use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use cuttlefish_registry as cf;
use cuttlefish_registry::{Device, DeviceModel, MetricsHub, RegistryError};
use harp_transport::{HarpLink, MockLink, PayloadType, TransportError};

#[derive(Parser, Debug)]
#[command(
    name = "cf",
    version,
    about = "Cuttlefish Harp device CLI",
    disable_help_subcommand = true
)]
struct Cli {
    /// Link backend
    #[arg(long, value_enum, default_value_t = Backend::Mock, global = true)]
    backend: Backend,

    /// Serial device path (ignored by the mock backend)
    #[arg(long, default_value = "mock0", global = true)]
    device: String,

    /// Print Prometheus metrics after the command
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    Mock,
    Serial,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Model {
    Cuttlefish,
    Fip,
}

impl From<Model> for DeviceModel {
    fn from(m: Model) -> Self {
        match m {
            Model::Cuttlefish => DeviceModel::Cuttlefish,
            Model::Fip => DeviceModel::CuttlefishFip,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available ports for the backend
    Ports,
    /// Print the register catalog of a model
    Registers {
        #[arg(long, value_enum)]
        model: Model,
        /// Emit JSON instead of a table
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Decode register payload bytes offline
    Decode {
        #[arg(long, value_enum)]
        model: Model,
        /// Register address (required unless --frame)
        #[arg(long)]
        address: Option<u8>,
        /// Payload bytes as hex, e.g. 0x51 or 51
        #[arg(long, num_args = 1.., value_delimiter = ' ')]
        data: Vec<String>,
        /// Treat --data as a complete Harp frame
        #[arg(long, action = ArgAction::SetTrue)]
        frame: bool,
    },
    /// Connect and read one register
    Read {
        #[arg(long, value_enum)]
        model: Model,
        /// Register address
        #[arg(long, conflicts_with = "register")]
        address: Option<u8>,
        /// Register name, e.g. TaskCount
        #[arg(long)]
        register: Option<String>,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Print decoded messages from the device
    Sniff {
        #[arg(long, value_enum)]
        model: Model,
        /// Number of messages to capture
        #[arg(long, default_value_t = 10u32)]
        count: u32,
        /// Receive timeout per message in milliseconds
        #[arg(long, default_value_t = 500u64)]
        timeout_ms: u64,
        /// Print NDJSON records instead of text
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
        /// Also write NDJSON records (with host time) to this file
        #[arg(long)]
        to: Option<PathBuf>,
    },
    /// Clear the device and program a YAML task plan
    Apply {
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    let hub = if cli.metrics {
        Some(MetricsHub::new()?)
    } else {
        None
    };
    let ctx = Ctx {
        backend: cli.backend,
        device: cli.device,
        hub: hub.clone(),
    };

    match cli.command {
        Commands::Ports => list_ports(ctx.backend)?,
        Commands::Registers { model, json } => print_registers(model.into(), json)?,
        Commands::Decode {
            model,
            address,
            data,
            frame,
        } => decode_offline(model.into(), address, &data, frame)?,
        Commands::Read {
            model,
            address,
            register,
            json,
        } => read_register(&ctx, model.into(), address, register.as_deref(), json)?,
        Commands::Sniff {
            model,
            count,
            timeout_ms,
            json,
            to,
        } => sniff(&ctx, model.into(), count, timeout_ms, json, to.as_deref())?,
        Commands::Apply { config } => apply(&ctx, &config)?,
    }

    if let Some(hub) = hub {
        print!("{}", hub.encode_text());
    }
    Ok(())
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

struct Ctx {
    backend: Backend,
    device: String,
    hub: Option<MetricsHub>,
}

enum AnyDevice {
    Mock(Device<MockLink>),
    #[cfg(feature = "serial")]
    Serial(Device<harp_transport::SerialLink>),
}

/// Runs `$body` with `$d` bound to the connected device, whatever its link.
macro_rules! on_device {
    ($any:expr, $d:ident => $body:expr) => {
        match $any {
            AnyDevice::Mock(mut $d) => $body,
            #[cfg(feature = "serial")]
            AnyDevice::Serial(mut $d) => $body,
        }
    };
}

fn attach<L: HarpLink>(dev: Device<L>, hub: Option<&MetricsHub>) -> Device<L> {
    match hub {
        Some(h) => dev.with_metrics(h.dev.clone()),
        None => dev,
    }
}

fn connect(ctx: &Ctx, model: DeviceModel) -> Result<AnyDevice> {
    match ctx.backend {
        Backend::Mock => {
            let link = cf::emulated_link(model)?;
            let dev = Device::connect(link, model)?;
            Ok(AnyDevice::Mock(attach(dev, ctx.hub.as_ref())))
        }
        Backend::Serial => connect_serial(ctx, model),
    }
}

#[cfg(feature = "serial")]
fn connect_serial(ctx: &Ctx, model: DeviceModel) -> Result<AnyDevice> {
    let link = harp_transport::SerialLink::open(&ctx.device)?;
    let dev = Device::connect(link, model)?;
    info!(device = %ctx.device, %model, "serial link open");
    Ok(AnyDevice::Serial(attach(dev, ctx.hub.as_ref())))
}

#[cfg(not(feature = "serial"))]
fn connect_serial(ctx: &Ctx, _model: DeviceModel) -> Result<AnyDevice> {
    Err(anyhow::anyhow!(
        "cannot open {}: serial backend not built (enable the `serial` feature)",
        ctx.device
    ))
}

fn list_ports(backend: Backend) -> Result<()> {
    let ports = match backend {
        Backend::Mock => MockLink::list()?,
        Backend::Serial => serial_ports()?,
    };
    for port in ports {
        println!("{}\t{}", port.name, port.driver);
    }
    Ok(())
}

#[cfg(feature = "serial")]
fn serial_ports() -> Result<Vec<harp_transport::PortInfo>> {
    Ok(harp_transport::SerialLink::list()?)
}

#[cfg(not(feature = "serial"))]
fn serial_ports() -> Result<Vec<harp_transport::PortInfo>> {
    Err(TransportError::Unsupported("serial backend not built").into())
}

#[derive(Serialize)]
struct RegisterRow<'a> {
    address: u8,
    name: &'a str,
    width: usize,
    payload_type: PayloadType,
    access: String,
    description: &'a str,
}

fn access_label(access: cf::Access) -> String {
    [
        (cf::Access::READ, 'R'),
        (cf::Access::WRITE, 'W'),
        (cf::Access::EVENT, 'E'),
    ]
    .iter()
    .map(|(flag, c)| if access.contains(*flag) { *c } else { '-' })
    .collect()
}

fn print_registers(model: DeviceModel, json: bool) -> Result<()> {
    let catalog = model.catalog()?;
    let rows: Vec<RegisterRow<'_>> = catalog
        .descriptors()
        .map(|d| RegisterRow {
            address: d.address,
            name: d.name,
            width: d.width,
            payload_type: d.payload_type,
            access: access_label(d.access),
            description: d.description,
        })
        .collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    println!("{model} (WhoAmI {})", model.who_am_i());
    for r in rows {
        println!(
            "{:>3}  {:<26} {:>2}B  {}  {}",
            r.address, r.name, r.width, r.access, r.description
        );
    }
    Ok(())
}

fn parse_hex_bytes(items: &[String]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(items.len());
    for s in items {
        let t = s.trim();
        if t.is_empty() {
            continue;
        }
        let no_prefix = t.strip_prefix("0x").unwrap_or(t);
        let b = u8::from_str_radix(no_prefix, 16)
            .map_err(|e| anyhow::anyhow!("invalid hex byte '{t}': {e}"))?;
        out.push(b);
    }
    Ok(out)
}

fn decode_offline(
    model: DeviceModel,
    address: Option<u8>,
    data_hex: &[String],
    frame: bool,
) -> Result<()> {
    let bytes = parse_hex_bytes(data_hex)?;
    let catalog = model.catalog()?;
    if frame {
        let (msg, used) = harp_transport::parse_frame(&bytes)?;
        if used != bytes.len() {
            anyhow::bail!("{} trailing bytes after frame", bytes.len() - used);
        }
        let rec = cf::decode_message(catalog, &msg)?;
        println!("{}", serde_json::to_string_pretty(&rec)?);
        return Ok(());
    }
    let address = address.ok_or_else(|| anyhow::anyhow!("--address required without --frame"))?;
    let desc = catalog.lookup_by_address(address)?;
    let value = desc.decode(&bytes)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn read_register(
    ctx: &Ctx,
    model: DeviceModel,
    address: Option<u8>,
    register: Option<&str>,
    json: bool,
) -> Result<()> {
    let catalog = model.catalog()?;
    let desc = match (address, register) {
        (Some(a), _) => catalog.lookup_by_address(a)?,
        (None, Some(name)) => catalog
            .lookup_by_name(name)
            .ok_or_else(|| anyhow::anyhow!("no register named {name} on {model}"))?,
        (None, None) => anyhow::bail!("provide --address <n> or --register <name>"),
    };
    let value = on_device!(connect(ctx, model)?, dev => dev.read_address(desc.address)?);
    if json {
        println!("{}", serde_json::to_string(&value)?);
    } else {
        println!("{}({}) = {value}", desc.name, desc.address);
    }
    Ok(())
}

#[derive(Serialize)]
struct CflogHeader<'a> {
    format: &'static str,
    version: u32,
    backend: String,
    device: &'a str,
    model: DeviceModel,
}

/// Queues events on an emulated device so that `sniff` has traffic to show.
fn seed_mock_events(link: &mut MockLink, model: DeviceModel, count: u32) {
    let address = match model {
        DeviceModel::Cuttlefish => 33,
        DeviceModel::CuttlefishFip => 37,
    };
    for i in 0..count {
        link.push_event(address, PayloadType::U8, &[1u8 << (i % 8)]);
    }
}

fn sniff(
    ctx: &Ctx,
    model: DeviceModel,
    count: u32,
    timeout_ms: u64,
    json: bool,
    to: Option<&Path>,
) -> Result<()> {
    let mut writer = match to {
        Some(path) => {
            let file = File::create(path)?;
            let mut w = BufWriter::new(file);
            let header = CflogHeader {
                format: "cflog",
                version: 1,
                backend: format!("{:?}", ctx.backend),
                device: &ctx.device,
                model,
            };
            serde_json::to_writer(&mut w, &header)?;
            w.write_all(b"\n")?;
            Some(w)
        }
        None => None,
    };

    let mut any = connect(ctx, model)?;
    if let AnyDevice::Mock(dev) = &mut any {
        seed_mock_events(dev.link_mut(), model, count);
    }
    let mut seen = 0u32;
    on_device!(any, dev => {
        while seen < count {
            let rec = match dev.recv_record(Some(timeout_ms)) {
                Ok(rec) => rec.with_host_time(time::OffsetDateTime::now_utc()),
                Err(RegistryError::Transport(TransportError::Timeout)) => {
                    debug!("no message within {timeout_ms} ms");
                    if ctx.backend == Backend::Mock {
                        break;
                    }
                    continue;
                }
                Err(e @ RegistryError::Transport(_)) => return Err(e.into()),
                Err(e) => {
                    eprintln!("skipped: {e}");
                    continue;
                }
            };
            seen += 1;
            let line = serde_json::to_string(&rec)?;
            if json {
                println!("{line}");
            } else {
                println!("{rec}");
            }
            if let Some(w) = writer.as_mut() {
                w.write_all(line.as_bytes())?;
                w.write_all(b"\n")?;
            }
        }
    });
    if let Some(mut w) = writer {
        w.flush()?;
    }
    info!(messages = seen, "sniff done");
    Ok(())
}

fn apply(ctx: &Ctx, config: &Path) -> Result<()> {
    let plan = cf::load_task_plan(config)?;
    let model = plan.model();
    let report = on_device!(connect(ctx, model)?, dev => cf::apply_plan(&mut dev, &plan)?);
    println!(
        "applied {} tasks to {model}; device reports {}{}",
        report.tasks_written,
        report.task_count,
        if report.started { "; started" } else { "" }
    );
    Ok(())
}
