use std::fs::File;
use std::time::Duration;

use mvlc_frame::{ReaderConfig, ReaderCounters, ReadoutReader};
use mvlc_readout::{
    EventCounter, ParserCounters, ReadoutConfig, ReadoutParser, ReadoutStructure, ReadoutWorker,
    StopHandle, WorkerConfig,
};
use mvlc_transport::{ConnectionType, StreamPipe, JUMBO_FRAME_MAX_SIZE};
use serde::Serialize;
use tracing::info;

use crate::cmd::ReplayArgs;
use crate::exit::{io_error, readout_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_json, print_table, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const MIN_USB_BUFFER_SIZE: usize = 1024;

#[derive(Serialize)]
struct ReplayOutput {
    connection: &'static str,
    interrupted: bool,
    reader: ReaderCounters,
    parser: ParserCounters,
    events: EventCounter,
}

pub fn run(args: ReplayArgs, format: OutputFormat) -> CliResult<i32> {
    let connection_type = ConnectionType::from(args.connection);
    let min_buffer_size = match connection_type {
        ConnectionType::Usb => MIN_USB_BUFFER_SIZE,
        ConnectionType::Eth => JUMBO_FRAME_MAX_SIZE,
    };
    if args.buffer_size < min_buffer_size {
        return Err(CliError::new(
            USAGE,
            format!(
                "--buffer-size must be at least {min_buffer_size} for {}",
                connection_type.as_str()
            ),
        ));
    }
    let structure = match &args.config {
        Some(path) => ReadoutConfig::load(path)
            .and_then(|config| config.readout_structure())
            .map_err(|err| readout_error("invalid readout config", err))?,
        None => ReadoutStructure::default(),
    };

    let file = File::open(&args.file)
        .map_err(|err| io_error(&format!("failed opening {}", args.file.display()), err))?;
    let reader = ReadoutReader::with_config(
        StreamPipe::new(file, connection_type),
        ReaderConfig {
            buffer_capacity: args.buffer_size,
            ..ReaderConfig::for_connection(connection_type)
        },
    );
    let mut worker = ReadoutWorker::spawn(reader, WorkerConfig::default())
        .map_err(|err| readout_error("failed starting readout", err))?;
    let stop = worker.stop_handle();
    install_ctrlc_handler(stop.clone())?;

    let mut parser = ReadoutParser::new(structure);
    let mut events = EventCounter::new();
    loop {
        if let Some(buffer) = worker.next_buffer(POLL_INTERVAL) {
            parser.parse_buffer(&buffer, &mut events);
            worker.recycle(buffer);
        } else if worker.is_finished() {
            while let Some(buffer) = worker.next_buffer(Duration::ZERO) {
                parser.parse_buffer(&buffer, &mut events);
            }
            break;
        }
    }
    let reader = worker
        .join()
        .map_err(|err| readout_error("readout failed", err))?;
    info!(
        buffers = reader.buffers,
        events = events.total_events(),
        anomalies = parser.counters().total_anomalies(),
        "replay finished"
    );

    let out = ReplayOutput {
        connection: connection_type.as_str(),
        interrupted: stop.is_stopped(),
        reader,
        parser: parser.counters().clone(),
        events,
    };
    print_output(&out, format);
    Ok(SUCCESS)
}

fn install_ctrlc_handler(stop: StopHandle) -> CliResult<()> {
    ctrlc::set_handler(move || stop.stop()).map_err(|err| {
        CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
    })
}

fn print_output(out: &ReplayOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(out),
        OutputFormat::Table => {
            let mut rows = vec![
                vec!["buffers".to_string(), out.reader.buffers.to_string()],
                vec!["bytes read".to_string(), out.reader.bytes_read.to_string()],
                vec!["events".to_string(), out.events.total_events().to_string()],
                vec![
                    "system events".to_string(),
                    out.parser.system_events.values().sum::<u64>().to_string(),
                ],
                vec!["unused bytes".to_string(), out.parser.unused_bytes.to_string()],
                vec![
                    "packet loss".to_string(),
                    out.parser.eth_packet_loss.to_string(),
                ],
            ];
            rows.extend(
                out.parser
                    .anomalies
                    .iter()
                    .map(|(kind, count)| vec![format!("anomaly: {kind}"), count.to_string()]),
            );
            print_table(&["COUNTER", "VALUE"], rows);
        }
        OutputFormat::Pretty => {
            println!("Replay ({}):", out.connection);
            println!("  Buffers:       {}", out.reader.buffers);
            println!("  Bytes read:    {}", out.reader.bytes_read);
            println!("  Events:        {}", out.events.total_events());
            for (index, event) in out.events.events.iter().enumerate() {
                println!("    event {index}: {} hits", event.hits);
            }
            println!("  Anomalies:     {}", out.parser.total_anomalies());
            if out.interrupted {
                println!("  (interrupted)");
            }
        }
    }
}
