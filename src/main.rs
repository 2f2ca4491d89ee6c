use clap::Parser;
use log::{error, info};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use mos6502_core::config::RunConfig;
use mos6502_core::emulator::{CpuState, Emulator, StopSignal};
use mos6502_core::metrics::{gather_text, init_metrics};
use mos6502_core::server::{run_server, shared};
use mos6502_core::snapshots::Snapshot;
use mos6502_core::UnknownOpcodePolicy;

/// Runs a raw 64 KiB 6502 memory image.
#[derive(Parser, Debug)]
#[command(name = "mos6502", version, about)]
struct Cli {
    /// Binary image loaded at $0000
    rom: Option<PathBuf>,

    /// JSON run configuration; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start address, overriding the reset vector (hex, e.g. 0400)
    #[arg(long, value_parser = parse_address)]
    start: Option<u16>,

    /// Stop before executing the instruction at this address (hex)
    #[arg(long, value_parser = parse_address)]
    break_at: Option<u16>,

    /// Trap address that counts as a pass (hex)
    #[arg(long, value_parser = parse_address)]
    success: Option<u16>,

    #[arg(long)]
    max_steps: Option<u64>,

    /// Keep running when an instruction jumps to itself
    #[arg(long)]
    no_trap_stop: bool,

    /// Skip undocumented opcodes instead of halting
    #[arg(long)]
    skip_unknown: bool,

    /// Serve the HTTP monitor on this address instead of running
    #[arg(long)]
    serve: Option<SocketAddr>,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    metrics: bool,

    /// Write a machine snapshot here after the run
    #[arg(long)]
    snapshot_out: Option<PathBuf>,
}

fn parse_address(text: &str) -> Result<u16, String> {
    let digits = text
        .trim_start_matches('$')
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|err| format!("invalid address {:?}: {}", text, err))
}

impl Cli {
    fn into_config(self) -> Result<RunConfig, String> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_json_file(path).map_err(|err| err.to_string())?,
            None => RunConfig::default(),
        };

        if let Some(rom) = self.rom {
            config.rom_path = rom;
        }
        if self.start.is_some() {
            config.start_address = self.start;
        }
        if self.break_at.is_some() {
            config.break_at = self.break_at;
        }
        if self.success.is_some() {
            config.success_address = self.success;
        }
        if self.max_steps.is_some() {
            config.max_steps = self.max_steps;
        }
        if self.no_trap_stop {
            config.stop_on_trap = false;
        }
        if self.skip_unknown {
            config.unknown_opcode = UnknownOpcodePolicy::Skip;
        }
        if self.serve.is_some() {
            config.serve = self.serve;
        }
        if self.metrics {
            config.print_metrics = true;
        }
        if self.snapshot_out.is_some() {
            config.snapshot_out = self.snapshot_out;
        }
        Ok(config)
    }
}

fn print_state(state: &CpuState) {
    println!("CPU State:");
    println!("A: ${:02X}", state.a);
    println!("X: ${:02X}", state.x);
    println!("Y: ${:02X}", state.y);
    println!("PC: ${:04X}", state.pc);
    println!("SP: ${:02X}", state.sp);
    println!("Status: ${:02X}", state.status);
    println!("Instructions: {}", state.instructions);
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    init_metrics();

    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            return ExitCode::from(1);
        }
    };

    let mut emulator = Emulator::new();
    match emulator.load_image_file(&config.rom_path) {
        Ok(size) => info!("loaded {} bytes from {}", size, config.rom_path.display()),
        Err(err) => {
            error!("{}", err);
            return ExitCode::from(1);
        }
    }
    emulator.reset_to(config.start_address);
    info!("starting at ${:04X}", emulator.cpu.pc);

    if let Some(addr) = config.serve {
        run_server(shared(emulator), addr).await;
        return ExitCode::SUCCESS;
    }

    let stop = StopSignal::new();
    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_stop.request_stop();
        }
    });

    let run_config = config.clone();
    let run = tokio::task::spawn_blocking(move || {
        let summary = emulator.run(&run_config, &stop);
        (emulator, summary)
    })
    .await;
    let (emulator, summary) = match run {
        Ok(finished) => finished,
        Err(err) => {
            error!("run loop aborted: {}", err);
            return ExitCode::from(2);
        }
    };

    println!("Stopped: {} after {} steps", summary.reason, summary.steps);
    print_state(&summary.final_state);

    if let Some(path) = &config.snapshot_out {
        let snapshot = Snapshot::capture("final", &emulator.cpu, &emulator.memory);
        match snapshot.save(path) {
            Ok(()) => info!("snapshot written to {}", path.display()),
            Err(err) => error!("cannot write snapshot to {}: {}", path.display(), err),
        }
    }

    if config.print_metrics {
        match gather_text() {
            Ok(text) => print!("{}", text),
            Err(err) => error!("cannot encode metrics: {}", err),
        }
    }

    if summary.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_prefixes() {
        assert_eq!(parse_address("0400"), Ok(0x0400));
        assert_eq!(parse_address("$3469"), Ok(0x3469));
        assert_eq!(parse_address("0xFFFC"), Ok(0xFFFC));
        assert!(parse_address("10000").is_err());
        assert!(parse_address("zz").is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from([
            "mos6502",
            "image.bin",
            "--start",
            "0400",
            "--success",
            "3469",
            "--skip-unknown",
        ]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.rom_path, PathBuf::from("image.bin"));
        assert_eq!(config.start_address, Some(0x0400));
        assert_eq!(config.success_address, Some(0x3469));
        assert_eq!(config.unknown_opcode, UnknownOpcodePolicy::Skip);
        assert!(config.stop_on_trap);
    }
}
