use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Once;
use std::time::{Duration, Instant};

use crate::flags::StatusFlags;
use crate::opcodes::decode;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Counter for instructions executed by opcode
    pub static ref CPU_INSTRUCTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("cpu_instructions_total", "Total number of CPU instructions executed by opcode"),
        &["opcode", "instruction"]
    ).expect("Failed to create CPU instructions counter");

    /// Histogram for instruction execution time
    pub static ref INSTRUCTION_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("instruction_duration_seconds", "Time spent executing instructions")
            .buckets(vec![0.000_000_1, 0.000_000_5, 0.000_001, 0.000_005, 0.00001, 0.0001]),
        &["instruction"]
    ).expect("Failed to create instruction duration histogram");

    /// Counter for undocumented opcodes met during decode
    pub static ref UNKNOWN_OPCODES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("cpu_unknown_opcodes_total", "Undocumented opcodes encountered"),
        &["opcode"]
    ).expect("Failed to create unknown opcodes counter");

    /// Counter for processor resets
    pub static ref CPU_RESETS_TOTAL: Counter = Counter::new(
        "cpu_resets_total", "Total number of processor resets"
    ).expect("Failed to create resets counter");

    /// Counter for image loads
    pub static ref IMAGE_LOADS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("image_loads_total", "Memory image load attempts"),
        &["result"]
    ).expect("Failed to create image loads counter");

    /// Gauge for register values
    pub static ref CPU_REGISTER_VALUES: GaugeVec = GaugeVec::new(
        Opts::new("cpu_register_value", "Current CPU register values"),
        &["register"]
    ).expect("Failed to create CPU register values gauge");

    /// Instruction counter and histogram children, indexed by opcode byte
    static ref INSTRUCTION_HANDLES: Vec<Option<(Counter, Histogram)>> = (0..=255u8)
        .map(|opcode| {
            decode(opcode).map(|instruction| {
                let name = instruction.mnemonic.name();
                (
                    CPU_INSTRUCTIONS_TOTAL.with_label_values(&[&opcode_label(opcode), name]),
                    INSTRUCTION_DURATION.with_label_values(&[name]),
                )
            })
        })
        .collect();

    /// Gauge for flag states
    pub static ref CPU_FLAGS: GaugeVec = GaugeVec::new(
        Opts::new("cpu_flags", "Current CPU flag states (0 or 1)"),
        &["flag"]
    ).expect("Failed to create CPU flags gauge");
}

static INIT: Once = Once::new();

/// Registers every collector with [`REGISTRY`]. Safe to call more than once.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(CPU_INSTRUCTIONS_TOTAL.clone()))
            .expect("Failed to register CPU instructions counter");

        REGISTRY
            .register(Box::new(INSTRUCTION_DURATION.clone()))
            .expect("Failed to register instruction duration histogram");

        REGISTRY
            .register(Box::new(UNKNOWN_OPCODES_TOTAL.clone()))
            .expect("Failed to register unknown opcodes counter");

        REGISTRY
            .register(Box::new(CPU_RESETS_TOTAL.clone()))
            .expect("Failed to register resets counter");

        REGISTRY
            .register(Box::new(IMAGE_LOADS_TOTAL.clone()))
            .expect("Failed to register image loads counter");

        REGISTRY
            .register(Box::new(CPU_REGISTER_VALUES.clone()))
            .expect("Failed to register CPU register values gauge");

        REGISTRY
            .register(Box::new(CPU_FLAGS.clone()))
            .expect("Failed to register CPU flags gauge");
    });
}

fn opcode_label(opcode: u8) -> String {
    format!("0x{:02X}", opcode)
}

/// Record a CPU instruction execution
pub fn record_instruction(opcode: u8, duration: Duration) {
    if let Some((counter, histogram)) = &INSTRUCTION_HANDLES[opcode as usize] {
        counter.inc();
        histogram.observe(duration.as_secs_f64());
    }
}

pub fn record_unknown_opcode(opcode: u8) {
    UNKNOWN_OPCODES_TOTAL
        .with_label_values(&[&opcode_label(opcode)])
        .inc();
}

pub fn record_reset() {
    CPU_RESETS_TOTAL.inc();
}

pub fn record_image_load(success: bool) {
    let result = if success { "ok" } else { "failed" };
    IMAGE_LOADS_TOTAL.with_label_values(&[result]).inc();
}

/// Update register and flag gauges
pub fn update_cpu_registers(a: u8, x: u8, y: u8, pc: u16, sp: u8, flags: StatusFlags) {
    for (register, value) in [
        ("A", a as f64),
        ("X", x as f64),
        ("Y", y as f64),
        ("PC", pc as f64),
        ("SP", sp as f64),
        ("STATUS", flags.to_byte() as f64),
    ] {
        CPU_REGISTER_VALUES.with_label_values(&[register]).set(value);
    }

    update_cpu_flags(flags);
}

pub fn update_cpu_flags(flags: StatusFlags) {
    for (name, set) in [
        ("carry", flags.carry),
        ("zero", flags.zero),
        ("interrupt_disable", flags.interrupt_disable),
        ("decimal_mode", flags.decimal_mode),
        ("break_command", flags.break_command),
        ("overflow", flags.overflow),
        ("negative", flags.negative),
    ] {
        CPU_FLAGS
            .with_label_values(&[name])
            .set(if set { 1.0 } else { 0.0 });
    }
}

/// Renders the registry in the Prometheus text exposition format.
pub fn gather_text() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
}

/// Helper struct for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exposition_contains_recorded_instruction() {
        init_metrics();
        init_metrics();
        record_instruction(0xEA, Duration::from_nanos(50));
        update_cpu_registers(1, 2, 3, 0x8000, 0xFD, StatusFlags::default());

        let text = gather_text().unwrap();
        assert!(text.contains("cpu_instructions_total"));
        assert!(text.contains("instruction=\"NOP\""));
        assert!(text.contains("cpu_register_value"));
    }

    #[test]
    fn test_cached_handle_feeds_labelled_series() {
        // LDA abs
        let series = CPU_INSTRUCTIONS_TOTAL.with_label_values(&["0xAD", "LDA"]);
        let before = series.get();
        record_instruction(0xAD, Duration::from_nanos(10));
        assert!(series.get() >= before + 1.0);
    }

    #[test]
    fn test_undocumented_opcode_is_not_counted_as_instruction() {
        assert!(INSTRUCTION_HANDLES[0x02].is_none());
        assert_eq!(INSTRUCTION_HANDLES.iter().flatten().count(), 151);
        record_instruction(0x02, Duration::from_nanos(10));
    }
}
