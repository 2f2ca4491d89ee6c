use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use warp::Filter;

use crate::cpu::StepResult;
use crate::emulator::{CpuState, Emulator};
use crate::metrics::{gather_text, init_metrics, update_cpu_registers, Timer};
use crate::snapshots::{CreateSnapshotRequest, Snapshot};

pub type SharedEmulator = Arc<Mutex<Emulator>>;

/// Upper bound on instructions run by one `POST /execute`.
pub const MAX_EXECUTE_STEPS: u64 = 100_000;

#[derive(Debug, Deserialize)]
pub struct MemoryWrite {
    pub address: u16,
    pub value: u8,
}

#[derive(Debug, Deserialize)]
pub struct MemoryRead {
    pub address: u16,
    pub length: Option<u16>,
}

#[derive(Debug, Serialize)]
pub struct MemoryData {
    pub address: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Deserialize)]
pub struct ProgramLoad {
    pub address: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteSteps {
    pub steps: u64,
}

#[derive(Debug, Serialize)]
pub struct StepReply {
    pub instruction: Option<String>,
    pub trapped: bool,
    pub state: CpuState,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

pub fn shared(emulator: Emulator) -> SharedEmulator {
    Arc::new(Mutex::new(emulator))
}

// A panic inside a handler must not wedge the monitor for good.
fn lock(emulator: &SharedEmulator) -> MutexGuard<'_, Emulator> {
    emulator.lock().unwrap_or_else(PoisonError::into_inner)
}

fn with_emulator(emulator: SharedEmulator) -> impl Filter<Extract = (SharedEmulator,), Error = Infallible> + Clone {
    warp::any().map(move || emulator.clone())
}

/// Every monitor route, without CORS, for serving or for `warp::test`.
pub fn routes(
    emulator: SharedEmulator,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let get_state = warp::path!("state")
        .and(warp::get())
        .and(with_emulator(emulator.clone()))
        .and_then(get_state_handler);

    let step = warp::path!("step")
        .and(warp::post())
        .and(with_emulator(emulator.clone()))
        .and_then(step_handler);

    let execute = warp::path!("execute")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_emulator(emulator.clone()))
        .and_then(execute_handler);

    let reset = warp::path!("reset")
        .and(warp::post())
        .and(with_emulator(emulator.clone()))
        .and_then(reset_handler);

    let read_memory = warp::path!("memory")
        .and(warp::get())
        .and(warp::query::<MemoryRead>())
        .and(with_emulator(emulator.clone()))
        .and_then(read_memory_handler);

    let write_memory = warp::path!("memory")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_emulator(emulator.clone()))
        .and_then(write_memory_handler);

    let load_program = warp::path!("program")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_emulator(emulator.clone()))
        .and_then(load_program_handler);

    let create_snapshot = warp::path!("snapshot")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_emulator(emulator.clone()))
        .and_then(create_snapshot_handler);

    let restore_snapshot = warp::path!("snapshot" / "restore")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_emulator(emulator))
        .and_then(restore_snapshot_handler);

    let metrics = warp::path!("metrics")
        .and(warp::get())
        .and_then(metrics_handler);

    get_state
        .or(step)
        .or(execute)
        .or(reset)
        .or(read_memory)
        .or(write_memory)
        .or(load_program)
        .or(create_snapshot)
        .or(restore_snapshot)
        .or(metrics)
}

pub async fn run_server(emulator: SharedEmulator, addr: SocketAddr) {
    init_metrics();

    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type"])
        .allow_methods(vec!["GET", "POST"]);

    info!("6502 monitor listening on http://{}", addr);
    info!("  GET  /state             - registers and flags");
    info!("  POST /step              - execute one instruction");
    info!("  POST /execute           - execute up to {{\"steps\": n}} instructions");
    info!("  POST /reset             - reset through $FFFC");
    info!("  GET  /memory            - read ?address=&length=");
    info!("  POST /memory            - write {{\"address\", \"value\"}}");
    info!("  POST /program           - load {{\"address\", \"data\"}}");
    info!("  POST /snapshot          - capture machine state");
    info!("  POST /snapshot/restore  - restore a captured snapshot");
    info!("  GET  /metrics           - Prometheus metrics");

    warp::serve(routes(emulator).with(cors)).run(addr).await;
}

async fn get_state_handler(emulator: SharedEmulator) -> Result<impl warp::Reply, warp::Rejection> {
    let state = lock(&emulator).get_state();
    Ok(warp::reply::json(&ApiResponse::success(state)))
}

async fn step_handler(emulator: SharedEmulator) -> Result<impl warp::Reply, warp::Rejection> {
    let mut emulator = lock(&emulator);

    let response = match emulator.step() {
        Ok(result) => {
            let (instruction, trapped) = match result {
                StepResult::Executed(instruction) => (Some(instruction.to_string()), false),
                StepResult::Trapped { .. } => (None, true),
            };
            let state = emulator.get_state();
            update_cpu_registers(state.a, state.x, state.y, state.pc, state.sp, state.flags);
            ApiResponse::success(StepReply {
                instruction,
                trapped,
                state,
            })
        }
        Err(err) => {
            warn!("monitor step failed: {}", err);
            ApiResponse::error(err.to_string())
        }
    };

    Ok(warp::reply::json(&response))
}

async fn execute_handler(request: ExecuteSteps, emulator: SharedEmulator) -> Result<impl warp::Reply, warp::Rejection> {
    let timer = Timer::new();
    let steps = request.steps.min(MAX_EXECUTE_STEPS);
    if steps < request.steps {
        warn!("execute request for {} steps capped at {}", request.steps, steps);
    }

    // Off the async workers; the emulator lock is held for the whole batch
    let batch = tokio::task::spawn_blocking(move || {
        let mut guard = lock(&emulator);
        guard.execute_steps(steps)
    });

    let response = match batch.await {
        Ok(result) => {
            info!(
                "monitor executed {} of {} steps in {:?}",
                result.steps_executed,
                steps,
                timer.elapsed()
            );
            ApiResponse::success(result)
        }
        Err(err) => ApiResponse::error(format!("execution aborted: {}", err)),
    };
    Ok(warp::reply::json(&response))
}

async fn reset_handler(emulator: SharedEmulator) -> Result<impl warp::Reply, warp::Rejection> {
    let mut emulator = lock(&emulator);
    emulator.reset();
    Ok(warp::reply::json(&ApiResponse::success(emulator.get_state())))
}

async fn read_memory_handler(query: MemoryRead, emulator: SharedEmulator) -> Result<impl warp::Reply, warp::Rejection> {
    let length = query.length.unwrap_or(1);
    let data = lock(&emulator).read_memory(query.address, length);
    let response = ApiResponse::success(MemoryData {
        address: query.address,
        data,
    });
    Ok(warp::reply::json(&response))
}

async fn write_memory_handler(request: MemoryWrite, emulator: SharedEmulator) -> Result<impl warp::Reply, warp::Rejection> {
    lock(&emulator).write_memory(request.address, request.value);
    let response = ApiResponse::success(format!(
        "Wrote ${:02X} to address ${:04X}",
        request.value, request.address
    ));
    Ok(warp::reply::json(&response))
}

async fn load_program_handler(request: ProgramLoad, emulator: SharedEmulator) -> Result<impl warp::Reply, warp::Rejection> {
    let response = match lock(&emulator).load_program(request.address, &request.data) {
        Ok(()) => ApiResponse::success(format!(
            "Loaded {} bytes at address ${:04X}",
            request.data.len(),
            request.address
        )),
        Err(err) => ApiResponse::error(err.to_string()),
    };
    Ok(warp::reply::json(&response))
}

async fn create_snapshot_handler(
    request: CreateSnapshotRequest,
    emulator: SharedEmulator,
) -> Result<impl warp::Reply, warp::Rejection> {
    let emulator = lock(&emulator);
    let name = request.name.unwrap_or_else(|| format!("pc-{:04X}", emulator.cpu.pc));
    let snapshot = Snapshot::capture(name, &emulator.cpu, &emulator.memory);
    info!("captured snapshot {} ({})", snapshot.id, snapshot.name);
    Ok(warp::reply::json(&ApiResponse::success(snapshot)))
}

async fn restore_snapshot_handler(snapshot: Snapshot, emulator: SharedEmulator) -> Result<impl warp::Reply, warp::Rejection> {
    let mut guard = lock(&emulator);
    let emulator = &mut *guard;

    let response = match snapshot.restore(&mut emulator.cpu, &mut emulator.memory) {
        Ok(()) => ApiResponse::success(emulator.get_state()),
        Err(err) => {
            warn!("snapshot {} rejected: {}", snapshot.id, err);
            ApiResponse::error(err.to_string())
        }
    };
    Ok(warp::reply::json(&response))
}

async fn metrics_handler() -> Result<impl warp::Reply, warp::Rejection> {
    init_metrics();
    match gather_text() {
        Ok(metrics_text) => Ok(warp::reply::with_header(
            metrics_text,
            "content-type",
            "text/plain; version=0.0.4",
        )),
        Err(err) => Ok(warp::reply::with_header(
            format!("Error encoding metrics: {}", err),
            "content-type",
            "text/plain",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn monitor_with(program: &[u8]) -> SharedEmulator {
        let mut emulator = Emulator::new();
        emulator.load_program(0x0600, program).unwrap();
        emulator.load_program(0xFFFC, &[0x00, 0x06]).unwrap();
        emulator.reset();
        shared(emulator)
    }

    fn body(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_state_and_step() {
        let emulator = monitor_with(&[0xA9, 0x05, 0x69, 0x03]);
        let api = routes(emulator.clone());

        let response = warp::test::request().method("GET").path("/state").reply(&api).await;
        assert_eq!(response.status(), 200);
        assert_eq!(body(response.body())["data"]["pc"], 0x0600);

        let response = warp::test::request().method("POST").path("/step").reply(&api).await;
        let reply = body(response.body());
        assert_eq!(reply["success"], true);
        assert_eq!(reply["data"]["instruction"], "LDA (Immediate)");
        assert_eq!(reply["data"]["state"]["a"], 5);
    }

    #[tokio::test]
    async fn test_execute_steps() {
        let api = routes(monitor_with(&[0xA9, 0x05, 0x69, 0x03, 0x4C, 0x04, 0x06]));

        let response = warp::test::request()
            .method("POST")
            .path("/execute")
            .json(&json!({ "steps": 100 }))
            .reply(&api)
            .await;
        let reply = body(response.body());
        assert_eq!(reply["data"]["steps_executed"], 3);
        assert_eq!(reply["data"]["stopped"]["reason"], "trapped");
        assert_eq!(reply["data"]["final_state"]["a"], 8);
    }

    #[tokio::test]
    async fn test_oversized_execute_is_capped() {
        // NOP; JMP $0600 never traps
        let emulator = monitor_with(&[0xEA, 0x4C, 0x00, 0x06]);
        let api = routes(emulator.clone());

        let response = warp::test::request()
            .method("POST")
            .path("/execute")
            .json(&json!({ "steps": u64::MAX }))
            .reply(&api)
            .await;
        let reply = body(response.body());
        assert_eq!(reply["success"], true);
        assert_eq!(reply["data"]["steps_executed"], MAX_EXECUTE_STEPS);
        assert!(reply["data"]["stopped"].is_null());

        let response = warp::test::request().method("GET").path("/state").reply(&api).await;
        assert_eq!(body(response.body())["data"]["instructions"], MAX_EXECUTE_STEPS);
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let api = routes(monitor_with(&[]));

        warp::test::request()
            .method("POST")
            .path("/memory")
            .json(&json!({ "address": 0x0200, "value": 0x7F }))
            .reply(&api)
            .await;

        let response = warp::test::request()
            .method("GET")
            .path("/memory?address=512&length=2")
            .reply(&api)
            .await;
        assert_eq!(body(response.body())["data"]["data"], json!([0x7F, 0x00]));
    }

    #[tokio::test]
    async fn test_oversized_program_reports_error() {
        let api = routes(monitor_with(&[]));
        let response = warp::test::request()
            .method("POST")
            .path("/program")
            .json(&json!({ "address": 0xFFFF, "data": [1, 2] }))
            .reply(&api)
            .await;
        let reply = body(response.body());
        assert_eq!(reply["success"], false);
        assert!(reply["error"].as_str().unwrap().contains("2 bytes"));
    }

    #[tokio::test]
    async fn test_unknown_opcode_step_is_an_error() {
        let api = routes(monitor_with(&[0x02]));
        let response = warp::test::request().method("POST").path("/step").reply(&api).await;
        let reply = body(response.body());
        assert_eq!(reply["success"], false);
        assert!(reply["data"].is_null());
    }

    #[tokio::test]
    async fn test_snapshot_and_restore() {
        let emulator = monitor_with(&[0xA9, 0x05, 0xEA]);
        let api = routes(emulator.clone());

        let response = warp::test::request()
            .method("POST")
            .path("/snapshot")
            .json(&json!({ "name": "start" }))
            .reply(&api)
            .await;
        let snapshot = body(response.body())["data"].clone();
        assert_eq!(snapshot["name"], "start");

        warp::test::request().method("POST").path("/step").reply(&api).await;
        assert_eq!(lock(&emulator).cpu.a, 5);

        let response = warp::test::request()
            .method("POST")
            .path("/snapshot/restore")
            .json(&snapshot)
            .reply(&api)
            .await;
        assert_eq!(body(response.body())["success"], true);
        assert_eq!(lock(&emulator).cpu.a, 0);
        assert_eq!(lock(&emulator).cpu.pc, 0x0600);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let api = routes(monitor_with(&[0xEA]));
        warp::test::request().method("POST").path("/step").reply(&api).await;

        let response = warp::test::request().method("GET").path("/metrics").reply(&api).await;
        assert_eq!(response.status(), 200);
        let text = String::from_utf8(response.body().to_vec()).unwrap();
        assert!(text.contains("cpu_instructions_total"));
    }
}
