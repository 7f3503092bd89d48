//! Subordinate process entry point.
//!
//! Runs when the binary is started with `__subordinate`. It serves exactly
//! one request, then waits for the worker to close its stdin before exiting.
//! A task that errors is reported as `Failed`; only an undecodable request
//! line is `Rejected`.

use super::ipc::{MessageReader, MessageWriter, PipeFd};
use super::protocol::{SubordinateRequest, SubordinateResponse};
use std::io;
use tracing::{debug, error};

/// Read one request, run it, report, and linger until released.
pub fn serve(reader: &mut MessageReader, writer: &mut MessageWriter) -> io::Result<()> {
    let response = match reader.read_message::<SubordinateRequest>() {
        Ok(Some(request)) => handle(request),
        // Worker went away before sending anything.
        Ok(None) => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            SubordinateResponse::rejected(format!("Invalid request: {}", e))
        }
        Err(e) => return Err(e),
    };

    writer.write_message(&response)?;
    reader.drain_to_eof()
}

fn handle(request: SubordinateRequest) -> SubordinateResponse {
    let SubordinateRequest {
        index,
        task,
        payload,
    } = request;
    debug!(index, task = task.name(), "Running task");

    match task.run(payload) {
        Ok(value) => SubordinateResponse::done(value),
        Err(e) => SubordinateResponse::failed(e.to_string()),
    }
}

/// Run the subordinate main function. Never returns.
pub fn run_subordinate_main() -> ! {
    // Orphaned grandchildren are re-parented to us instead of init, so the
    // worker can still find them under our pid.
    #[cfg(target_os = "linux")]
    if let Err(e) = nix::sys::prctl::set_child_subreaper(true) {
        debug!(error = %e, "Could not become a child subreaper");
    }

    let result = PipeFd::stdin().and_then(|stdin| {
        let stdout = PipeFd::stdout()?;
        let mut reader = MessageReader::new(stdin);
        let mut writer = MessageWriter::new(stdout);
        serve(&mut reader, &mut writer)
    });

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!(error = %e, "Subordinate failed");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskKind;
    use serde_json::json;

    fn pipe_pair() -> (PipeFd, PipeFd) {
        let (r, w) = nix::unistd::pipe().unwrap();
        (PipeFd::from(r), PipeFd::from(w))
    }

    /// Drive `serve` with `input` on its stdin and return what it wrote.
    fn run_serve(input: &[u8]) -> Option<SubordinateResponse> {
        let (req_r, req_w) = pipe_pair();
        let (resp_r, resp_w) = pipe_pair();

        let server = std::thread::spawn(move || {
            let mut reader = MessageReader::new(req_r);
            let mut writer = MessageWriter::new(resp_w);
            serve(&mut reader, &mut writer)
        });

        let mut request_writer = MessageWriter::new(req_w);
        request_writer.write_raw(input).unwrap();

        let mut response_reader = MessageReader::new(resp_r);
        let response = response_reader.read_message().unwrap();

        drop(request_writer);
        server.join().unwrap().unwrap();
        response
    }

    #[test]
    fn test_serves_command_request() {
        let request = SubordinateRequest {
            index: 0,
            task: TaskKind::command("echo", vec!["hello".into(), "{}".into()]),
            payload: json!("world"),
        };
        let mut line = serde_json::to_vec(&request).unwrap();
        line.push(b'\n');

        match run_serve(&line) {
            Some(SubordinateResponse::Done { value }) => {
                assert_eq!(value, Some(json!("hello world")));
            }
            other => panic!("Expected done, got {:?}", other),
        }
    }

    #[test]
    fn test_task_error_is_failed() {
        let request = SubordinateRequest {
            index: 1,
            task: TaskKind::command("/nonexistent/apkx-analyzer", Vec::new()),
            payload: json!("a.apk"),
        };
        let mut line = serde_json::to_vec(&request).unwrap();
        line.push(b'\n');

        match run_serve(&line) {
            Some(SubordinateResponse::Failed { message }) => {
                assert!(message.contains("/nonexistent/apkx-analyzer"));
            }
            other => panic!("Expected failed, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_garbage_request() {
        match run_serve(b"not json\n") {
            Some(SubordinateResponse::Rejected { message }) => {
                assert!(message.starts_with("Invalid request"));
            }
            other => panic!("Expected rejected, got {:?}", other),
        }
    }
}
