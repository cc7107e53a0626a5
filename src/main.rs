mod backup;
mod db;
mod emergency;
mod ipc;
mod paths;
mod progress;
mod registry;
mod restore;

use std::io::{self, BufRead, Write};

fn main() {
    // Stdout carries the protocol; all logging goes to stderr.
    let _logger = flexi_logger::Logger::try_with_env_or_str("info")
        .map(|logger| logger.log_to_stderr())
        .and_then(|logger| logger.start())
        .ok();

    let mut state = ipc::AppState::new();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No parsed id to echo back.
                let resp = ipc::error::err("", "bad_json", e.to_string(), None);
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
