#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

use cdlcore::archive::zip::ZipArchiveWriter;
use cdlcore::task::{CancelFlag, Progress, Status, TaskContext};

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn redirect(location: &str) -> Self {
        Self {
            status: 302,
            headers: vec![("Location".into(), location.into())],
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn not_found() -> Self {
        Self {
            status: 404,
            headers: Vec::new(),
            body: b"not found".to_vec(),
        }
    }
}

/// Serve `routes` (path -> reply) on a local port until the test exits.
/// Returns the base URL.
pub fn serve(routes: Vec<(&str, Reply)>) -> String {
    let routes: HashMap<String, Reply> = routes
        .into_iter()
        .map(|(path, reply)| (path.to_string(), reply))
        .collect();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let Ok(read_half) = stream.try_clone() else { continue };
            let mut reader = BufReader::new(read_half);
            let mut request_line = String::new();
            if reader.read_line(&mut request_line).is_err() {
                continue;
            }
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(n) if n > 2 => {}
                    _ => break,
                }
            }
            let path = request_line
                .split_whitespace()
                .nth(1)
                .unwrap_or("/")
                .to_string();
            let reply = routes.get(&path).cloned().unwrap_or_else(Reply::not_found);
            let mut head = format!(
                "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n",
                reply.status,
                reply.body.len()
            );
            for (name, value) in &reply.headers {
                head.push_str(&format!("{name}: {value}\r\n"));
            }
            head.push_str("\r\n");
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&reply.body);
            let _ = stream.flush();
        }
    });
    format!("http://{addr}")
}

/// Build a zip in memory from `(name, data)` pairs.
pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("a.zip");
    write_zip(&path, files);
    fs::read(&path).unwrap()
}

pub fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
    let mut writer = ZipArchiveWriter::create(path).unwrap();
    for (name, data) in files {
        if name.ends_with('/') {
            writer.add_directory(name).unwrap();
        } else {
            writer.start_file(name).unwrap();
            writer.write_chunk(data).unwrap();
        }
    }
    writer.finish().unwrap();
}

pub fn write_file(path: &Path, data: impl AsRef<[u8]>) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

/// Everything a context reported.
#[derive(Clone, Default)]
pub struct Recorder {
    pub statuses: Arc<Mutex<Vec<Status>>>,
    pub progress: Arc<Mutex<Vec<Progress>>>,
}

impl Recorder {
    pub fn context(&self, cancel: CancelFlag) -> TaskContext {
        let statuses = self.statuses.clone();
        let progress = self.progress.clone();
        TaskContext::new(
            move |s| statuses.lock().unwrap().push(s),
            move |p| progress.lock().unwrap().push(p),
            cancel,
        )
    }

    /// Context that sets its own cancel flag at the first progress report
    /// of `stage`.
    pub fn cancelling_at(&self, stage: &'static str) -> TaskContext {
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        let statuses = self.statuses.clone();
        let progress = self.progress.clone();
        TaskContext::new(
            move |s| statuses.lock().unwrap().push(s),
            move |p: Progress| {
                if p.stage == stage {
                    trigger.cancel();
                }
                progress.lock().unwrap().push(p);
            },
            cancel,
        )
    }

    pub fn terminal(&self) -> Vec<Status> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|s| {
                matches!(
                    s,
                    Status::Finished(_) | Status::Cancelled(_) | Status::Failed(_)
                )
            })
            .cloned()
            .collect()
    }
}
