//! Integration tests for blocking calls carried by the I/O driver

use parking_lot::{Condvar, Mutex};
use std::io::{self, ErrorKind};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strand_io::IoEvent;
use strand_runtime::{
    task, Fd, FsBackend, IoBackend, MemoryBackend, Scheduler, SchedulerConfig, SchedulerError,
};
use tempfile::TempDir;

/// Backend whose reads block until the gate is opened.
struct GatedBackend {
    inner: MemoryBackend,
    reading: AtomicBool,
    open: Mutex<bool>,
    opened: Condvar,
}

impl GatedBackend {
    fn new(inner: MemoryBackend) -> Self {
        Self {
            inner,
            reading: AtomicBool::new(false),
            open: Mutex::new(false),
            opened: Condvar::new(),
        }
    }

    fn open_gate(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }
}

impl IoBackend for GatedBackend {
    fn open(&self, path: &Path) -> io::Result<Fd> {
        self.inner.open(path)
    }

    fn read(&self, fd: Fd, buf: &mut [u8]) -> io::Result<usize> {
        self.reading.store(true, Ordering::SeqCst);
        let mut open = self.open.lock();
        while !*open {
            if self
                .opened
                .wait_for(&mut open, Duration::from_secs(10))
                .timed_out()
            {
                return Err(io::Error::new(ErrorKind::TimedOut, "gate never opened"));
            }
        }
        drop(open);
        self.inner.read(fd, buf)
    }

    fn write(&self, fd: Fd, bytes: &[u8]) -> io::Result<usize> {
        self.inner.write(fd, bytes)
    }

    fn close(&self, fd: Fd) -> io::Result<()> {
        self.inner.close(fd)
    }
}

fn scheduler_over(backend: Arc<MemoryBackend>, compute_drivers: usize) -> Scheduler {
    let backend: Arc<dyn IoBackend> = backend;
    Scheduler::with_backend(SchedulerConfig::new(compute_drivers), backend)
        .expect("Failed to start scheduler")
}

#[test]
fn test_open_write_close() {
    let backend = Arc::new(MemoryBackend::new().with_file("notes.txt", Vec::new()));
    let scheduler = scheduler_over(Arc::clone(&backend), 1);

    scheduler
        .spawn(|| {
            let fd = task::blocking_open("notes.txt").unwrap();
            assert_eq!(task::blocking_write(fd, b"hi").unwrap(), 2);
            task::blocking_close(fd).unwrap();
        })
        .unwrap();

    let stats = scheduler.shutdown().unwrap();
    assert_eq!(backend.writes_to("notes.txt"), vec![b"hi".to_vec()]);
    assert_eq!(backend.contents("notes.txt").unwrap(), b"hi");
    assert_eq!(backend.open_count(), 0);
    assert_eq!(stats.active_tasks, 0);
    assert_eq!(stats.io_operations, 3);
    // Entry plus two resumptions per blocking call.
    assert_eq!(stats.resumptions, 7);
    assert!(stats.is_balanced());
}

#[test]
fn test_write_then_read_back() {
    let backend = Arc::new(MemoryBackend::new().with_file("data.bin", Vec::new()));
    let scheduler = scheduler_over(Arc::clone(&backend), 2);
    let matched = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&matched);

    scheduler
        .spawn(move || {
            let fd = task::blocking_open("data.bin").unwrap();
            task::blocking_write(fd, b"payload").unwrap();
            task::blocking_close(fd).unwrap();

            let fd = task::blocking_open("data.bin").unwrap();
            let mut buf = [0u8; 16];
            let n = task::blocking_read(fd, &mut buf).unwrap();
            task::blocking_close(fd).unwrap();
            flag.store(&buf[..n] == b"payload", Ordering::SeqCst);
        })
        .unwrap();

    scheduler.shutdown().unwrap();
    assert!(matched.load(Ordering::SeqCst));
}

#[test]
fn test_sequential_writes_keep_order() {
    const WRITES: usize = 10;
    let backend = Arc::new(MemoryBackend::new().with_file("log", Vec::new()));
    let scheduler = scheduler_over(Arc::clone(&backend), 2);

    scheduler
        .spawn(|| {
            let fd = task::blocking_open("log").unwrap();
            for i in 0..WRITES {
                task::blocking_write(fd, format!("{};", i).as_bytes()).unwrap();
            }
            task::blocking_close(fd).unwrap();
        })
        .unwrap();

    scheduler.shutdown().unwrap();
    let writes = backend.writes_to("log");
    assert_eq!(writes.len(), WRITES);
    for (i, bytes) in writes.iter().enumerate() {
        assert_eq!(bytes, format!("{};", i).as_bytes());
    }
    assert_eq!(
        backend.contents("log").unwrap(),
        b"0;1;2;3;4;5;6;7;8;9;".to_vec()
    );
}

#[test]
fn test_backend_errors_pass_through() {
    let backend = Arc::new(MemoryBackend::new());
    let scheduler = scheduler_over(Arc::clone(&backend), 1);
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&kinds);

    scheduler
        .spawn(move || {
            let err = task::blocking_open("missing").unwrap_err();
            seen.lock().push(err.as_io().map(|err| err.kind()));

            let err = task::blocking_close(Fd::from_raw(99)).unwrap_err();
            seen.lock().push(err.as_io().map(|err| err.kind()));
        })
        .unwrap();

    let stats = scheduler.shutdown().unwrap();
    assert_eq!(
        *kinds.lock(),
        vec![Some(ErrorKind::NotFound), Some(ErrorKind::InvalidInput)]
    );
    // Failed calls still took the I/O driver round trip.
    assert_eq!(stats.io_operations, 2);
    assert!(backend.events().is_empty());
}

#[test]
fn test_io_and_compute_interleave() {
    let backend = Arc::new(MemoryBackend::new().with_file("shared", Vec::new()));
    let scheduler = scheduler_over(Arc::clone(&backend), 1);
    let computed = Arc::new(AtomicBool::new(false));

    scheduler
        .spawn(|| {
            let fd = task::blocking_open("shared").unwrap();
            for _ in 0..5 {
                task::blocking_write(fd, b"x").unwrap();
            }
            task::blocking_close(fd).unwrap();
        })
        .unwrap();
    let flag = Arc::clone(&computed);
    scheduler
        .spawn(move || {
            for _ in 0..20 {
                task::yield_now().unwrap();
            }
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

    let stats = scheduler.shutdown().unwrap();
    assert!(computed.load(Ordering::SeqCst));
    assert_eq!(backend.contents("shared").unwrap(), b"xxxxx");
    assert_eq!(stats.tasks_completed, 2);

    let opens = backend
        .events()
        .into_iter()
        .filter(|event| matches!(event, IoEvent::Open { .. }))
        .count();
    assert_eq!(opens, 1);
}

#[test]
fn test_compute_driver_runs_while_read_blocks() {
    let backend = Arc::new(GatedBackend::new(
        MemoryBackend::new().with_file("slow", b"ready".to_vec()),
    ));
    let scheduler = Scheduler::with_backend(
        SchedulerConfig::new(1),
        Arc::clone(&backend) as Arc<dyn IoBackend>,
    )
    .unwrap();
    let result = Arc::new(Mutex::new(None));

    let sink = Arc::clone(&result);
    scheduler
        .spawn(move || {
            let fd = task::blocking_open("slow").unwrap();
            let mut buf = [0u8; 8];
            let read = task::blocking_read(fd, &mut buf).map(|n| buf[..n].to_vec());
            task::blocking_close(fd).unwrap();
            *sink.lock() = Some(read);
        })
        .unwrap();

    // Only runs if the lone compute driver is free while the read blocks.
    let gate = Arc::clone(&backend);
    scheduler
        .spawn(move || {
            while !gate.reading.load(Ordering::SeqCst) {
                task::yield_now().unwrap();
            }
            gate.open_gate();
        })
        .unwrap();

    let stats = scheduler.shutdown().unwrap();
    let read = result.lock().take().unwrap();
    assert_eq!(read.unwrap(), b"ready".to_vec());
    assert_eq!(stats.tasks_completed, 2);
}

#[test]
fn test_filesystem_backend_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, b"").unwrap();

    let scheduler = Scheduler::with_backend(
        SchedulerConfig::new(1),
        Arc::new(FsBackend::new()),
    )
    .unwrap();
    let read_back = Arc::new(Mutex::new(Vec::new()));

    let task_path = path.clone();
    let sink = Arc::clone(&read_back);
    scheduler
        .spawn(move || {
            let fd = task::blocking_open(&task_path).unwrap();
            task::blocking_write(fd, b"hello disk").unwrap();
            task::blocking_close(fd).unwrap();

            let fd = task::blocking_open(&task_path).unwrap();
            let mut buf = vec![0u8; 64];
            let n = task::blocking_read(fd, &mut buf).unwrap();
            task::blocking_close(fd).unwrap();
            sink.lock().extend_from_slice(&buf[..n]);
        })
        .unwrap();

    scheduler.shutdown().unwrap();
    assert_eq!(&*read_back.lock(), b"hello disk");
    assert_eq!(std::fs::read(&path).unwrap(), b"hello disk");
}

#[test]
fn test_filesystem_open_never_creates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.txt");
    let scheduler = Scheduler::initialize(SchedulerConfig::new(1)).unwrap();
    let outcome = Arc::new(Mutex::new(None));

    let task_path = path.clone();
    let slot = Arc::clone(&outcome);
    scheduler
        .spawn(move || {
            let result = task::blocking_open(&task_path);
            *slot.lock() = Some(matches!(
                result,
                Err(SchedulerError::Io(ref err)) if err.kind() == ErrorKind::NotFound
            ));
        })
        .unwrap();

    scheduler.shutdown().unwrap();
    assert_eq!(*outcome.lock(), Some(true));
    assert!(!path.exists());
}
