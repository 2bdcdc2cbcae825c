use anyhow::{Context, Result};
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use std::io::{self, Read, Write};
use std::thread;
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// Chunks read from a pty master. The channel closes on end of file; a read
/// error is delivered once and then the channel closes too.
pub type OutputRx = UnboundedReceiver<io::Result<Vec<u8>>>;

/// The parts of a child's pty that are not byte streams.
pub trait PtyControl: Send {
    fn resize(&mut self, rows: u16, cols: u16) -> Result<()>;
    fn kill(&mut self) -> Result<()>;
}

/// Everything needed to talk to a child: its input stream and its controls.
pub struct PtyHandles {
    pub writer: Box<dyn Write + Send>,
    pub control: Box<dyn PtyControl>,
}

pub struct Spawned {
    pub pid: Option<u32>,
    pub handles: PtyHandles,
    pub output: OutputRx,
}

struct PortablePty {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn portable_pty::Child + Send + Sync>,
}

impl PtyControl for PortablePty {
    fn resize(&mut self, rows: u16, cols: u16) -> Result<()> {
        self.master.resize(pty_size(rows, cols))?;
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        self.child.kill()?;
        Ok(())
    }
}

fn pty_size(rows: u16, cols: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Start `argv` on a fresh `rows x cols` pty with `TERM` set to `term`.
pub fn spawn(argv: &[String], rows: u16, cols: u16, term: &str) -> Result<Spawned> {
    let (program, args) = argv.split_first().context("empty command line")?;

    let pair = native_pty_system()
        .openpty(pty_size(rows, cols))
        .context("open pty")?;

    let mut cmd = CommandBuilder::new(program);
    cmd.args(args);
    cmd.env("TERM", term);
    if let Ok(cwd) = std::env::current_dir() {
        cmd.cwd(cwd);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .with_context(|| format!("spawn {program}"))?;
    drop(pair.slave);

    let pid = child.process_id();
    let reader = pair.master.try_clone_reader().context("clone pty reader")?;
    let writer = pair.master.take_writer().context("take pty writer")?;
    log::info!("spawned {program} with pid {pid:?} on a {rows}x{cols} pty");

    Ok(Spawned {
        pid,
        handles: PtyHandles {
            writer,
            control: Box::new(PortablePty {
                master: pair.master,
                child,
            }),
        },
        output: spawn_reader(format!("pty-{program}"), reader),
    })
}

/// Read `reader` on its own thread, forwarding chunks until end of file or a
/// hard error. Interrupted and would-block reads are retried.
pub fn spawn_reader<R: Read + Send + 'static>(name: String, mut reader: R) -> OutputRx {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = thread::Builder::new().name(name).spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Ok(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(err) if is_transient(&err) => continue,
                Err(err) => {
                    // A pty master reports EIO once the child side is gone.
                    let _ = tx.send(Err(err));
                    break;
                }
            }
        }
    });
    if let Err(err) = spawned {
        log::error!("could not start reader thread: {err}");
    }
    rx
}

pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod test {
    use super::{is_transient, spawn_reader};
    use std::io::{self, Cursor, Read};

    /// Fails once with `first`, then serves `rest`.
    struct Flaky {
        first: Option<io::ErrorKind>,
        rest: Cursor<Vec<u8>>,
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.first.take() {
                Some(kind) => Err(io::Error::from(kind)),
                None => self.rest.read(buf),
            }
        }
    }

    #[test]
    fn transient_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::BrokenPipe)));
    }

    #[tokio::test]
    async fn reader_forwards_until_eof() {
        let mut rx = spawn_reader("test".into(), Cursor::new(b"hello".to_vec()));
        assert_eq!(rx.recv().await.unwrap().unwrap(), b"hello");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn reader_retries_interrupted_reads() {
        let reader = Flaky {
            first: Some(io::ErrorKind::Interrupted),
            rest: Cursor::new(b"ok".to_vec()),
        };
        let mut rx = spawn_reader("test".into(), reader);
        assert_eq!(rx.recv().await.unwrap().unwrap(), b"ok");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn reader_reports_hard_errors_once() {
        let reader = Flaky {
            first: Some(io::ErrorKind::Other),
            rest: Cursor::new(b"never".to_vec()),
        };
        let mut rx = spawn_reader("test".into(), reader);
        assert!(rx.recv().await.unwrap().is_err());
        assert!(rx.recv().await.is_none());
    }
}
