//! The read/write loop between a pty and its terminal.
//!
//! Output is fed to the terminal as soon as it arrives but the screen is only
//! refreshed between bursts: at most once per [REFRESH_THRESHOLD] while output
//! keeps coming, and right away after the user types so echo shows promptly.

use anyhow::Result;
use std::future;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

use crate::pty::OutputRx;

/// Longest time output may sit unrendered while more keeps arriving (~14Hz).
pub const REFRESH_THRESHOLD: Duration = Duration::from_millis(70);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The pty reached end of file or failed; the child is gone.
    ChildExited,
    /// The input source closed.
    InputClosed,
}

/// What the loop drives.
pub trait MuxHandler {
    /// Bytes the child wrote.
    fn child_output(&mut self, bytes: &[u8]) -> Result<()>;
    /// Bytes from the input source, headed for the child.
    fn input(&mut self, bytes: &[u8]) -> Result<()>;
    fn refresh(&mut self) -> Result<()>;
}

/// Decides when the loop repaints.
#[derive(Debug)]
pub struct RefreshThrottle {
    threshold: Duration,
    last: Instant,
    pending: bool,
    forced: bool,
}

impl RefreshThrottle {
    /// A new throttle owes an immediate refresh.
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last: Instant::now(),
            pending: false,
            forced: true,
        }
    }

    pub fn output_arrived(&mut self) {
        self.pending = true;
    }

    pub fn input_handled(&mut self) {
        self.forced = true;
    }

    pub fn due(&self) -> bool {
        self.forced || (self.pending && self.last.elapsed() >= self.threshold)
    }

    pub fn refreshed(&mut self) {
        self.last = Instant::now();
        self.pending = false;
        self.forced = false;
    }

    /// How long the loop may wait for I/O before checking again. `None` means
    /// nothing is waiting to be shown, so it can block until I/O arrives.
    pub fn wait_budget(&self) -> Option<Duration> {
        if !self.pending && !self.forced {
            return None;
        }
        Some(self.threshold.saturating_sub(self.last.elapsed()))
    }
}

/// Run until the child or the input source goes away.
pub async fn run<H: MuxHandler>(
    output: &mut OutputRx,
    mut input: Option<&mut UnboundedReceiver<Vec<u8>>>,
    handler: &mut H,
    threshold: Duration,
) -> Result<LoopExit> {
    let mut throttle = RefreshThrottle::new(threshold);
    loop {
        if throttle.due() {
            handler.refresh()?;
            throttle.refreshed();
        }

        let budget = throttle.wait_budget();
        tokio::select! {
            chunk = output.recv() => match chunk {
                Some(Ok(bytes)) => {
                    handler.child_output(&bytes)?;
                    throttle.output_arrived();
                }
                Some(Err(err)) => {
                    log::debug!("pty read ended: {err}");
                    return Ok(LoopExit::ChildExited);
                }
                None => return Ok(LoopExit::ChildExited),
            },
            bytes = next_input(&mut input) => match bytes {
                Some(bytes) => {
                    handler.input(&bytes)?;
                    throttle.input_handled();
                }
                None => return Ok(LoopExit::InputClosed),
            },
            _ = wait(budget) => {}
        }
    }
}

async fn next_input(input: &mut Option<&mut UnboundedReceiver<Vec<u8>>>) -> Option<Vec<u8>> {
    match input {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

async fn wait(budget: Option<Duration>) {
    match budget {
        Some(budget) => tokio::time::sleep(budget).await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod test {
    use super::{run, LoopExit, MuxHandler, RefreshThrottle, REFRESH_THRESHOLD};
    use anyhow::Result;
    use std::io;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::{advance, sleep};

    #[derive(Default)]
    struct Counter {
        output: Vec<u8>,
        input: Vec<u8>,
        refreshes: usize,
    }

    impl MuxHandler for Counter {
        fn child_output(&mut self, bytes: &[u8]) -> Result<()> {
            self.output.extend_from_slice(bytes);
            Ok(())
        }

        fn input(&mut self, bytes: &[u8]) -> Result<()> {
            self.input.extend_from_slice(bytes);
            Ok(())
        }

        fn refresh(&mut self) -> Result<()> {
            self.refreshes += 1;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_waits_for_threshold() {
        let mut throttle = RefreshThrottle::new(REFRESH_THRESHOLD);
        assert!(throttle.due());
        throttle.refreshed();
        assert_eq!(throttle.wait_budget(), None);

        throttle.output_arrived();
        assert!(!throttle.due());
        assert_eq!(throttle.wait_budget(), Some(REFRESH_THRESHOLD));

        advance(Duration::from_millis(30)).await;
        assert_eq!(throttle.wait_budget(), Some(Duration::from_millis(40)));
        advance(Duration::from_millis(40)).await;
        assert!(throttle.due());

        throttle.refreshed();
        throttle.input_handled();
        assert!(throttle.due());
    }

    #[tokio::test(start_paused = true)]
    async fn burst_refreshes_once_after_it_settles() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handler = Counter::default();

        let driver = async move {
            for chunk in [&b"a"[..], b"b", b"c", b"d", b"e"] {
                tx.send(Ok(chunk.to_vec())).unwrap();
                advance(Duration::from_millis(5)).await;
            }
            sleep(Duration::from_millis(200)).await;
            drop(tx);
        };
        let (exit, ()) = tokio::join!(run(&mut rx, None, &mut handler, REFRESH_THRESHOLD), driver);

        assert_eq!(exit.unwrap(), LoopExit::ChildExited);
        assert_eq!(handler.output, b"abcde");
        // One refresh when the loop starts, one after the burst.
        assert_eq!(handler.refreshes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn steady_output_refreshes_about_every_threshold() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handler = Counter::default();

        let driver = async move {
            for _ in 0..60 {
                tx.send(Ok(b"x".to_vec())).unwrap();
                advance(Duration::from_millis(10)).await;
            }
            drop(tx);
        };
        let (exit, ()) = tokio::join!(run(&mut rx, None, &mut handler, REFRESH_THRESHOLD), driver);

        assert_eq!(exit.unwrap(), LoopExit::ChildExited);
        assert_eq!(handler.output.len(), 60);
        // 600ms of output at a 70ms threshold, plus the initial refresh.
        assert!(
            (7..=10).contains(&handler.refreshes),
            "refreshed {} times",
            handler.refreshes
        );
    }

    #[tokio::test(start_paused = true)]
    async fn input_refreshes_immediately() {
        let (_out_tx, mut out_rx) = mpsc::unbounded_channel::<io::Result<Vec<u8>>>();
        let (in_tx, mut in_rx) = mpsc::unbounded_channel();
        let mut handler = Counter::default();

        in_tx.send(b"ls\r".to_vec()).unwrap();
        drop(in_tx);
        let exit = run(&mut out_rx, Some(&mut in_rx), &mut handler, REFRESH_THRESHOLD)
            .await
            .unwrap();

        assert_eq!(exit, LoopExit::InputClosed);
        assert_eq!(handler.input, b"ls\r");
        assert_eq!(handler.refreshes, 2);
    }

    #[tokio::test]
    async fn read_error_ends_the_loop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Err(io::Error::from(io::ErrorKind::Other))).unwrap();
        let mut handler = Counter::default();
        let exit = run(&mut rx, None, &mut handler, REFRESH_THRESHOLD).await.unwrap();
        assert_eq!(exit, LoopExit::ChildExited);
    }
}
