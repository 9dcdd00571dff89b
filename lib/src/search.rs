//! The hash search, and the channel that feeds it new transactions.
//!
//! A reader thread blocks on the node's stream and forwards whole records.
//! The search only looks at the channel when the ready flag is up, so the
//! hot loop costs one relaxed atomic load per attempt.

use std::{
    io::Read,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use flume::{Receiver, Sender, TryRecvError};
use tracing::{debug, info};

use crate::{
    error::Result,
    network::GenUpdate,
    template::WorkingBlock,
    types::SolvedBlock,
};

/// How often the search reports progress.
const PROGRESS_INTERVAL: u64 = 1 << 24;

pub fn feed_channel() -> (FeedSender, FeedReceiver) {
    let (tx, rx) = flume::unbounded();
    let ready = Arc::new(AtomicBool::new(false));
    (
        FeedSender {
            tx,
            ready: Arc::clone(&ready),
        },
        FeedReceiver { rx, ready },
    )
}

pub struct FeedSender {
    tx: Sender<Result<GenUpdate>>,
    ready: Arc<AtomicBool>,
}

impl FeedSender {
    /// `false` once the search has gone away.
    pub fn send(&self, update: Result<GenUpdate>) -> bool {
        let sent = self.tx.send(update).is_ok();
        self.ready.store(true, Ordering::Release);
        sent
    }
}

impl Drop for FeedSender {
    // The search has to wake up to notice the hang-up.
    fn drop(&mut self) {
        self.ready.store(true, Ordering::Release);
    }
}

pub struct FeedReceiver {
    rx: Receiver<Result<GenUpdate>>,
    ready: Arc<AtomicBool>,
}

/// Forwards records from `stream` until it ends. A record cut short is
/// passed on as an error; the sender is dropped on the way out either way.
pub fn spawn_feed_reader<R>(mut stream: R, sender: FeedSender) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        loop {
            match GenUpdate::receive(&mut stream) {
                Ok(Some(update)) => {
                    if !sender.send(Ok(update)) {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("update stream closed");
                    break;
                }
                Err(e) => {
                    sender.send(Err(e));
                    break;
                }
            }
        }
    })
}

#[derive(Debug)]
pub enum SearchOutcome {
    Solved(SolvedBlock),
    /// The feed hung up before a solution turned up.
    Abandoned,
}

pub struct Search {
    block: WorkingBlock,
    feed: FeedReceiver,
    attempts: u64,
}

enum Drained {
    Open,
    Closed,
}

impl Search {
    pub fn new(block: WorkingBlock, feed: FeedReceiver) -> Self {
        Self {
            block,
            feed,
            attempts: 0,
        }
    }

    pub fn block(&self) -> &WorkingBlock {
        &self.block
    }

    /// Hashes until the target is beaten or the feed closes. A bad update
    /// ends the search with its error.
    pub fn run(mut self) -> Result<SearchOutcome> {
        loop {
            if self.feed.ready.load(Ordering::Relaxed)
                && self.feed.ready.swap(false, Ordering::Acquire)
            {
                if let Drained::Closed = self.drain()? {
                    info!(attempts = self.attempts, "feed closed, abandoning block");
                    return Ok(SearchOutcome::Abandoned);
                }
            }

            self.attempts += 1;
            if let Some(hash) = self.block.try_solve() {
                info!(%hash, attempts = self.attempts, "found block");
                match self.block.into_solved() {
                    Ok(solved) => return Ok(SearchOutcome::Solved(solved)),
                    Err(block) => self.block = block,
                }
            }
            self.block.advance();

            if self.attempts % PROGRESS_INTERVAL == 0 {
                debug!(
                    attempts = self.attempts,
                    nonce2 = %hex::encode(self.block.header().nonce2),
                    "still searching"
                );
            }
        }
    }

    fn drain(&mut self) -> Result<Drained> {
        loop {
            match self.feed.rx.try_recv() {
                Ok(update) => {
                    let update = update?;
                    self.block.apply(&update)?;
                }
                Err(TryRecvError::Empty) => return Ok(Drained::Open),
                Err(TryRecvError::Disconnected) => return Ok(Drained::Closed),
            }
        }
    }
}
