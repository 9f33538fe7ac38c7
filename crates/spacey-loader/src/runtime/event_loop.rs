// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Async fetch loop
//!
//! Files are read concurrently on the tokio runtime; completions are sent
//! back over a channel and delivered to the loader on the control thread,
//! in arrival order.

use super::transport::{Evaluator, Fetch, FetchOutcome, FetchRequest, FetchTicket, Transport, location_path};
use crate::error::Result;
use crate::module_system::Loader;
use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Completion message sent by a fetch task
type Delivery = (FetchTicket, std::result::Result<String, String>);

/// Transport that reads files on the tokio runtime
pub struct AsyncFileTransport {
    root: PathBuf,
    evaluator: Evaluator,
    sender: mpsc::UnboundedSender<Delivery>,
    in_flight: Rc<Cell<usize>>,
}

impl Transport for AsyncFileTransport {
    fn fetch(&self, request: &FetchRequest) -> Fetch {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => return Fetch::Ready(FetchOutcome::Failed(err.to_string())),
        };

        let path = location_path(&self.root, &request.url);
        let sender = self.sender.clone();
        let ticket = request.ticket;
        self.in_flight.set(self.in_flight.get() + 1);
        trace!(%ticket, path = %path.display(), "spawning fetch");

        handle.spawn(async move {
            let outcome = tokio::fs::read_to_string(&path)
                .await
                .map_err(|err| format!("{}: {}", path.display(), err));
            // The loop may have been dropped; nothing left to notify
            let _ = sender.send((ticket, outcome));
        });
        Fetch::Pending
    }

    fn evaluate(&self, loader: &Loader, url: &str, source: &str) -> Result<()> {
        (self.evaluator)(loader, url, source)
    }
}

/// Receives fetch completions and hands them to a loader
pub struct FetchLoop {
    receiver: mpsc::UnboundedReceiver<Delivery>,
    in_flight: Rc<Cell<usize>>,
}

impl FetchLoop {
    /// Fetches started but not yet delivered
    pub fn in_flight(&self) -> usize {
        self.in_flight.get()
    }

    /// Deliver completions until nothing is in flight. Returns the number
    /// of fetches completed.
    pub async fn run(&mut self, loader: &Loader) -> Result<usize> {
        let mut completed = 0;
        while self.in_flight.get() > 0 {
            let Some((ticket, outcome)) = self.receiver.recv().await else {
                break;
            };
            self.in_flight.set(self.in_flight.get() - 1);
            let outcome = match outcome {
                Ok(text) => FetchOutcome::Source(text),
                Err(reason) => FetchOutcome::Failed(reason),
            };
            loader.complete_fetch(ticket, outcome)?;
            completed += 1;
        }
        debug!(completed, "fetch loop idle");
        Ok(completed)
    }
}

/// Create a file transport rooted at `root` and the loop that drives it
pub fn fetch_loop(
    root: impl Into<PathBuf>,
    evaluator: impl Fn(&Loader, &str, &str) -> Result<()> + 'static,
) -> (AsyncFileTransport, FetchLoop) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let in_flight = Rc::new(Cell::new(0));
    let transport = AsyncFileTransport {
        root: root.into(),
        evaluator: Rc::new(evaluator),
        sender,
        in_flight: in_flight.clone(),
    };
    (transport, FetchLoop { receiver, in_flight })
}
